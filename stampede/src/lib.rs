//! Stampede: a load-generation engine built around weighted virtual users.
//!
//! A run is a population of simulated clients. Each virtual user belongs to a
//! [`UserClass`], loops over the class's weighted [`Action`]s with a think-time
//! pause in between, and records every request it sends under a logical name.
//! Users hand identifiers to each other through a [`SharedRegistry`], so a
//! request created by one user can be read back by another.
//!
//! # Architecture
//!
//! The main building blocks are:
//!
//! - [`LoadTest`]: glue that ties everything together: user classes, a
//!   transport, a [`RunConfig`], and an optional [`Reporter`].
//! - [`UserClass`] and [`ActionSpec`]: the workload. Classes carry a spawn
//!   weight, [`Pacing`], start/stop [`Hook`]s, and weighted, tagged actions.
//! - [`scheduler`]: spawns users so that the class mix follows the weights,
//!   at the configured spawn rate and along optional [`Stage`]s, then drains
//!   them when the run ends.
//! - [`runner`]: the per-user state machine
//!   (`Spawning → Running → Stopping → Stopped`).
//! - [`UserContext`]: what an action sees: the user's [`Session`], its RNG,
//!   the registry, and the request client that classifies every response with
//!   a [`Classifier`] and feeds [`Stats`].
//! - [`Transport`]: the wire. [`HttpTransport`] (feature `http`) speaks HTTP
//!   through reqwest; anything else implements the trait.
//! - [`Metric`] / [`Aggregate`]: a request outcome and the bounded-memory
//!   aggregate it is folded into.
//! - [`Report`] / [`Reporter`]: periodic and final views of the stats.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::{sync::Arc, time::Duration};
//!
//! use stampede::{
//!     ActionSpec, LoadTest, Pacing, Request, RunConfig, Step, UserClass, action_fn,
//!     report::StdoutReporter, transport::HttpTransport,
//! };
//!
//! #[tokio::main]
//! async fn main() -> stampede::Result<()> {
//!     let visitor = UserClass::new("visitor")
//!         .pacing(Pacing::between(Duration::from_secs(1), Duration::from_secs(3)))
//!         .action(ActionSpec::new(
//!             "home",
//!             action_fn(|ctx| {
//!                 Box::pin(async move {
//!                     ctx.request("/", Request::get("/")).send().await;
//!                     Ok(Step::Completed)
//!                 })
//!             }),
//!         ));
//!
//!     let summary = LoadTest::builder()
//!         .name("homepage")
//!         .classes(vec![visitor])
//!         .transport(Arc::new(HttpTransport::new("http://localhost:3000")))
//!         .config(
//!             RunConfig::builder()
//!                 .users(50)
//!                 .spawn_rate(10.0)
//!                 .duration(Duration::from_secs(60))
//!                 .build(),
//!         )
//!         .reporter(Arc::new(StdoutReporter))
//!         .build()
//!         .run()
//!         .await?;
//!
//!     println!("{} requests", summary.stats.total.count);
//!     Ok(())
//! }
//! ```
//!
//! # Feature flags
//!
//! - `macros`: the `#[action]` and `#[hook]` attribute macros, which turn an
//!   `async fn(&mut UserContext)` into a registrable unit struct. (Enabled by default)
//! - `http`: [`HttpTransport`], backed by reqwest. (Enabled by default)
//! - `internals`: exposes the scheduler's apportionment and spawn-rate math.
//!
//! # Where to start
//!
//! - Read the docs for [`UserClass`], [`Action`], and [`LoadTest`].
//! - See `examples/ouvidoria.rs` for a complete two-class workload.

extern crate self as stampede;

/// Actions, hooks, and their closure adapters
pub mod action;
/// Metric aggregators
pub mod aggregate;
/// Request execution and response classification
pub mod client;
/// Run configuration
pub mod config;
pub mod context;
pub mod error;
pub mod load_test;
/// Single metrics
pub mod metric;
pub mod pacing;
pub mod registry;
/// Reports and Reporters
pub mod report;
pub mod runner;
pub mod scheduler;
pub mod selector;
pub mod session;
pub mod stats;
pub mod transport;
pub mod user;

pub use async_trait::async_trait;
pub use http::{Method, StatusCode};

pub use action::{Action, ActionResult, ActionSpec, Hook, Step, action_fn, hook_fn};
pub use aggregate::{Aggregate, EndpointAggregate};
pub use client::{Classifier, Exchange};
pub use config::{RunConfig, Stage};
pub use context::UserContext;
pub use error::{ActionError, Result, StampedeError};
pub use load_test::{LoadTest, RunSummary, StopHandle};
pub use metric::{Metric, Outcome, RequestOutcome};
pub use pacing::Pacing;
pub use registry::SharedRegistry;
pub use report::{Report, Reporter};
pub use selector::TagFilter;
pub use session::Session;
pub use stats::{Stats, StatsSnapshot};
#[cfg(feature = "http")]
pub use transport::HttpTransport;
pub use transport::{Request, Response, Transport, TransportError};
pub use user::UserClass;

#[cfg(feature = "macros")]
/// Procedural macros to reduce boilerplate
pub use stampede_macros::{action, hook};
