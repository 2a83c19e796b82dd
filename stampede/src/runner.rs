//! The virtual user state machine.
//!
//! ```text
//! Spawning ──start hook──▶ Running ──stop / iteration budget──▶ Stopping ──stop hook──▶ Stopped
//!                            │  ▲
//!                            └──┘ select → execute → pace
//! ```
//!
//! Cancellation is only observed at two points: before an action starts and
//! while pacing. An action that already started always runs to completion and
//! records its outcome, so a stop never truncates a request mid-flight.
use std::{
    any::Any,
    panic::AssertUnwindSafe,
    sync::Arc,
    time::{Duration, Instant},
};

use futures::FutureExt;
use rand::{SeedableRng, rngs::StdRng};
use serde::Serialize;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;

use crate::{
    action::{ActionSpec, Hook, Step},
    context::UserContext,
    error::Result,
    metric::RequestOutcome,
    selector::{ActionSelector, TagFilter},
    user::UserClass,
};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
pub enum UserState {
    Spawning,
    Running,
    Stopping,
    Stopped,
}

/// A validated user class together with its filtered action selector.
#[derive(Debug)]
pub struct ActiveClass {
    pub class: UserClass,
    pub selector: ActionSelector,
}

impl ActiveClass {
    pub fn new(class: UserClass, filter: &TagFilter) -> Result<Self> {
        class.validate()?;
        let selector = ActionSelector::new(class.name(), class.actions(), filter)?;
        Ok(Self { class, selector })
    }

    pub fn name(&self) -> &str {
        self.class.name()
    }
}

/// Per-user RNG: derived from the run seed when one is set, so a seeded run
/// replays the same choices per user; otherwise seeded from the thread RNG.
pub fn user_rng(seed: Option<u64>, user_id: usize) -> StdRng {
    match seed {
        Some(seed) => StdRng::seed_from_u64(mix(seed ^ (user_id as u64).rotate_left(32))),
        None => StdRng::from_rng(&mut rand::rng()),
    }
}

// splitmix64 finalizer
fn mix(mut z: u64) -> u64 {
    z = z.wrapping_add(0x9E37_79B9_7F4A_7C15);
    z = (z ^ (z >> 30)).wrapping_mul(0xBF58_476D_1CE4_E5B9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94D0_49BB_1331_11EB);
    z ^ (z >> 31)
}

/// Summary a user hands back to the scheduler once stopped.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct UserExit {
    pub user_id: usize,
    pub class: Arc<str>,
    pub iterations: u64,
    pub start_failed: bool,
}

pub struct VirtualUser {
    class: Arc<ActiveClass>,
    context: UserContext,
    stop: CancellationToken,
    max_iterations: Option<u64>,
    state: watch::Sender<UserState>,
}

impl VirtualUser {
    pub fn new(class: Arc<ActiveClass>, context: UserContext, stop: CancellationToken) -> Self {
        let (state, _) = watch::channel(UserState::Spawning);
        Self {
            class,
            context,
            stop,
            max_iterations: None,
            state,
        }
    }

    /// Stops the user after `n` actions.
    pub fn with_iterations(mut self, n: Option<u64>) -> Self {
        self.max_iterations = n;
        self
    }

    pub fn state(&self) -> watch::Receiver<UserState> {
        self.state.subscribe()
    }

    fn budget_spent(&self, iterations: u64) -> bool {
        self.max_iterations.is_some_and(|max| iterations >= max)
    }

    pub async fn run(mut self) -> UserExit {
        let class = Arc::clone(&self.class);
        let user_id = self.context.user_id();
        tracing::debug!(user_id, class = class.name(), "spawning user");

        if let Some(hook) = class.class.start_hook() {
            if let Err(reason) = run_hook(hook, &mut self.context).await {
                tracing::warn!(
                    user_id,
                    class = class.name(),
                    "start hook failed, user continues degraded: {reason}"
                );
                self.context.mark_start_failed();
            }
        }
        self.state.send_replace(UserState::Running);

        let mut iterations = 0;
        loop {
            if self.stop.is_cancelled() || self.budget_spent(iterations) {
                break;
            }
            let spec = class.selector.select(self.context.rng());
            self.execute(spec).await;
            iterations += 1;
            if self.budget_spent(iterations) {
                break;
            }

            let delay = class.class.get_pacing().next_delay(self.context.rng());
            if !self.pace(delay).await {
                break;
            }
        }

        self.state.send_replace(UserState::Stopping);
        tracing::debug!(user_id, iterations, "stopping user");
        if let Some(hook) = class.class.stop_hook() {
            if let Err(reason) = run_hook(hook, &mut self.context).await {
                tracing::warn!(user_id, class = class.name(), "stop hook failed: {reason}");
            }
        }

        let VirtualUser { context, state, .. } = self;
        let start_failed = context.start_failed();
        drop(context);
        state.send_replace(UserState::Stopped);

        UserExit {
            user_id,
            class: Arc::from(class.name()),
            iterations,
            start_failed,
        }
    }

    /// Sleeps for `delay` unless stopped first. Returns `false` on stop.
    async fn pace(&self, delay: Duration) -> bool {
        if delay.is_zero() {
            // Closed-loop users must still let the runtime breathe
            tokio::task::yield_now().await;
            return !self.stop.is_cancelled();
        }
        tokio::select! {
            _ = tokio::time::sleep(delay) => true,
            _ = self.stop.cancelled() => false,
        }
    }

    /// Runs one action, turning every way it can go wrong into a recorded
    /// failure or a skip.
    async fn execute(&mut self, spec: &ActionSpec) {
        let start = Instant::now();
        let result = AssertUnwindSafe(spec.action().execute(&mut self.context))
            .catch_unwind()
            .await;
        let stats = self.context.stats();
        match result {
            Ok(Ok(Step::Completed)) => {}
            Ok(Ok(Step::Skipped(reason))) => {
                tracing::trace!(action = spec.name(), reason, "action skipped");
                stats.record_skip(spec.name());
            }
            Ok(Err(err)) => {
                stats.record(&RequestOutcome::failure(spec.name(), start.elapsed(), err.to_string()));
            }
            Err(panic) => {
                let reason = format!("action panicked: {}", panic_message(panic.as_ref()));
                tracing::error!(action = spec.name(), "{reason}");
                stats.record(&RequestOutcome::failure(spec.name(), start.elapsed(), reason));
            }
        }
    }
}

async fn run_hook(hook: &dyn Hook, ctx: &mut UserContext) -> std::result::Result<(), String> {
    match AssertUnwindSafe(hook.run(ctx)).catch_unwind().await {
        Ok(Ok(())) => Ok(()),
        Ok(Err(err)) => Err(err.to_string()),
        Err(panic) => Err(format!("hook panicked: {}", panic_message(panic.as_ref()))),
    }
}

fn panic_message(panic: &(dyn Any + Send)) -> &str {
    if let Some(s) = panic.downcast_ref::<&'static str>() {
        s
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s
    } else {
        "unknown panic"
    }
}
