use std::{collections::BTreeSet, fmt, sync::Arc};

use async_trait::async_trait;
use futures::future::BoxFuture;

use crate::{context::UserContext, error::ActionError};

/// What an action did on one iteration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Step {
    /// The action ran; whatever it sent has been recorded.
    Completed,
    /// A prerequisite was missing (no credentials, nothing to correlate with).
    /// Counted apart from requests and never as a failure.
    Skipped(&'static str),
}

pub type ActionResult = Result<Step, ActionError>;

/// Anything a virtual user can do in one iteration.
///
/// Actions receive the user's [`UserContext`]: its session, its RNG, the
/// shared registry, and the request client. Implement it directly, derive it
/// from an `async fn` with the `#[action]` macro, or wrap a closure with
/// [`action_fn`].
///
/// ```rust
/// use stampede::{Action, ActionResult, Request, Step, UserContext, async_trait};
///
/// struct Health;
///
/// #[async_trait]
/// impl Action for Health {
///     async fn execute(&self, ctx: &mut UserContext) -> ActionResult {
///         ctx.request("/health", Request::get("/health")).send().await;
///         Ok(Step::Completed)
///     }
/// }
/// ```
#[async_trait]
pub trait Action: Send + Sync + 'static {
    async fn execute(&self, ctx: &mut UserContext) -> ActionResult;
}

/// Start and stop hooks of a user class.
#[async_trait]
pub trait Hook: Send + Sync + 'static {
    async fn run(&self, ctx: &mut UserContext) -> Result<(), ActionError>;
}

/// Closure-backed [`Action`], see [`action_fn`].
pub struct FnAction<F>(F);

/// Wraps a closure returning a boxed future as an [`Action`].
///
/// ```rust
/// use stampede::{Request, Step, action_fn};
///
/// let health = action_fn(|ctx| {
///     Box::pin(async move {
///         ctx.request("/health", Request::get("/health")).send().await;
///         Ok(Step::Completed)
///     })
/// });
/// # let _ = health;
/// ```
pub fn action_fn<F>(f: F) -> FnAction<F>
where
    F: for<'a> Fn(&'a mut UserContext) -> BoxFuture<'a, ActionResult> + Send + Sync + 'static,
{
    FnAction(f)
}

#[async_trait]
impl<F> Action for FnAction<F>
where
    F: for<'a> Fn(&'a mut UserContext) -> BoxFuture<'a, ActionResult> + Send + Sync + 'static,
{
    async fn execute(&self, ctx: &mut UserContext) -> ActionResult {
        (self.0)(ctx).await
    }
}

/// Closure-backed [`Hook`], see [`hook_fn`].
pub struct FnHook<F>(F);

pub fn hook_fn<F>(f: F) -> FnHook<F>
where
    F: for<'a> Fn(&'a mut UserContext) -> BoxFuture<'a, Result<(), ActionError>>
        + Send
        + Sync
        + 'static,
{
    FnHook(f)
}

#[async_trait]
impl<F> Hook for FnHook<F>
where
    F: for<'a> Fn(&'a mut UserContext) -> BoxFuture<'a, Result<(), ActionError>>
        + Send
        + Sync
        + 'static,
{
    async fn run(&self, ctx: &mut UserContext) -> Result<(), ActionError> {
        (self.0)(ctx).await
    }
}

/// A named, weighted, optionally tagged [`Action`] registered on a user class.
#[derive(Clone)]
pub struct ActionSpec {
    name: Arc<str>,
    weight: u32,
    tags: BTreeSet<String>,
    action: Arc<dyn Action>,
}

impl ActionSpec {
    /// New action with weight 1 and no tags.
    pub fn new(name: impl Into<Arc<str>>, action: impl Action) -> Self {
        Self {
            name: name.into(),
            weight: 1,
            tags: BTreeSet::new(),
            action: Arc::new(action),
        }
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get_weight(&self) -> u32 {
        self.weight
    }

    pub fn tags(&self) -> &BTreeSet<String> {
        &self.tags
    }

    pub fn action(&self) -> &dyn Action {
        self.action.as_ref()
    }
}

impl fmt::Debug for ActionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ActionSpec")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .field("tags", &self.tags)
            .finish_non_exhaustive()
    }
}
