use std::{fmt, sync::Arc};

use crate::{
    action::{Action, ActionSpec, Hook},
    error::{Result, StampedeError},
    pacing::Pacing,
};

/// A kind of simulated client: its share of the population, its think-time,
/// and the weighted actions it picks from.
///
/// ```rust
/// use std::time::Duration;
/// use stampede::{ActionSpec, Pacing, Request, Step, UserClass, action_fn};
///
/// let citizen = UserClass::new("citizen")
///     .weight(8)
///     .pacing(Pacing::between(Duration::from_secs(1), Duration::from_secs(5)))
///     .action(
///         ActionSpec::new(
///             "health",
///             action_fn(|ctx| {
///                 Box::pin(async move {
///                     ctx.request("/health", Request::get("/health")).send().await;
///                     Ok(Step::Completed)
///                 })
///             }),
///         )
///         .tag("health"),
///     );
/// assert_eq!(citizen.actions().len(), 1);
/// ```
#[derive(Clone)]
pub struct UserClass {
    name: Arc<str>,
    weight: u32,
    pacing: Pacing,
    actions: Vec<ActionSpec>,
    on_start: Option<Arc<dyn Hook>>,
    on_stop: Option<Arc<dyn Hook>>,
}

impl UserClass {
    pub fn new(name: impl Into<Arc<str>>) -> Self {
        Self {
            name: name.into(),
            weight: 1,
            pacing: Pacing::none(),
            actions: Vec::new(),
            on_start: None,
            on_stop: None,
        }
    }

    pub fn weight(mut self, weight: u32) -> Self {
        self.weight = weight;
        self
    }

    pub fn pacing(mut self, pacing: Pacing) -> Self {
        self.pacing = pacing;
        self
    }

    pub fn action(mut self, action: ActionSpec) -> Self {
        self.actions.push(action);
        self
    }

    /// Shorthand for `action(ActionSpec::new(name, action).weight(weight))`.
    pub fn weighted(self, name: impl Into<Arc<str>>, weight: u32, action: impl Action) -> Self {
        self.action(ActionSpec::new(name, action).weight(weight))
    }

    pub fn on_start(mut self, hook: impl Hook) -> Self {
        self.on_start = Some(Arc::new(hook));
        self
    }

    pub fn on_stop(mut self, hook: impl Hook) -> Self {
        self.on_stop = Some(Arc::new(hook));
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn get_weight(&self) -> u32 {
        self.weight
    }

    pub fn get_pacing(&self) -> Pacing {
        self.pacing
    }

    pub fn actions(&self) -> &[ActionSpec] {
        &self.actions
    }

    pub(crate) fn start_hook(&self) -> Option<&dyn Hook> {
        self.on_start.as_deref()
    }

    pub(crate) fn stop_hook(&self) -> Option<&dyn Hook> {
        self.on_stop.as_deref()
    }

    /// Configuration-time checks that do not depend on the run's tag filter.
    pub fn validate(&self) -> Result<()> {
        if self.weight == 0 {
            return Err(StampedeError::InvalidWeight {
                kind: "user class",
                name: self.name.to_string(),
            });
        }
        if !self.pacing.is_valid() {
            return Err(StampedeError::InvalidPacing {
                class: self.name.to_string(),
                min: self.pacing.min,
                max: self.pacing.max,
            });
        }
        if let Some(action) = self.actions.iter().find(|a| a.get_weight() == 0) {
            return Err(StampedeError::InvalidWeight {
                kind: "action",
                name: action.name().to_string(),
            });
        }
        Ok(())
    }
}

impl fmt::Debug for UserClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("UserClass")
            .field("name", &self.name)
            .field("weight", &self.weight)
            .field("pacing", &self.pacing)
            .field("actions", &self.actions)
            .field("on_start", &self.on_start.is_some())
            .field("on_stop", &self.on_stop.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use super::*;
    use crate::{Step, action_fn};

    fn noop() -> impl Action {
        action_fn(|_| Box::pin(async { Ok(Step::Completed) }))
    }

    #[test]
    fn valid_class_passes() {
        let class = UserClass::new("a").weight(3).weighted("x", 2, noop());
        assert!(class.validate().is_ok());
        assert_eq!(class.actions()[0].get_weight(), 2);
    }

    #[test]
    fn zero_weights_are_rejected() {
        let err = UserClass::new("a").weight(0).validate().unwrap_err();
        assert!(matches!(err, StampedeError::InvalidWeight { kind: "user class", .. }));

        let err = UserClass::new("a").weighted("x", 0, noop()).validate().unwrap_err();
        assert!(matches!(err, StampedeError::InvalidWeight { kind: "action", .. }));
    }

    #[test]
    fn inverted_pacing_is_rejected() {
        let err = UserClass::new("a")
            .pacing(Pacing::between(Duration::from_secs(2), Duration::from_secs(1)))
            .validate()
            .unwrap_err();
        assert!(matches!(err, StampedeError::InvalidPacing { .. }));
    }
}
