use std::time::Duration;

use serde::{Deserialize, Serialize};
use typed_builder::TypedBuilder;

use crate::{
    error::{Result, StampedeError},
    selector::TagFilter,
};

/// How long stopped users get to finish their in-flight action.
pub const DEFAULT_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

/// One segment of a load shape: hold `users` for `duration`, reaching it at
/// `spawn_rate` users per second (all at once when unset).
///
/// Use `Stage::new(Duration::from_secs(60), 100)` to go to 100 users and stay
/// there for a minute. A later stage with fewer users ramps down.
#[derive(Clone, Copy, Debug, PartialEq, Serialize, Deserialize)]
pub struct Stage {
    pub duration: Duration,
    pub users: usize,
    #[serde(default)]
    pub spawn_rate: Option<f64>,
}

impl Stage {
    pub fn new(duration: Duration, users: usize) -> Self {
        Self {
            duration,
            users,
            spawn_rate: None,
        }
    }

    pub fn with_spawn_rate(mut self, rate: f64) -> Self {
        self.spawn_rate = Some(rate);
        self
    }
}

/// Parameters of one run.
///
/// Without `stages` the run holds `users` until `duration` elapses, the run is
/// stopped, or every user exhausted its `iterations`. With `stages`, `users`
/// and `spawn_rate` are ignored and the run ends after the last stage.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize, TypedBuilder)]
#[serde(default)]
pub struct RunConfig {
    #[builder(default = 1)]
    pub users: usize,
    /// Users per second while ramping up; `None` spawns everyone at once.
    #[builder(default, setter(strip_option))]
    pub spawn_rate: Option<f64>,
    #[builder(default, setter(strip_option))]
    pub duration: Option<Duration>,
    #[builder(default)]
    pub stages: Vec<Stage>,
    #[builder(default)]
    pub tags: TagFilter,
    /// Makes every user's random choices reproducible.
    #[builder(default, setter(strip_option))]
    pub seed: Option<u64>,
    /// Actions each user runs before stopping on its own.
    #[builder(default, setter(strip_option))]
    pub iterations: Option<u64>,
    #[builder(default = DEFAULT_DRAIN_TIMEOUT)]
    pub drain_timeout: Duration,
    /// Interval of periodic reports; only the final report when unset.
    #[builder(default, setter(strip_option))]
    pub report_interval: Option<Duration>,
}

impl Default for RunConfig {
    fn default() -> Self {
        Self::builder().build()
    }
}

impl RunConfig {
    pub fn validate(&self) -> Result<()> {
        if self.stages.is_empty() && self.users == 0 {
            return Err(StampedeError::InvalidConfig(
                "users must be at least 1".to_string(),
            ));
        }
        if let Some(rate) = self.spawn_rate {
            check_rate(rate).map_err(StampedeError::InvalidConfig)?;
        }
        for (index, stage) in self.stages.iter().enumerate() {
            if let Some(rate) = stage.spawn_rate {
                check_rate(rate).map_err(|reason| StampedeError::InvalidStage { index, reason })?;
            }
        }
        if self.iterations == Some(0) {
            return Err(StampedeError::InvalidConfig(
                "iterations must be at least 1".to_string(),
            ));
        }
        if self.report_interval.is_some_and(|i| i.is_zero()) {
            return Err(StampedeError::InvalidConfig(
                "report interval must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

fn check_rate(rate: f64) -> std::result::Result<(), String> {
    if rate.is_finite() && rate > 0.0 {
        Ok(())
    } else {
        Err(format!("spawn rate must be a positive number, got {rate}"))
    }
}
