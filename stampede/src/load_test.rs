use std::{collections::BTreeMap, sync::Arc, time::Duration};

use serde::Serialize;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use typed_builder::TypedBuilder;

use crate::{
    client::Client,
    config::RunConfig,
    error::{Result, StampedeError},
    registry::SharedRegistry,
    report::{Report, Reporter},
    runner::ActiveClass,
    scheduler::{ActiveUsers, Scheduler, StopReason},
    stats::{Stats, StatsSnapshot},
    transport::Transport,
    user::UserClass,
};

/// Ties a workload, a transport, and a run configuration together.
///
/// The registry and stats handles default to fresh ones; pass your own to
/// seed the registry or to read stats while the run is going.
#[derive(TypedBuilder)]
pub struct LoadTest {
    #[builder(setter(into))]
    name: String,
    classes: Vec<UserClass>,
    transport: Arc<dyn Transport>,
    #[builder(default)]
    config: RunConfig,
    #[builder(default, setter(strip_option))]
    reporter: Option<Arc<dyn Reporter>>,
    #[builder(default)]
    registry: SharedRegistry,
    #[builder(default)]
    stats: Stats,
    #[builder(default, setter(skip))]
    stop: CancellationToken,
}

/// Stops a running [`LoadTest`] from another task, e.g. on Ctrl-C.
#[derive(Clone, Debug)]
pub struct StopHandle(CancellationToken);

impl StopHandle {
    pub fn stop(&self) {
        self.0.cancel();
    }

    pub fn is_stopped(&self) -> bool {
        self.0.is_cancelled()
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub name: String,
    pub elapsed: Duration,
    pub reason: StopReason,
    pub users_spawned: BTreeMap<String, usize>,
    /// Users whose start hook failed and ran degraded.
    pub start_failures: usize,
    /// Users whose task died without reaching `Stopped`.
    pub users_lost: usize,
    /// Users aborted because they outlived the drain timeout.
    pub still_draining: usize,
    pub stats: StatsSnapshot,
}

impl LoadTest {
    pub fn stop_handle(&self) -> StopHandle {
        StopHandle(self.stop.clone())
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &Stats {
        &self.stats
    }

    fn prepare(&self) -> Result<Vec<Arc<ActiveClass>>> {
        if self.classes.is_empty() {
            return Err(StampedeError::NoUserClasses);
        }
        self.config.validate()?;
        self.classes
            .iter()
            .map(|class| ActiveClass::new(class.clone(), &self.config.tags).map(Arc::new))
            .collect()
    }

    /// Runs the load test to completion.
    ///
    /// Only configuration problems produce an error, and they do so before a
    /// single user is spawned. Everything that goes wrong afterwards ends up
    /// in the stats and the summary.
    pub async fn run(self) -> Result<RunSummary> {
        let classes = self.prepare()?;
        tracing::info!(name = %self.name, users = self.config.users, "starting load test");

        let client = Client::new(Arc::clone(&self.transport), self.stats.clone());
        let scheduler = Scheduler::new(
            classes,
            self.config.clone(),
            client,
            self.registry.clone(),
            self.stop.clone(),
        );
        let active = scheduler.active_users();
        let start = Instant::now();

        let reporting = CancellationToken::new();
        let periodic = match (&self.reporter, self.config.report_interval) {
            (Some(reporter), Some(every)) => Some(tokio::spawn(report_periodically(
                Arc::clone(reporter),
                self.name.clone(),
                self.stats.clone(),
                active.clone(),
                start,
                every,
                reporting.clone(),
            ))),
            _ => None,
        };

        let population = scheduler.run().await;
        reporting.cancel();
        if let Some(task) = periodic {
            if let Err(err) = task.await {
                tracing::warn!("periodic reporter task failed: {err}");
            }
        }

        let summary = RunSummary {
            name: self.name.clone(),
            elapsed: start.elapsed(),
            reason: population.reason,
            users_spawned: population.users_spawned,
            start_failures: population.start_failures,
            users_lost: population.users_lost,
            still_draining: population.still_draining,
            stats: self.stats.snapshot(),
        };

        if let Some(reporter) = &self.reporter {
            let report = Report {
                name: summary.name.clone(),
                elapsed: summary.elapsed,
                active_users: active.get(),
                final_report: true,
                stats: summary.stats.clone(),
            };
            if let Err(err) = reporter.report(&report).await {
                tracing::warn!("final report failed: {err}");
            }
        }

        tracing::info!(
            name = %summary.name,
            elapsed = ?summary.elapsed,
            requests = summary.stats.total.count,
            failures = summary.stats.total.failures,
            "load test finished"
        );
        Ok(summary)
    }
}

async fn report_periodically(
    reporter: Arc<dyn Reporter>,
    name: String,
    stats: Stats,
    active: ActiveUsers,
    start: Instant,
    every: Duration,
    done: CancellationToken,
) {
    let mut ticker = tokio::time::interval_at(start + every, every);
    loop {
        tokio::select! {
            _ = done.cancelled() => break,
            _ = ticker.tick() => {
                let report = Report {
                    name: name.clone(),
                    elapsed: start.elapsed(),
                    active_users: active.get(),
                    final_report: false,
                    stats: stats.snapshot(),
                };
                if let Err(err) = reporter.report(&report).await {
                    tracing::warn!("periodic report failed: {err}");
                }
            }
        }
    }
}

impl std::fmt::Debug for LoadTest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LoadTest")
            .field("name", &self.name)
            .field("classes", &self.classes)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use http::StatusCode;
    use parking_lot::Mutex;

    use super::*;
    use crate::{
        ActionSpec, Pacing, Request, Step, action_fn,
        async_trait,
        transport::{FnTransport, Response, TransportError},
    };

    fn transport() -> Arc<dyn Transport> {
        Arc::new(FnTransport::new(|_req: Request| async {
            Ok::<_, TransportError>(Response::new(StatusCode::OK, "ok"))
        }))
    }

    fn ping_class() -> UserClass {
        UserClass::new("pinger")
            .pacing(Pacing::constant(Duration::from_secs(1)))
            .action(
                ActionSpec::new(
                    "ping",
                    action_fn(|ctx| {
                        Box::pin(async move {
                            ctx.request("/ping", Request::get("/ping")).send().await;
                            Ok(Step::Completed)
                        })
                    }),
                )
                .tag("ping"),
            )
    }

    #[derive(Default)]
    struct Collect(Mutex<Vec<Report>>);

    #[async_trait]
    impl Reporter for Collect {
        async fn report(&self, report: &Report) -> Result<()> {
            self.0.lock().push(report.clone());
            Ok(())
        }
    }

    #[tokio::test]
    async fn no_classes_is_a_configuration_error() {
        let test = LoadTest::builder()
            .name("empty")
            .classes(vec![])
            .transport(transport())
            .build();
        assert!(matches!(test.run().await, Err(StampedeError::NoUserClasses)));
    }

    #[tokio::test]
    async fn tag_filter_leaving_nothing_fails_before_spawning() {
        let config = RunConfig::builder()
            .tags(crate::TagFilter::include(["admin"]))
            .build();
        let test = LoadTest::builder()
            .name("filtered")
            .classes(vec![ping_class()])
            .transport(transport())
            .config(config)
            .build();
        let stats = test.stats().clone();

        assert!(matches!(test.run().await, Err(StampedeError::EmptyActionSet { .. })));
        assert_eq!(stats.snapshot(), StatsSnapshot::default());
    }

    #[tokio::test(start_paused = true)]
    async fn reports_periodically_and_at_the_end() {
        let reporter = Arc::new(Collect::default());
        let config = RunConfig::builder()
            .users(2)
            .duration(Duration::from_secs(5))
            .report_interval(Duration::from_secs(2))
            .build();
        let summary = LoadTest::builder()
            .name("reporting")
            .classes(vec![ping_class()])
            .transport(transport())
            .config(config)
            .reporter(reporter.clone())
            .build()
            .run()
            .await
            .unwrap();

        let reports = reporter.0.lock();
        assert_eq!(reports.len(), 3);
        assert!(!reports[0].final_report);
        assert_eq!(reports[0].active_users, 2);
        assert!(reports[2].final_report);
        assert_eq!(reports[2].stats, summary.stats);
        assert_eq!(summary.reason, StopReason::Duration);
    }

    #[tokio::test(start_paused = true)]
    async fn stop_handle_ends_the_run() {
        let test = LoadTest::builder()
            .name("stoppable")
            .classes(vec![ping_class()])
            .transport(transport())
            .build();
        let handle = test.stop_handle();
        let run = tokio::spawn(test.run());

        tokio::time::sleep(Duration::from_secs(3)).await;
        handle.stop();
        let summary = run.await.unwrap().unwrap();

        assert!(handle.is_stopped());
        assert_eq!(summary.reason, StopReason::Stopped);
        assert_eq!(summary.users_spawned["pinger"], 1);
        assert!(summary.stats.get("/ping").unwrap().count >= 3);
    }
}
