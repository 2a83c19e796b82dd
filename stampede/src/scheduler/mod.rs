//! Population scheduler: spawns virtual users to follow the load shape,
//! ramps them down when a stage asks for fewer, and drains them at the end.
use std::{
    collections::{BTreeMap, HashMap},
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use serde::Serialize;
use tokio::{
    task::{self, JoinError, JoinSet},
    time::{Instant, MissedTickBehavior},
};
use tokio_util::sync::CancellationToken;

use crate::{
    client::Client,
    config::RunConfig,
    context::UserContext,
    registry::SharedRegistry,
    runner::{ActiveClass, UserExit, VirtualUser, user_rng},
};

mod ramp;

#[cfg(feature = "internals")]
pub use ramp::*;
#[cfg(not(feature = "internals"))]
use ramp::*;

/// Governor resolution: spawn and stop decisions are taken every tick.
pub const TICK: Duration = Duration::from_millis(100);

/// Number of virtual users currently running, readable from any task.
#[derive(Clone, Debug, Default)]
pub struct ActiveUsers(Arc<AtomicUsize>);

impl ActiveUsers {
    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }

    fn inc(&self) {
        self.0.fetch_add(1, Ordering::Relaxed);
    }

    fn dec(&self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The configured duration elapsed.
    Duration,
    /// The last stage ran its course.
    StagesDone,
    /// Stopped from outside through the stop handle.
    Stopped,
    /// Every user left on its own and there is nobody left to spawn.
    Exhausted,
}

/// What the scheduler reports once every user is gone.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct PopulationSummary {
    pub reason: StopReason,
    pub users_spawned: BTreeMap<String, usize>,
    pub start_failures: usize,
    pub users_lost: usize,
    pub still_draining: usize,
}

struct UserHandle {
    id: usize,
    token: CancellationToken,
}

/// Who runs in a task. Outlives the task, so aborted users still report.
#[derive(Debug)]
struct Owner {
    class: usize,
    user_id: usize,
    start_failed: Arc<AtomicBool>,
}

/// Book-keeping of every user spawned so far.
struct Population {
    /// Live users per class, oldest first.
    handles: Vec<Vec<UserHandle>>,
    /// Users per class counting towards the target. Only ramp-down lowers it:
    /// users that exit on their own are not replaced.
    counted: Vec<usize>,
    spawned: Vec<usize>,
    tasks: JoinSet<UserExit>,
    owners: HashMap<task::Id, Owner>,
    next_id: usize,
    start_failures: usize,
    users_lost: usize,
}

impl Population {
    fn new(classes: usize) -> Self {
        Self {
            handles: (0..classes).map(|_| Vec::new()).collect(),
            counted: vec![0; classes],
            spawned: vec![0; classes],
            tasks: JoinSet::new(),
            owners: HashMap::new(),
            next_id: 0,
            start_failures: 0,
            users_lost: 0,
        }
    }

    fn counted_total(&self) -> usize {
        self.counted.iter().sum()
    }

    /// The class furthest below its share of `targets`, relative to that share.
    fn most_behind(&self, targets: &[usize]) -> Option<usize> {
        (0..targets.len())
            .filter(|&c| self.counted[c] < targets[c])
            .min_by(|&a, &b| {
                let fa = self.counted[a] as f64 / targets[a] as f64;
                let fb = self.counted[b] as f64 / targets[b] as f64;
                fa.total_cmp(&fb)
            })
    }

    /// The class furthest above its share of `targets`.
    fn most_ahead(&self, targets: &[usize]) -> Option<usize> {
        (0..targets.len())
            .filter(|&c| self.counted[c] > targets[c])
            .max_by(|&a, &b| {
                let fa = self.counted[a] as f64 / targets[a].max(1) as f64;
                let fb = self.counted[b] as f64 / targets[b].max(1) as f64;
                fa.total_cmp(&fb).then(b.cmp(&a))
            })
    }

    fn forget(&mut self, task: task::Id) -> Option<Owner> {
        let owner = self.owners.remove(&task)?;
        self.handles[owner.class].retain(|h| h.id != owner.user_id);
        if owner.start_failed.load(Ordering::Acquire) {
            self.start_failures += 1;
        }
        Some(owner)
    }
}

pub struct Scheduler {
    classes: Vec<Arc<ActiveClass>>,
    config: RunConfig,
    client: Client,
    registry: SharedRegistry,
    stop: CancellationToken,
    active: ActiveUsers,
}

impl Scheduler {
    pub fn new(
        classes: Vec<Arc<ActiveClass>>,
        config: RunConfig,
        client: Client,
        registry: SharedRegistry,
        stop: CancellationToken,
    ) -> Self {
        Self {
            classes,
            config,
            client,
            registry,
            stop,
            active: ActiveUsers::default(),
        }
    }

    pub fn active_users(&self) -> ActiveUsers {
        self.active.clone()
    }

    pub async fn run(self) -> PopulationSummary {
        let shape = LoadShape::from_config(&self.config);
        let weights: Vec<u32> = self.classes.iter().map(|c| c.class.get_weight()).collect();
        let users_token = CancellationToken::new();
        let mut pop = Population::new(self.classes.len());

        let start = Instant::now();
        let deadline = self.config.duration.map(|d| start + d);
        let mut ticker = tokio::time::interval(TICK);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut fractional = 0.0;
        let mut last_target = None;

        tracing::info!(classes = self.classes.len(), "starting population");
        let reason = loop {
            tokio::select! {
                biased;
                _ = self.stop.cancelled() => break StopReason::Stopped,
                _ = until(deadline) => break StopReason::Duration,
                Some(joined) = pop.tasks.join_next_with_id(), if !pop.tasks.is_empty() => {
                    self.on_exit(&mut pop, joined);
                    let settled = shape
                        .at(start.elapsed())
                        .is_some_and(|(stage, last)| last && pop.counted_total() >= stage.users);
                    if pop.tasks.is_empty() && settled {
                        break StopReason::Exhausted;
                    }
                }
                _ = ticker.tick() => {
                    let Some((stage, _)) = shape.at(start.elapsed()) else {
                        break StopReason::StagesDone;
                    };
                    if last_target != Some(stage.users) {
                        tracing::info!(users = stage.users, spawn_rate = ?stage.spawn_rate, "new population target");
                        last_target = Some(stage.users);
                    }
                    let targets = allocate(stage.users, &weights);
                    let (budget, f) = spawn_batch(stage.spawn_rate, TICK, fractional);
                    fractional = f;
                    self.rebalance(&mut pop, &targets, budget, &users_token);
                }
            }
        };

        tracing::info!(?reason, users = pop.tasks.len(), "stopping, draining users");
        users_token.cancel();
        let still_draining = self.drain(&mut pop).await;

        PopulationSummary {
            reason,
            users_spawned: self
                .classes
                .iter()
                .zip(&pop.spawned)
                .map(|(c, n)| (c.name().to_string(), *n))
                .collect(),
            start_failures: pop.start_failures,
            users_lost: pop.users_lost,
            still_draining,
        }
    }

    /// Moves the population at most `budget` users towards `targets`.
    fn rebalance(
        &self,
        pop: &mut Population,
        targets: &[usize],
        budget: usize,
        users_token: &CancellationToken,
    ) {
        for _ in 0..budget {
            if let Some(class) = pop.most_behind(targets) {
                self.spawn(pop, class, users_token);
            } else if let Some(class) = pop.most_ahead(targets) {
                pop.counted[class] -= 1;
                if let Some(handle) = pop.handles[class].pop() {
                    tracing::debug!(user_id = handle.id, class = self.classes[class].name(), "ramping down user");
                    handle.token.cancel();
                }
            } else {
                break;
            }
        }
    }

    fn spawn(&self, pop: &mut Population, class: usize, users_token: &CancellationToken) {
        let id = pop.next_id;
        pop.next_id += 1;
        let active = &self.classes[class];
        let context = UserContext::new(
            id,
            Arc::from(active.name()),
            user_rng(self.config.seed, id),
            self.client.clone(),
            self.registry.clone(),
        );
        let start_failed = context.start_failed_flag();
        let token = users_token.child_token();
        let user = VirtualUser::new(Arc::clone(active), context, token.clone())
            .with_iterations(self.config.iterations);

        let abort = pop.tasks.spawn(user.run());
        pop.owners.insert(
            abort.id(),
            Owner {
                class,
                user_id: id,
                start_failed,
            },
        );
        pop.handles[class].push(UserHandle { id, token });
        pop.counted[class] += 1;
        pop.spawned[class] += 1;
        self.active.inc();
    }

    fn on_exit(&self, pop: &mut Population, joined: Result<(task::Id, UserExit), JoinError>) {
        self.active.dec();
        match joined {
            Ok((task, _)) => {
                pop.forget(task);
            }
            Err(err) => {
                let owner = pop.forget(err.id());
                if err.is_panic() {
                    pop.users_lost += 1;
                    tracing::error!(?owner, "virtual user task panicked, continuing without it");
                }
            }
        }
    }

    /// Waits for cancelled users up to the drain timeout, then aborts the
    /// rest. Returns how many had to be aborted.
    async fn drain(&self, pop: &mut Population) -> usize {
        let drained = tokio::time::timeout(self.config.drain_timeout, async {
            while let Some(joined) = pop.tasks.join_next_with_id().await {
                self.on_exit(pop, joined);
            }
        })
        .await;

        if drained.is_ok() {
            return 0;
        }
        let still_draining = pop.tasks.len();
        tracing::warn!(
            still_draining,
            timeout = ?self.config.drain_timeout,
            "users did not stop in time, aborting them"
        );
        pop.tasks.abort_all();
        while let Some(joined) = pop.tasks.join_next_with_id().await {
            self.on_exit(pop, joined);
        }
        still_draining
    }
}

async fn until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
