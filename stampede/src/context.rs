use std::sync::{
    Arc,
    atomic::{AtomicBool, Ordering},
};

use rand::{Rng, rngs::StdRng, seq::IndexedRandom};

use crate::{
    client::{Client, PendingRequest},
    registry::SharedRegistry,
    session::Session,
    stats::Stats,
    transport::Request,
};

/// Everything an action can reach while running on behalf of one virtual
/// user.
///
/// The session and RNG belong to this user alone. The registry and the
/// client's stats are handles onto run-wide state shared with every other
/// user.
pub struct UserContext {
    id: usize,
    class: Arc<str>,
    session: Session,
    rng: StdRng,
    client: Client,
    registry: SharedRegistry,
    start_failed: Arc<AtomicBool>,
}

impl UserContext {
    pub fn new(
        id: usize,
        class: Arc<str>,
        rng: StdRng,
        client: Client,
        registry: SharedRegistry,
    ) -> Self {
        Self {
            id,
            class,
            session: Session::new(),
            rng,
            client,
            registry,
            start_failed: Arc::default(),
        }
    }

    /// Unique id of the virtual user within the run.
    pub fn user_id(&self) -> usize {
        self.id
    }

    pub fn class(&self) -> &str {
        &self.class
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn session_mut(&mut self) -> &mut Session {
        &mut self.session
    }

    pub fn rng(&mut self) -> &mut StdRng {
        &mut self.rng
    }

    pub fn registry(&self) -> &SharedRegistry {
        &self.registry
    }

    pub fn stats(&self) -> &Stats {
        self.client.stats()
    }

    /// Whether the class start hook failed for this user. Actions that need
    /// what the hook provides should skip.
    pub fn start_failed(&self) -> bool {
        self.start_failed.load(Ordering::Acquire)
    }

    pub(crate) fn mark_start_failed(&mut self) {
        self.start_failed.store(true, Ordering::Release);
    }

    /// Handle on the start-failure flag that outlives the user task.
    pub(crate) fn start_failed_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.start_failed)
    }

    /// Prepares a request recorded under the logical `name`.
    ///
    /// Use a name that does not change with per-call parameters, e.g.
    /// `/api/items/:id [GET]` rather than the resolved path.
    pub fn request(&self, name: impl Into<String>, request: Request) -> PendingRequest<'_> {
        PendingRequest::new(&self.client, &self.session, name.into(), request)
    }

    /// Uniformly picks one element of `items` with this user's RNG.
    pub fn choose<'a, T>(&mut self, items: &'a [T]) -> Option<&'a T> {
        items.choose(&mut self.rng)
    }

    /// Uniform value in `range` drawn with this user's RNG, `None` when the
    /// range is empty.
    pub fn random_range<T, R>(&mut self, range: R) -> Option<T>
    where
        T: rand::distr::uniform::SampleUniform,
        R: rand::distr::uniform::SampleRange<T>,
    {
        if range.is_empty() {
            return None;
        }
        Some(self.rng.random_range(range))
    }

    /// Random value from a registry collection, drawn with this user's RNG.
    pub fn sample(&mut self, collection: &str) -> Option<String> {
        self.registry.sample_with(collection, &mut self.rng)
    }

    /// Like [`sample`](Self::sample) but falls back to `fallback` while the
    /// collection is empty.
    pub fn sample_or(&mut self, collection: &str, fallback: &[&str]) -> Option<String> {
        self.registry.sample_or(collection, &mut self.rng, fallback)
    }
}

impl std::fmt::Debug for UserContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UserContext")
            .field("id", &self.id)
            .field("class", &self.class)
            .field("session", &self.session)
            .field("start_failed", &self.start_failed())
            .finish_non_exhaustive()
    }
}
