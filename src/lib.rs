//! # Forebear
//!
//! Ancestry discovery over a rate-limited genealogy source.
//!
//! Starting from a handful of root persons, the crate fetches their parents
//! recursively through an ordered, single-flight request queue, memoizes every
//! person's ancestor set, groups the roots by shared ancestry, and reduces each
//! group's shared ancestors to the most specific ones.

pub mod builder;
pub mod cluster;
pub mod config;
pub mod frontier;
pub mod model;
pub mod persistence;
pub mod queue;
pub mod relations;
pub mod simulation;
pub mod source;
pub mod store;
pub mod utils;

// Re-export main types for convenience
pub use builder::{BuildError, BuildReport, TreeBuilder};
pub use cluster::{AncestorGroup, ClusterStrategy};
pub use config::ForebearConfig;
pub use model::{AncestorSet, Gender, Person, PersonId};
pub use persistence::{RootEntry, RootList, SnapshotDir};
pub use queue::{Clock, RequestQueue, TokioClock};
pub use source::{FetchError, FetchSource, Operation};
pub use store::{PersonStore, SharedStore};

use std::sync::Arc;
use tracing::info;

/// Main API: one store, one request queue and one tree builder wired
/// together from a [`ForebearConfig`].
pub struct Forebear {
    config: ForebearConfig,
    store: SharedStore,
    queue: RequestQueue,
    builder: TreeBuilder,
}

impl Forebear {
    /// Create an instance over `source`, ticking on wall-clock time. Must be
    /// called inside a Tokio runtime.
    pub fn new(source: Arc<dyn FetchSource>, config: ForebearConfig) -> Self {
        Self::with_clock(source, Arc::new(TokioClock), config)
    }

    /// Create an instance with an explicit retry clock.
    pub fn with_clock(
        source: Arc<dyn FetchSource>,
        clock: Arc<dyn Clock>,
        config: ForebearConfig,
    ) -> Self {
        let store = PersonStore::new().shared();
        let queue = RequestQueue::new(source, clock, config.queue.clone());
        let builder = TreeBuilder::new(Arc::clone(&store), queue.clone(), config.builder.clone());
        Self {
            config,
            store,
            queue,
            builder,
        }
    }

    pub fn config(&self) -> &ForebearConfig {
        &self.config
    }

    /// Handle to the shared store. Do not hold its lock across an `.await`.
    pub fn store(&self) -> SharedStore {
        Arc::clone(&self.store)
    }

    pub fn queue(&self) -> &RequestQueue {
        &self.queue
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.depth()
    }

    pub fn set_depth_observer(&self, observer: impl Fn(usize) + Send + Sync + 'static) {
        self.queue.set_depth_observer(observer);
    }

    /// Add a root by guid or profile URL and grow its ancestry.
    pub async fn add_root(&self, input: &str) -> Result<BuildReport, BuildError> {
        let guid = relations::isolate_id(input);
        self.builder.add_root(guid).await
    }

    /// Stop the builds in progress from descending further. Later builds are
    /// unaffected.
    pub fn cancel(&self) {
        self.builder.cancel();
    }

    /// Fill in every missing ancestor set. Returns how many were computed.
    pub fn compute_ancestors(&self) -> usize {
        let computed = self.store.lock().compute_all_ancestors();
        info!(computed, "ancestor sets computed");
        computed
    }

    /// Group `roots` with the configured strategy.
    pub fn cluster(&self, roots: &[PersonId]) -> Vec<AncestorGroup> {
        self.cluster_with(roots, self.config.cluster.strategy)
    }

    pub fn cluster_with(&self, roots: &[PersonId], strategy: ClusterStrategy) -> Vec<AncestorGroup> {
        let store = self.store.lock();
        cluster::cluster(&store, roots, strategy)
    }

    /// Most specific shared ancestors of `group`.
    pub fn frontier(&self, group: &AncestorGroup) -> AncestorSet {
        let store = self.store.lock();
        frontier::frontier(&store, group.ancestors())
    }

    /// [`Self::frontier`] as person records, ordered by id.
    pub fn frontier_persons(&self, group: &AncestorGroup) -> Vec<Person> {
        let store = self.store.lock();
        frontier::frontier_persons(&store, group.ancestors())
            .into_iter()
            .cloned()
            .collect()
    }

    /// The configured data directory.
    pub fn data_dir(&self) -> anyhow::Result<SnapshotDir> {
        SnapshotDir::open(&self.config.storage.data_dir)
    }

    /// Replace the store's contents with the snapshot in `dir`. An unreadable
    /// snapshot leaves the store empty. Returns the number of persons loaded.
    pub fn load(&self, dir: &SnapshotDir) -> usize {
        let loaded = dir.load_store();
        let count = loaded.len();
        *self.store.lock() = loaded;
        count
    }

    /// Write the store to `dir`. Returns whether the snapshot was replaced.
    pub fn save(&self, dir: &SnapshotDir) -> bool {
        let store = self.store.lock();
        dir.save_store(&store)
    }
}
