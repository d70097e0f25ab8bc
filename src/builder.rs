//! # Tree Builder
//!
//! Grows the parentage graph from a root person by fetching parents through
//! the [`RequestQueue`] and writing them into the shared store.
//!
//! Father and mother branches are descended concurrently; every fetch still
//! goes through the single queue. A failed fetch abandons only the branch it
//! belongs to, so partial trees are a normal outcome.

use crate::config::BuilderConfig;
use crate::model::{Gender, PersonId};
use crate::queue::RequestQueue;
use crate::relations::{isolate_id, redirect_target, resolve_parents, union_list, union_number};
use crate::source::{FetchError, Operation};
use crate::store::SharedStore;
use hashbrown::{HashMap, HashSet};
use parking_lot::Mutex;
use serde_json::Value;
use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, info, instrument, warn};

type Descent<'a> = Pin<Box<dyn Future<Output = ()> + Send + 'a>>;

/// Outcome of a parent fetch, shared by every branch asking for the same
/// alternate id while it is in flight.
type FetchSlot = Arc<OnceCell<Result<PersonId, BuildError>>>;

#[derive(Debug, Clone, PartialEq)]
pub enum BuildError {
    /// The source returned a record without a `guid`.
    NotFound { reference: String },
    /// A redirect pointed at another merged record.
    RedirectLoop { reference: String },
    Fetch(FetchError),
}

impl fmt::Display for BuildError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BuildError::NotFound { reference } => write!(f, "no profile found for {reference}"),
            BuildError::RedirectLoop { reference } => {
                write!(f, "{reference} redirects more than once")
            }
            BuildError::Fetch(error) => write!(f, "fetch failed: {error}"),
        }
    }
}

impl std::error::Error for BuildError {}

impl From<FetchError> for BuildError {
    fn from(error: FetchError) -> Self {
        BuildError::Fetch(error)
    }
}

/// Summary of one build.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildReport {
    pub root: PersonId,
    /// Persons whose ancestry was examined
    pub visited: usize,
    /// Records newly added to the store
    pub fetched: usize,
    /// Parent links written
    pub linked: usize,
    /// Parents left unlinked because their gender is unknown
    pub unlinked: usize,
    /// Branches abandoned after a failure
    pub failed_branches: usize,
    pub cancelled: bool,
}

/// Per-build bookkeeping.
struct BuildRun {
    cutoff: i32,
    /// Cancel epoch when the build started
    epoch: u64,
    visited: Mutex<HashSet<PersonId>>,
    fetched: AtomicUsize,
    linked: AtomicUsize,
    unlinked: AtomicUsize,
    failed: AtomicUsize,
    cancelled: AtomicBool,
}

impl BuildRun {
    fn new(cutoff: i32, epoch: u64) -> Self {
        Self {
            cutoff,
            epoch,
            visited: Mutex::new(HashSet::new()),
            fetched: AtomicUsize::new(0),
            linked: AtomicUsize::new(0),
            unlinked: AtomicUsize::new(0),
            failed: AtomicUsize::new(0),
            cancelled: AtomicBool::new(false),
        }
    }

    fn report(&self, root: PersonId) -> BuildReport {
        BuildReport {
            root,
            visited: self.visited.lock().len(),
            fetched: self.fetched.load(Ordering::Relaxed),
            linked: self.linked.load(Ordering::Relaxed),
            unlinked: self.unlinked.load(Ordering::Relaxed),
            failed_branches: self.failed.load(Ordering::Relaxed),
            cancelled: self.cancelled.load(Ordering::Relaxed),
        }
    }
}

pub struct TreeBuilder {
    store: SharedStore,
    queue: RequestQueue,
    config: BuilderConfig,
    /// Bumped by every cancel; builds started before the bump stop.
    cancel_epoch: AtomicU64,
    /// Alternate id -> fetch in progress
    in_flight: Mutex<HashMap<String, FetchSlot>>,
}

impl TreeBuilder {
    pub fn new(store: SharedStore, queue: RequestQueue, config: BuilderConfig) -> Self {
        Self {
            store,
            queue,
            config,
            cancel_epoch: AtomicU64::new(0),
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Stop every build currently descending. Operations already queued
    /// still run; their results are not followed further. Builds started
    /// afterwards are unaffected.
    pub fn cancel(&self) {
        self.cancel_epoch.fetch_add(1, Ordering::SeqCst);
    }

    fn is_cancelled(&self, run: &BuildRun) -> bool {
        let cancelled = self.cancel_epoch.load(Ordering::SeqCst) != run.epoch;
        if cancelled {
            run.cancelled.store(true, Ordering::Relaxed);
        }
        cancelled
    }

    /// Materialize `guid` (fetching it if needed) and grow its ancestry down
    /// to the configured birth-year cutoff.
    pub async fn add_root(&self, guid: &str) -> Result<BuildReport, BuildError> {
        self.add_root_with_cutoff(guid, self.config.birth_year_cutoff)
            .await
    }

    #[instrument(skip(self))]
    pub async fn add_root_with_cutoff(
        &self,
        guid: &str,
        cutoff: i32,
    ) -> Result<BuildReport, BuildError> {
        let run = BuildRun::new(cutoff, self.cancel_epoch.load(Ordering::SeqCst));
        let root = self.ensure_root(&run, guid).await?;

        self.grow(&run, root.clone()).await;

        let report = run.report(root);
        info!(
            root = %report.root,
            visited = report.visited,
            fetched = report.fetched,
            failed = report.failed_branches,
            "build finished"
        );
        Ok(report)
    }

    async fn ensure_root(&self, run: &BuildRun, guid: &str) -> Result<PersonId, BuildError> {
        let existing = PersonId::from(guid);
        let stored = self.store.lock().contains(&existing);
        if stored {
            debug!(%guid, "root already in store");
            return Ok(existing);
        }
        let record = self
            .fetch_following_redirect(Operation::Profile {
                guid: guid.to_string(),
            })
            .await?;
        let (id, inserted) = self.insert_record(record, guid)?;
        if inserted {
            run.fetched.fetch_add(1, Ordering::Relaxed);
        }
        Ok(id)
    }

    fn grow<'a>(&'a self, run: &'a BuildRun, id: PersonId) -> Descent<'a> {
        Box::pin(async move {
            if self.is_cancelled(run) {
                return;
            }
            let first_visit = run.visited.lock().insert(id.clone());
            if !first_visit {
                return;
            }

            let (birth_year, needs_parents) = {
                let store = self.store.lock();
                match store.get(&id) {
                    Some(person) => (
                        person.birth_year(),
                        person.parents().is_none() && !person.has_known_parent(),
                    ),
                    None => return,
                }
            };
            if birth_year.is_some_and(|year| year < run.cutoff) {
                debug!(person = %id, ?birth_year, cutoff = run.cutoff, "below cutoff");
                return;
            }

            if needs_parents {
                if let Err(error) = self.resolve_parent_references(&id).await {
                    warn!(person = %id, %error, "could not resolve parents, abandoning branch");
                    run.failed.fetch_add(1, Ordering::Relaxed);
                    return;
                }
            }

            let references = self
                .store
                .lock()
                .get(&id)
                .and_then(|person| person.parents().map(<[String]>::to_vec))
                .unwrap_or_default();
            for reference in references {
                match self.resolve_parent(run, &reference).await {
                    Ok(parent) => self.link_parent(run, &id, &parent),
                    Err(error) => {
                        warn!(person = %id, %reference, %error, "parent fetch failed");
                        run.failed.fetch_add(1, Ordering::Relaxed);
                    }
                }
            }

            if self.is_cancelled(run) {
                return;
            }

            let (father, mother) = {
                let store = self.store.lock();
                match store.get(&id) {
                    Some(person) => (person.father().cloned(), person.mother().cloned()),
                    None => (None, None),
                }
            };
            let father_branch = async {
                if let Some(father) = father {
                    self.grow(run, father).await;
                }
            };
            let mother_branch = async {
                if let Some(mother) = mother {
                    self.grow(run, mother).await;
                }
            };
            tokio::join!(father_branch, mother_branch);
        })
    }

    /// Fetch the person's unions and record the parent references of the one
    /// listing them as a biological child. A reply without unions means no
    /// further ancestry and is not an error.
    async fn resolve_parent_references(&self, id: &PersonId) -> Result<(), BuildError> {
        let (ext_id, unions) = {
            let store = self.store.lock();
            match store.get(id) {
                Some(person) => (person.ext_id().map(str::to_string), person.unions()),
                None => return Ok(()),
            }
        };
        let Some(ext_id) = ext_id else {
            debug!(person = %id, "no alternate id, cannot match unions");
            return Ok(());
        };

        let parents = if unions.is_empty() {
            Vec::new()
        } else {
            let ids = unions
                .iter()
                .map(|union| union_number(union).to_string())
                .collect();
            let response = self.queue.run(Operation::Unions { ids }).await?;
            match union_list(&response) {
                Some(unions) => resolve_parents(&ext_id, &unions).unwrap_or_default(),
                None => {
                    debug!(person = %id, "union reply has no results");
                    return Ok(());
                }
            }
        };
        debug!(person = %id, parents = parents.len(), "parents resolved");

        if let Err(error) = self.store.lock().set_parents(id, parents) {
            warn!(person = %id, %error, "could not record parents");
        }
        Ok(())
    }

    /// Primary id for a parent reference, fetching the record unless it is
    /// already stored. Concurrent requests for the same alternate id share one
    /// fetch.
    async fn resolve_parent(&self, run: &BuildRun, reference: &str) -> Result<PersonId, BuildError> {
        let ext_id = isolate_id(reference).to_string();
        let stored = self.store.lock().id_for_ext_id(&ext_id);
        if let Some(id) = stored {
            return Ok(id);
        }

        let slot = {
            let mut in_flight = self.in_flight.lock();
            Arc::clone(in_flight.entry(ext_id.clone()).or_default())
        };
        let result = slot
            .get_or_init(|| async {
                // A fetch that finished between the lookup above and taking
                // the slot has already stored the record.
                let stored = self.store.lock().id_for_ext_id(&ext_id);
                if let Some(id) = stored {
                    return Ok(id);
                }
                let record = self
                    .fetch_following_redirect(Operation::ProfileByUrl {
                        url: reference.to_string(),
                    })
                    .await?;
                let (id, inserted) = self.insert_record(record, reference)?;
                if inserted {
                    run.fetched.fetch_add(1, Ordering::Relaxed);
                }
                self.store.lock().add_ext_alias(ext_id.clone(), &id);
                Ok::<_, BuildError>(id)
            })
            .await
            .clone();
        // Later lookups hit the store; failures are retried by the next build.
        self.release_slot(&ext_id, &slot);
        result
    }

    /// Forget `slot` unless a newer fetch for `ext_id` has replaced it.
    fn release_slot(&self, ext_id: &str, slot: &FetchSlot) {
        let mut in_flight = self.in_flight.lock();
        if in_flight
            .get(ext_id)
            .is_some_and(|current| Arc::ptr_eq(current, slot))
        {
            in_flight.remove(ext_id);
        }
    }

    /// Fetch a profile, following at most one merge redirect.
    async fn fetch_following_redirect(&self, operation: Operation) -> Result<Value, BuildError> {
        let reference = operation.opcode();
        let record = self.queue.run(operation).await?;
        let Some(target) = redirect_target(&record).map(str::to_string) else {
            return Ok(record);
        };

        debug!(%reference, %target, "following merge redirect");
        let record = self
            .queue
            .run(Operation::ProfileByUrl { url: target })
            .await?;
        if redirect_target(&record).is_some() {
            return Err(BuildError::RedirectLoop { reference });
        }
        Ok(record)
    }

    fn insert_record(&self, record: Value, reference: &str) -> Result<(PersonId, bool), BuildError> {
        let guid = record
            .get("guid")
            .and_then(Value::as_str)
            .map(PersonId::from)
            .ok_or_else(|| BuildError::NotFound {
                reference: reference.to_string(),
            })?;
        Ok(self.store.lock().insert_or_get_by_ext_id(guid, record))
    }

    /// Write `parent` as father or mother of `child` according to its gender.
    fn link_parent(&self, run: &BuildRun, child: &PersonId, parent: &PersonId) {
        let mut store = self.store.lock();
        let gender = store
            .get(parent)
            .map(|person| person.gender())
            .unwrap_or_default();
        let linked = match gender {
            Gender::Male => store.set_father(child, parent),
            Gender::Female => store.set_mother(child, parent),
            Gender::Unknown => {
                debug!(%child, %parent, "parent gender unknown, leaving unlinked");
                run.unlinked.fetch_add(1, Ordering::Relaxed);
                return;
            }
        };
        match linked {
            Ok(()) => {
                run.linked.fetch_add(1, Ordering::Relaxed);
            }
            Err(error) => warn!(%child, %parent, %error, "could not link parent"),
        }
    }
}
