//! In-memory stand-in for the genealogy service, plus a clock that never
//! waits.

#![allow(dead_code)]

use async_trait::async_trait;
use forebear::config::{BuilderConfig, QueueConfig};
use forebear::queue::Clock;
use forebear::source::API_PREFIX;
use forebear::{FetchError, FetchSource, PersonStore, RequestQueue, SharedStore, TreeBuilder};
use parking_lot::Mutex;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Notify;

pub fn api(ext_id: &str) -> String {
    format!("{API_PREFIX}{ext_id}")
}

pub fn ext(guid: &str) -> String {
    format!("profile-{guid}")
}

/// Paused operation: `reached` fires when it starts, `release` lets it finish.
pub struct Pause {
    pub opcode: String,
    pub reached: Arc<Notify>,
    pub release: Arc<Notify>,
}

/// Fake service answering profile and union operations from fixtures.
///
/// Profiles are registered under both `/profile-g{guid}` and `/profile-{guid}`.
#[derive(Default)]
pub struct FakeGeni {
    records: Mutex<HashMap<String, Value>>,
    unions: Mutex<HashMap<String, Value>>,
    throttles: Mutex<HashMap<String, u32>>,
    failures: Mutex<HashMap<String, Value>>,
    pause: Mutex<Option<Pause>>,
    calls: Mutex<Vec<String>>,
}

impl FakeGeni {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a person. `gender` may be empty for an unknown gender.
    pub fn person(&self, guid: &str, name: &str, gender: &str, birth: Option<i32>, unions: &[&str]) {
        let mut record = json!({
            "guid": guid,
            "id": ext(guid),
            "name": name,
            "unions": unions.iter().map(|u| api(&format!("union-{u}"))).collect::<Vec<_>>(),
        });
        if !gender.is_empty() {
            record["gender"] = json!(gender);
        }
        if let Some(year) = birth {
            record["birth"] = json!({"date": {"year": year}});
        }
        let mut records = self.records.lock();
        records.insert(format!("/profile-g{guid}"), record.clone());
        records.insert(format!("/{}", ext(guid)), record);
    }

    /// Register union `number` between `partners`, with biological `children`
    /// (all given as guids).
    pub fn union(&self, number: &str, partners: &[&str], children: &[&str]) {
        let refs = |guids: &[&str]| guids.iter().map(|g| api(&ext(g))).collect::<Vec<_>>();
        self.unions.lock().insert(
            number.to_string(),
            json!({
                "id": format!("union-{number}"),
                "partners": refs(partners),
                "children": refs(children),
            }),
        );
    }

    /// Make `/profile-{from}` answer with a merge redirect to `to`.
    pub fn redirect(&self, from: &str, to: &str) {
        self.records
            .lock()
            .insert(format!("/{}", ext(from)), json!({"merged_into": api(&ext(to))}));
    }

    /// Throttle `opcode` `times` times before answering.
    pub fn throttle(&self, opcode: &str, times: u32) {
        self.throttles.lock().insert(opcode.to_string(), times);
    }

    pub fn fail(&self, opcode: &str) {
        self.failures
            .lock()
            .insert(opcode.to_string(), json!({"type": "ApiException", "message": "boom"}));
    }

    /// Hold the next execution of `opcode` until released.
    pub fn pause_on(&self, opcode: &str) -> (Arc<Notify>, Arc<Notify>) {
        let reached = Arc::new(Notify::new());
        let release = Arc::new(Notify::new());
        *self.pause.lock() = Some(Pause {
            opcode: opcode.to_string(),
            reached: Arc::clone(&reached),
            release: Arc::clone(&release),
        });
        (reached, release)
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.lock().clone()
    }

    pub fn count(&self, opcode: &str) -> usize {
        self.calls.lock().iter().filter(|call| *call == opcode).count()
    }

    fn take_pause(&self, opcode: &str) -> Option<Pause> {
        let mut pause = self.pause.lock();
        if pause.as_ref().is_some_and(|p| p.opcode == opcode) {
            pause.take()
        } else {
            None
        }
    }
}

#[async_trait]
impl FetchSource for FakeGeni {
    async fn execute(&self, opcode: &str, args: Value) -> Result<Value, FetchError> {
        self.calls.lock().push(opcode.to_string());

        if let Some(pause) = self.take_pause(opcode) {
            pause.reached.notify_one();
            pause.release.notified().await;
        }
        if let Some(detail) = self.failures.lock().get(opcode) {
            return Err(FetchError::other(detail.clone()));
        }
        {
            let mut throttles = self.throttles.lock();
            if let Some(remaining) = throttles.get_mut(opcode).filter(|r| **r > 0) {
                *remaining -= 1;
                return Err(FetchError::RateLimited);
            }
        }

        if opcode == "/union" {
            let unions = self.unions.lock();
            let results: Vec<Value> = args["ids"]
                .as_array()
                .into_iter()
                .flatten()
                .filter_map(Value::as_str)
                .filter_map(|id| unions.get(id).cloned())
                .collect();
            return Ok(json!({ "results": results }));
        }
        self.records
            .lock()
            .get(opcode)
            .cloned()
            .ok_or_else(|| FetchError::other(json!({"message": format!("{opcode} not found")})))
    }
}

/// Clock that returns immediately and counts ticks.
#[derive(Default)]
pub struct ImmediateClock {
    ticks: AtomicUsize,
}

impl ImmediateClock {
    pub fn ticks(&self) -> usize {
        self.ticks.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Clock for ImmediateClock {
    async fn sleep(&self, _duration: Duration) {
        self.ticks.fetch_add(1, Ordering::SeqCst);
        tokio::task::yield_now().await;
    }
}

pub struct Harness {
    pub fake: Arc<FakeGeni>,
    pub clock: Arc<ImmediateClock>,
    pub store: SharedStore,
    pub builder: Arc<TreeBuilder>,
}

/// Wire a builder to `fake` with the given cutoff.
pub fn harness(fake: Arc<FakeGeni>, cutoff: i32) -> Harness {
    let clock = Arc::new(ImmediateClock::default());
    let queue = RequestQueue::new(
        Arc::clone(&fake) as Arc<dyn FetchSource>,
        Arc::clone(&clock) as Arc<dyn Clock>,
        QueueConfig::default(),
    );
    let store = PersonStore::new().shared();
    let builder = Arc::new(TreeBuilder::new(
        Arc::clone(&store),
        queue,
        BuilderConfig {
            birth_year_cutoff: cutoff,
        },
    ));
    Harness {
        fake,
        clock,
        store,
        builder,
    }
}

/// Root 1 (1950), parents 2 (male, 1920) and 3 (female, 1922); 2's parents
/// are 4 (male, 1890) and 5 (female, 1892).
pub fn three_generations() -> Arc<FakeGeni> {
    let fake = FakeGeni::new();
    fake.person("1", "Erik", "male", Some(1950), &["10"]);
    fake.person("2", "Nils", "male", Some(1920), &["10", "20"]);
    fake.person("3", "Karin", "female", Some(1922), &["10"]);
    fake.person("4", "Anders", "male", Some(1890), &["20"]);
    fake.person("5", "Brita", "female", Some(1892), &["20"]);
    fake.union("10", &["2", "3"], &["1"]);
    fake.union("20", &["4", "5"], &["2"]);
    fake
}
