//! Local store boundary.
//!
//! The channel source never owns data. It consults the transform log, applies
//! transforms and evaluates queries through [`LocalStore`], and only ever does
//! so from the request queue worker.

use crate::{SourceError, SourceResult};
use async_trait::async_trait;
use channel_protocol_types::{Query, QueryExpression, Record, RecordIdentity, RecordOperation, Transform};
use serde_json::Value;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::debug;

/// The data authority a channel source proxies requests into.
#[async_trait]
pub trait LocalStore: Send + Sync {
    /// Whether the transform log already records this transform ID.
    async fn contains_transform(&self, id: &str) -> bool;

    /// Apply a transform and record it in the transform log.
    ///
    /// Must be atomic: on error nothing is applied and nothing is logged.
    async fn apply(&self, transform: &Transform) -> SourceResult<Option<Value>>;

    /// Evaluate a query.
    async fn evaluate(&self, query: &Query) -> SourceResult<Value>;
}

#[derive(Default)]
struct MemoryState {
    records: HashMap<RecordIdentity, Record>,
    transform_log: Vec<String>,
    logged: HashSet<String>,
}

/// In-memory reference store.
///
/// Also tracks how many calls are inside the store at once, so tests can
/// assert that access was serialized.
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
    applied: AtomicUsize,
    in_flight: AtomicUsize,
    overlap_detected: AtomicBool,
    access_delay: Option<Duration>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every store call take at least `delay`.
    pub fn with_access_delay(delay: Duration) -> Self {
        Self {
            access_delay: Some(delay),
            ..Self::default()
        }
    }

    /// Record a transform ID as applied without running its operations.
    pub async fn mark_applied(&self, id: &str) {
        let mut state = self.state.lock().await;
        if state.logged.insert(id.to_string()) {
            state.transform_log.push(id.to_string());
        }
    }

    /// Transform IDs in the order they were applied.
    pub async fn transform_log(&self) -> Vec<String> {
        self.state.lock().await.transform_log.clone()
    }

    pub async fn record(&self, identity: &RecordIdentity) -> Option<Record> {
        self.state.lock().await.records.get(identity).cloned()
    }

    pub async fn record_count(&self) -> usize {
        self.state.lock().await.records.len()
    }

    /// Number of transforms applied through [`LocalStore::apply`].
    pub fn applied_count(&self) -> usize {
        self.applied.load(Ordering::SeqCst)
    }

    /// Whether two store calls were ever in progress at the same time.
    pub fn overlap_detected(&self) -> bool {
        self.overlap_detected.load(Ordering::SeqCst)
    }

    async fn enter(&self) {
        if self.in_flight.fetch_add(1, Ordering::SeqCst) > 0 {
            self.overlap_detected.store(true, Ordering::SeqCst);
        }
        if let Some(delay) = self.access_delay {
            tokio::time::sleep(delay).await;
        }
    }

    fn leave(&self) {
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
    }

    fn apply_operation(
        records: &mut HashMap<RecordIdentity, Record>,
        operation: &RecordOperation,
    ) -> SourceResult<()> {
        match operation {
            RecordOperation::AddRecord { record } => {
                let identity = record.identity();
                if records.contains_key(&identity) {
                    return Err(SourceError::Conflict(format!(
                        "record already exists: {}:{}",
                        identity.record_type, identity.id
                    )));
                }
                records.insert(identity, record.clone());
            }
            RecordOperation::UpdateRecord { record } => {
                let existing = records
                    .get_mut(&record.identity())
                    .ok_or_else(|| not_found(&record.identity()))?;
                for (name, value) in &record.attributes {
                    existing.attributes.insert(name.clone(), value.clone());
                }
            }
            RecordOperation::RemoveRecord { record } => {
                records.remove(record).ok_or_else(|| not_found(record))?;
            }
            RecordOperation::ReplaceAttribute {
                record,
                attribute,
                value,
            } => {
                let existing = records.get_mut(record).ok_or_else(|| not_found(record))?;
                existing.attributes.insert(attribute.clone(), value.clone());
            }
        }
        Ok(())
    }
}

fn not_found(identity: &RecordIdentity) -> SourceError {
    SourceError::NotFound(format!("{}:{}", identity.record_type, identity.id))
}

#[async_trait]
impl LocalStore for MemoryStore {
    async fn contains_transform(&self, id: &str) -> bool {
        self.state.lock().await.logged.contains(id)
    }

    async fn apply(&self, transform: &Transform) -> SourceResult<Option<Value>> {
        self.enter().await;
        let result: SourceResult<Option<Value>> = async {
            let mut state = self.state.lock().await;
            let mut staged = state.records.clone();
            for operation in &transform.operations {
                Self::apply_operation(&mut staged, operation)?;
            }
            state.records = staged;
            if state.logged.insert(transform.id.clone()) {
                state.transform_log.push(transform.id.clone());
            }
            Ok(None)
        }
        .await;
        self.leave();

        if result.is_ok() {
            self.applied.fetch_add(1, Ordering::SeqCst);
            debug!(transform_id = %transform.id, "Applied transform to memory store");
        }
        result
    }

    async fn evaluate(&self, query: &Query) -> SourceResult<Value> {
        self.enter().await;
        let result: SourceResult<Value> = async {
            let state = self.state.lock().await;
            match &query.expression {
                QueryExpression::FindRecord { record } => {
                    let found = state.records.get(record).ok_or_else(|| not_found(record))?;
                    Ok(serde_json::to_value(found)?)
                }
                QueryExpression::FindRecords { record_type } => {
                    let mut matches: Vec<&Record> = state
                        .records
                        .values()
                        .filter(|r| &r.record_type == record_type)
                        .collect();
                    matches.sort_by(|a, b| a.id.cmp(&b.id));
                    Ok(serde_json::to_value(matches)?)
                }
            }
        }
        .await;
        self.leave();
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn add(id: &str, name: &str) -> RecordOperation {
        RecordOperation::AddRecord {
            record: Record::new("planet", id).with_attribute("name", json!(name)),
        }
    }

    #[tokio::test]
    async fn apply_records_transform_in_log() {
        let store = MemoryStore::new();
        let transform = Transform::with_id("t1", vec![add("earth", "Earth")]);

        let result = store.apply(&transform).await.unwrap();

        assert!(result.is_none());
        assert!(store.contains_transform("t1").await);
        assert_eq!(store.transform_log().await, vec!["t1"]);
        assert_eq!(store.applied_count(), 1);
    }

    #[tokio::test]
    async fn failed_transform_is_atomic() {
        let store = MemoryStore::new();
        let transform = Transform::with_id(
            "t1",
            vec![
                add("earth", "Earth"),
                RecordOperation::RemoveRecord {
                    record: RecordIdentity::new("planet", "pluto"),
                },
            ],
        );

        let err = store.apply(&transform).await.unwrap_err();

        assert!(matches!(err, SourceError::NotFound(_)));
        assert_eq!(store.record_count().await, 0);
        assert!(!store.contains_transform("t1").await);
        assert_eq!(store.applied_count(), 0);
    }

    #[tokio::test]
    async fn duplicate_add_conflicts() {
        let store = MemoryStore::new();
        store
            .apply(&Transform::new(vec![add("earth", "Earth")]))
            .await
            .unwrap();

        let err = store
            .apply(&Transform::new(vec![add("earth", "Terra")]))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::Conflict(_)));
    }

    #[tokio::test]
    async fn update_and_replace_attribute() {
        let store = MemoryStore::new();
        let identity = RecordIdentity::new("planet", "earth");
        store
            .apply(&Transform::new(vec![
                add("earth", "Earth"),
                RecordOperation::UpdateRecord {
                    record: Record::new("planet", "earth").with_attribute("moons", json!(1)),
                },
                RecordOperation::ReplaceAttribute {
                    record: identity.clone(),
                    attribute: "name".into(),
                    value: json!("Terra"),
                },
            ]))
            .await
            .unwrap();

        let record = store.record(&identity).await.unwrap();
        assert_eq!(record.attributes["name"], json!("Terra"));
        assert_eq!(record.attributes["moons"], json!(1));
    }

    #[tokio::test]
    async fn evaluate_find_records_sorted_by_id() {
        let store = MemoryStore::new();
        store
            .apply(&Transform::new(vec![add("venus", "Venus"), add("mars", "Mars")]))
            .await
            .unwrap();

        let value = store
            .evaluate(&Query::new(QueryExpression::FindRecords {
                record_type: "planet".into(),
            }))
            .await
            .unwrap();

        let ids: Vec<&str> = value
            .as_array()
            .unwrap()
            .iter()
            .map(|r| r["id"].as_str().unwrap())
            .collect();
        assert_eq!(ids, vec!["mars", "venus"]);
    }

    #[tokio::test]
    async fn evaluate_missing_record_is_not_found() {
        let store = MemoryStore::new();
        let err = store
            .evaluate(&Query::new(QueryExpression::FindRecord {
                record: RecordIdentity::new("planet", "pluto"),
            }))
            .await
            .unwrap_err();
        assert!(matches!(err, SourceError::NotFound(_)));
    }

    #[tokio::test]
    async fn mark_applied_is_idempotent() {
        let store = MemoryStore::new();
        store.mark_applied("t2").await;
        store.mark_applied("t2").await;

        assert!(store.contains_transform("t2").await);
        assert_eq!(store.transform_log().await.len(), 1);
        assert_eq!(store.applied_count(), 0);
    }
}
