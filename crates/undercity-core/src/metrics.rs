//! Metrics — append-only `metrics.jsonl`, one line per recorded event.
//!
//! Grounded on the State Store's `append_line` primitive
//! (`crate::store::StateStore`), which already gives this the right
//! durability story: never rewritten, only ever grown.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ids::TaskId;
use crate::store::{StateStore, StoreError};

const METRICS_FILE: &str = "metrics.jsonl";

/// One recorded event in the metrics stream.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct MetricsRecord {
    pub timestamp: DateTime<Utc>,
    pub task_id: TaskId,
    pub event: MetricsEvent,
}

/// The kinds of events worth recording for later analysis.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum MetricsEvent {
    TaskStarted { tier: String },
    AttemptFailed { category: String },
    TaskCompleted { attempts: u32 },
    Merged,
    MergeExhausted,
}

pub struct MetricsWriter<'a> {
    store: &'a StateStore,
}

impl<'a> MetricsWriter<'a> {
    pub fn new(store: &'a StateStore) -> Self {
        Self { store }
    }

    pub fn record(&self, task_id: TaskId, event: MetricsEvent) -> Result<(), StoreError> {
        let record = MetricsRecord {
            timestamp: Utc::now(),
            task_id,
            event,
        };
        let line = serde_json::to_string(&record).map_err(StoreError::Serialize)?;
        self.store.append_line(METRICS_FILE, &line)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn records_append_as_jsonl_lines() {
        let tmp = tempfile::tempdir().unwrap();
        let store = StateStore::new(tmp.path().to_path_buf()).unwrap();
        let writer = MetricsWriter::new(&store);
        writer
            .record(
                TaskId::new("t1").unwrap(),
                MetricsEvent::TaskStarted { tier: "cheap".to_owned() },
            )
            .unwrap();
        writer
            .record(TaskId::new("t1").unwrap(), MetricsEvent::Merged)
            .unwrap();

        let contents = std::fs::read_to_string(tmp.path().join(METRICS_FILE)).unwrap();
        assert_eq!(contents.lines().count(), 2);
        assert!(contents.contains("task_started"));
        assert!(contents.contains("merged"));
    }
}
