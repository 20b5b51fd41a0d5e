//! Snapshot: the schema-versioned unit of persistence.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::TaskRecord;

/// Current on-disk format.
pub const SCHEMA_VERSION: u32 = 1;

/// Full task list at one point in time.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub schema_version: u32,

    /// Monotonic per process lifetime; the store never writes an older
    /// revision over a newer one.
    #[serde(default)]
    pub revision: u64,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub saved_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub tasks: Vec<TaskRecord>,
}

impl Snapshot {
    pub fn new(revision: u64, tasks: Vec<TaskRecord>) -> Self {
        Self {
            schema_version: SCHEMA_VERSION,
            revision,
            saved_at: None,
            tasks,
        }
    }

    pub fn empty() -> Self {
        Self::new(0, Vec::new())
    }

    /// Decode any supported format.
    ///
    /// - version 1: `{ "schema_version": 1, "revision": .., "tasks": [..] }`
    /// - version 0 / absent: either a bare task array or `{ "tasks": [..] }`
    ///
    /// An unknown version is read as the oldest supported format.
    pub fn decode(bytes: &[u8]) -> Result<Self, serde_json::Error> {
        let value: serde_json::Value = serde_json::from_slice(bytes)?;
        let version = value
            .get("schema_version")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        match version {
            v if v == u64::from(SCHEMA_VERSION) => serde_json::from_value(value),
            0 => Self::from_legacy(value),
            other => {
                tracing::warn!(
                    schema_version = other,
                    "unknown snapshot schema version; reading as legacy format"
                );
                Self::from_legacy(value)
            }
        }
    }

    fn from_legacy(value: serde_json::Value) -> Result<Self, serde_json::Error> {
        let tasks_value = match value {
            serde_json::Value::Array(_) => value,
            serde_json::Value::Object(mut map) => map
                .remove("tasks")
                .unwrap_or(serde_json::Value::Array(Vec::new())),
            other => other,
        };
        let tasks: Vec<TaskRecord> = serde_json::from_value(tasks_value)?;
        Ok(Self::new(0, tasks))
    }

    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        serde_json::to_vec_pretty(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{AgentBackend, TaskId, TaskSpec, TaskStatus};
    use ulid::Ulid;

    fn task() -> TaskRecord {
        TaskRecord::new(
            TaskId::from_ulid(Ulid::new()),
            TaskSpec::new("t", "p", "/tmp", AgentBackend::Claude),
            3,
            Utc::now(),
        )
    }

    #[test]
    fn current_version_roundtrips() {
        let snap = Snapshot::new(4, vec![task(), task()]);
        let back = Snapshot::decode(&snap.encode().unwrap()).unwrap();
        assert_eq!(back, snap);
    }

    #[test]
    fn legacy_bare_array_loads() {
        let t = task();
        let bytes = serde_json::to_vec(&vec![t.clone()]).unwrap();
        let snap = Snapshot::decode(&bytes).unwrap();
        assert_eq!(snap.schema_version, SCHEMA_VERSION);
        assert_eq!(snap.tasks, vec![t]);
    }

    #[test]
    fn legacy_object_without_version_loads() {
        let json = format!(
            r#"{{"tasks":[{{"id":"{}","title":"old","prompt":"p","working_dir":"/tmp","backend":"codex","status":"failed","created_at":"2025-06-01T00:00:00Z"}}]}}"#,
            Ulid::new()
        );
        let snap = Snapshot::decode(json.as_bytes()).unwrap();
        assert_eq!(snap.tasks.len(), 1);
        let t = &snap.tasks[0];
        assert_eq!(t.status, TaskStatus::Failed);
        assert_eq!(t.retry_count, 0);
        assert_eq!(t.max_retries, 3);
    }

    #[test]
    fn garbage_is_an_error() {
        assert!(Snapshot::decode(b"{not json").is_err());
        assert!(Snapshot::decode(br#"{"schema_version":1,"tasks":"nope"}"#).is_err());
    }
}
