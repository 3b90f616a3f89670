use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::sync::Mutex;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EventKind {
    StatusChanged,
    VariableSet,
    LogError,
    WorkflowCompleted,
}

/// Lifecycle states reported through `STATUS_CHANGED` events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Succeeded,
    Failed,
    Cancelled,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DebugEvent {
    #[serde(rename = "type")]
    pub kind: EventKind,
    pub timestamp: DateTime<Utc>,
    pub data: Value,
}

impl DebugEvent {
    pub fn new(kind: EventKind, data: Value) -> Self {
        Self {
            kind,
            timestamp: Utc::now(),
            data,
        }
    }
}

/// Receives debug events from a running workflow.
pub trait EventSink: Send + Sync {
    fn emit(&self, event: DebugEvent);
}

/// Collects events in memory, in emission order.
#[derive(Debug, Default)]
pub struct MemorySink {
    events: Mutex<Vec<DebugEvent>>,
}

impl MemorySink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<DebugEvent> {
        self.events.lock().map(|e| e.clone()).unwrap_or_else(|e| e.into_inner().clone())
    }

    pub fn of_kind(&self, kind: EventKind) -> Vec<DebugEvent> {
        self.events().into_iter().filter(|e| e.kind == kind).collect()
    }

    pub fn clear(&self) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).clear();
    }
}

impl EventSink for MemorySink {
    fn emit(&self, event: DebugEvent) {
        self.events.lock().unwrap_or_else(|e| e.into_inner()).push(event);
    }
}

/// Forwards events to the `tracing` subscriber at debug level.
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingSink;

impl EventSink for TracingSink {
    fn emit(&self, event: DebugEvent) {
        tracing::debug!(kind = ?event.kind, timestamp = %event.timestamp, data = %event.data, "workflow event");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn event_kind_serializes_as_type() {
        let event = DebugEvent::new(EventKind::VariableSet, json!({ "instance": "d" }));
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], json!("VARIABLE_SET"));
        assert!(value.get("kind").is_none());

        let restored: DebugEvent = serde_json::from_value(value).unwrap();
        assert_eq!(restored, event);
    }
}
