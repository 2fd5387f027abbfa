//! Workspace-scoped event fan-out.
//!
//! Delivery is best effort: subscribers that lag are dropped by the
//! broadcast channel, and an event published with no subscribers is
//! simply discarded. Nothing in the system depends on a bus event
//! arriving; the durable record is always the database row plus the
//! audit log.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;

use conductor_core::domain::WorkspaceId;

const DEFAULT_CHANNEL_CAPACITY: usize = 256;

/// The stream's closed vocabulary. Item events cover every scoped
/// entity (agents, profiles, flows, compliance entries); the
/// `entity_type` field on the event says which one.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventKind {
    ItemCreated,
    ItemUpdated,
    ItemResolved,
    ApprovalCreated,
    ApprovalApproved,
    ApprovalRejected,
    RunUpdated,
    MessageUpdated,
    SlaBreached,
}

impl EventKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ItemCreated => "item.created",
            Self::ItemUpdated => "item.updated",
            Self::ItemResolved => "item.resolved",
            Self::ApprovalCreated => "approval.created",
            Self::ApprovalApproved => "approval.approved",
            Self::ApprovalRejected => "approval.rejected",
            Self::RunUpdated => "run.updated",
            Self::MessageUpdated => "message.updated",
            Self::SlaBreached => "sla.breached",
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusEvent {
    pub workspace_id: WorkspaceId,
    pub kind: EventKind,
    pub entity_type: String,
    pub entity_id: String,
    pub status: Option<String>,
    pub occurred_at: DateTime<Utc>,
}

impl BusEvent {
    pub fn new(
        workspace_id: WorkspaceId,
        kind: EventKind,
        entity_type: impl Into<String>,
        entity_id: impl Into<String>,
    ) -> Self {
        Self {
            workspace_id,
            kind,
            entity_type: entity_type.into(),
            entity_id: entity_id.into(),
            status: None,
            occurred_at: Utc::now(),
        }
    }

    pub fn with_status(mut self, status: impl Into<String>) -> Self {
        self.status = Some(status.into());
        self
    }
}

/// One broadcast channel per workspace, created lazily on first
/// subscribe or publish.
#[derive(Clone)]
pub struct EventBus {
    channels: Arc<Mutex<HashMap<String, broadcast::Sender<BusEvent>>>>,
    capacity: usize,
}

impl Default for EventBus {
    fn default() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }
}

impl EventBus {
    pub fn with_capacity(capacity: usize) -> Self {
        Self { channels: Arc::new(Mutex::new(HashMap::new())), capacity: capacity.max(1) }
    }

    pub fn subscribe(&self, workspace_id: &WorkspaceId) -> broadcast::Receiver<BusEvent> {
        self.sender_for(workspace_id).subscribe()
    }

    pub fn publish(&self, event: BusEvent) {
        let sender = self.sender_for(&event.workspace_id);
        let delivered = sender.send(event.clone()).unwrap_or(0);
        tracing::debug!(
            event_name = "bus.published",
            workspace_id = %event.workspace_id.0,
            kind = event.kind.as_str(),
            entity_id = %event.entity_id,
            delivered,
            "published workspace event"
        );
    }

    fn sender_for(&self, workspace_id: &WorkspaceId) -> broadcast::Sender<BusEvent> {
        let mut channels = self.channels.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        channels
            .entry(workspace_id.0.clone())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .clone()
    }
}

#[cfg(test)]
mod tests {
    use super::{BusEvent, EventBus, EventKind};
    use conductor_core::domain::WorkspaceId;

    fn ws(id: &str) -> WorkspaceId {
        WorkspaceId(id.to_string())
    }

    #[tokio::test]
    async fn subscribers_receive_events_for_their_workspace_only() {
        let bus = EventBus::default();
        let mut ws1_rx = bus.subscribe(&ws("ws-1"));
        let mut ws2_rx = bus.subscribe(&ws("ws-2"));

        bus.publish(BusEvent::new(ws("ws-1"), EventKind::RunUpdated, "run", "run-1"));

        let received = ws1_rx.recv().await.expect("ws-1 event");
        assert_eq!(received.kind, EventKind::RunUpdated);
        assert_eq!(received.entity_id, "run-1");

        assert!(ws2_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn publish_without_subscribers_is_silently_dropped() {
        let bus = EventBus::default();
        bus.publish(BusEvent::new(ws("ws-1"), EventKind::ApprovalCreated, "approval", "apr-1"));

        // A subscriber joining afterwards sees nothing.
        let mut rx = bus.subscribe(&ws("ws-1"));
        assert!(rx.try_recv().is_err());
    }

    #[test]
    fn stream_vocabulary_is_the_published_contract() {
        let expected = [
            (EventKind::ItemCreated, "item.created"),
            (EventKind::ItemUpdated, "item.updated"),
            (EventKind::ItemResolved, "item.resolved"),
            (EventKind::ApprovalCreated, "approval.created"),
            (EventKind::ApprovalApproved, "approval.approved"),
            (EventKind::ApprovalRejected, "approval.rejected"),
            (EventKind::RunUpdated, "run.updated"),
            (EventKind::MessageUpdated, "message.updated"),
            (EventKind::SlaBreached, "sla.breached"),
        ];
        for (kind, name) in expected {
            assert_eq!(kind.as_str(), name);
        }
    }

    #[tokio::test]
    async fn status_rides_along_with_the_event() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe(&ws("ws-1"));

        bus.publish(
            BusEvent::new(ws("ws-1"), EventKind::ApprovalApproved, "approval", "apr-1")
                .with_status("APPROVED"),
        );

        let received = rx.recv().await.expect("event");
        assert_eq!(received.status.as_deref(), Some("APPROVED"));
    }
}
