use serde_json::Value;
use uuid::Uuid;

use huddle_shared::types::request::RequestMeta;

use crate::models::{AuditAction, AuditTargetKind, NewAuditEntry};
use crate::store::ChatStore;

/// What an audit entry is about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditTarget {
    Room(Uuid),
    Message(Uuid),
    Report(Uuid),
    BlockedIp(Uuid),
}

impl AuditTarget {
    pub fn kind(&self) -> AuditTargetKind {
        match self {
            AuditTarget::Room(_) => AuditTargetKind::Room,
            AuditTarget::Message(_) => AuditTargetKind::Message,
            AuditTarget::Report(_) => AuditTargetKind::Report,
            AuditTarget::BlockedIp(_) => AuditTargetKind::BlockedIp,
        }
    }

    pub fn id(&self) -> Uuid {
        match self {
            AuditTarget::Room(id)
            | AuditTarget::Message(id)
            | AuditTarget::Report(id)
            | AuditTarget::BlockedIp(id) => *id,
        }
    }
}

#[derive(Debug, Clone)]
pub struct AuditEvent {
    pub action: AuditAction,
    pub target: Option<AuditTarget>,
    pub old_values: Option<Value>,
    pub new_values: Option<Value>,
}

impl AuditEvent {
    pub fn new(action: AuditAction) -> Self {
        Self {
            action,
            target: None,
            old_values: None,
            new_values: None,
        }
    }

    pub fn on(mut self, target: AuditTarget) -> Self {
        self.target = Some(target);
        self
    }

    pub fn old_values(mut self, values: Value) -> Self {
        self.old_values = Some(values);
        self
    }

    pub fn new_values(mut self, values: Value) -> Self {
        self.new_values = Some(values);
        self
    }
}

/// Append an audit entry. Only called once the audited mutation has succeeded;
/// a failed write is logged and swallowed.
pub fn record(store: &dyn ChatStore, actor: Uuid, meta: &RequestMeta, event: AuditEvent) {
    let action = event.action;
    let entry = NewAuditEntry {
        user_id: Some(actor),
        action,
        target_type: event.target.map(|t| t.kind()),
        target_id: event.target.map(|t| t.id()),
        old_values: event.old_values,
        new_values: event.new_values,
        ip_address: meta.ip.clone(),
        user_agent: meta.user_agent.clone(),
    };

    if let Err(e) = store.insert_audit(entry) {
        tracing::error!(error = %e, action = %action, actor = %actor, "failed to write audit entry");
    }
}
