use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use super::domain::{Principal, ProviderId, RequestId, RequestStatus};
use super::repository::RepositoryError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AuditAction {
    Create,
    Update,
    StatusChange,
}

/// Structured detail attached to an audit entry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AuditMeta {
    RequestCreated {
        notified_providers: usize,
    },
    Assigned {
        provider: ProviderId,
    },
    StatusChanged {
        from: RequestStatus,
        to: RequestStatus,
    },
    /// Free-form key/value pairs with no schema. Only for data none of the variants above
    /// describe.
    Unclassified {
        fields: BTreeMap<String, String>,
    },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub entity: RequestId,
    pub action: AuditAction,
    pub performed_by: Principal,
    pub meta: AuditMeta,
    pub at: DateTime<Utc>,
}

impl AuditEntry {
    pub fn new(
        entity: RequestId,
        action: AuditAction,
        performed_by: Principal,
        meta: AuditMeta,
        at: DateTime<Utc>,
    ) -> Self {
        Self {
            entity,
            action,
            performed_by,
            meta,
            at,
        }
    }
}

pub trait AuditTrail: Send + Sync {
    fn record(&self, entry: AuditEntry) -> Result<(), RepositoryError>;
}

/// Audit writes never fail the operation that produced them.
pub(crate) fn record_quietly<A>(trail: &A, entry: AuditEntry)
where
    A: AuditTrail + ?Sized,
{
    let entity = entry.entity.clone();
    if let Err(err) = trail.record(entry) {
        warn!(request = %entity, error = %err, "failed to write audit entry");
    }
}
