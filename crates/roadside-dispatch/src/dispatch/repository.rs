use chrono::{DateTime, Utc};

use super::audit::AuditTrail;
use super::domain::{
    ChatDraft, ChatMessage, Provider, ProviderId, RequestId, RequestStatus, RequestUpdate,
    Requester, RequesterId, ServiceRequest, Vehicle, VehicleId, VehicleClass,
};

/// Result of a status-guarded write.
#[derive(Debug, Clone, PartialEq)]
pub enum GuardedWrite {
    Applied(ServiceRequest),
    /// The stored status did not match the expected pre-image; nothing was written.
    StatusMismatch(RequestStatus),
}

/// Durable home of service requests. Implementations must make `update_if_status` a single
/// conditional write so the guard holds across independent processes.
pub trait RequestRepository: Send + Sync {
    fn insert(&self, request: ServiceRequest) -> Result<ServiceRequest, RepositoryError>;
    fn fetch(&self, id: &RequestId) -> Result<Option<ServiceRequest>, RepositoryError>;
    fn update_if_status(
        &self,
        id: &RequestId,
        expected: RequestStatus,
        update: &RequestUpdate,
        now: DateTime<Utc>,
    ) -> Result<GuardedWrite, RepositoryError>;
    /// Newest first. Returns the requested slice and the total match count.
    fn for_requester(
        &self,
        requester: &RequesterId,
        status: Option<RequestStatus>,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<ServiceRequest>, usize), RepositoryError>;
    /// Pending requests that listed `provider` as a candidate, newest first.
    fn pending_for_candidate(
        &self,
        provider: &ProviderId,
        limit: usize,
    ) -> Result<Vec<ServiceRequest>, RepositoryError>;
    /// Requests assigned to `provider` in `status`, newest first.
    fn assigned_to(
        &self,
        provider: &ProviderId,
        status: RequestStatus,
        limit: usize,
    ) -> Result<Vec<ServiceRequest>, RepositoryError>;
}

/// Requester accounts and their membership counters.
pub trait MembershipLedger: Send + Sync {
    fn requester(&self, id: &RequesterId) -> Result<Option<Requester>, RepositoryError>;
    /// Increment `requests_used` only while it is below `limit`, as one conditional write.
    /// Returns the new count, or `None` when the counter had already reached `limit`.
    fn increment_requests_below(
        &self,
        id: &RequesterId,
        limit: u32,
    ) -> Result<Option<u32>, RepositoryError>;
    /// Hand back one consumed request. The counter never drops below zero.
    fn release_request(&self, id: &RequesterId) -> Result<(), RepositoryError>;
}

pub trait ProviderDirectory: Send + Sync {
    fn provider(&self, id: &ProviderId) -> Result<Option<Provider>, RepositoryError>;
    /// Online providers, narrowed to `class` when given. Callers re-check eligibility.
    fn online_providers(
        &self,
        class: Option<VehicleClass>,
    ) -> Result<Vec<Provider>, RepositoryError>;
}

pub trait VehicleRegistry: Send + Sync {
    fn vehicle(&self, id: &VehicleId) -> Result<Option<Vehicle>, RepositoryError>;
}

/// Result of appending to a request's chat log.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChatAppend {
    Appended(ChatMessage),
    /// The request was cancelled by the time the write ran; nothing was stored.
    RequestCancelled,
}

/// Append-only per-request message log.
pub trait ChatLog: Send + Sync {
    /// Assigns the next sequence number for `request` and stores the message. The request's
    /// status is checked in the same write, so a cancelled request never gains messages.
    fn append(&self, request: &RequestId, draft: ChatDraft) -> Result<ChatAppend, RepositoryError>;
    /// Messages with a sequence strictly greater than `after`, oldest first.
    fn messages(
        &self,
        request: &RequestId,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, RepositoryError>;
}

/// Everything the coordinator and chat overlay need from storage.
pub trait DispatchStore:
    RequestRepository + MembershipLedger + ProviderDirectory + VehicleRegistry + ChatLog + AuditTrail
{
}

impl<T> DispatchStore for T where
    T: RequestRepository
        + MembershipLedger
        + ProviderDirectory
        + VehicleRegistry
        + ChatLog
        + AuditTrail
{
}

/// Error enumeration for repository failures.
#[derive(Debug, thiserror::Error)]
pub enum RepositoryError {
    #[error("record already exists")]
    Conflict,
    #[error("record not found")]
    NotFound,
    #[error("repository unavailable: {0}")]
    Unavailable(String),
}
