//! Matching a stranded driver to one workshop and running the request to completion.
//!
//! Creation passes the admission gate, snapshots ranked candidates and notifies them; the
//! first candidate to accept wins through a status-guarded write; afterwards the requester
//! and the assigned workshop drive status and chat, with every change fanned out to
//! subscribed channels.

pub mod admission;
pub mod audit;
pub mod chat;
pub mod domain;
pub mod error;
pub mod fanout;
pub mod matching;
pub mod memory;
pub mod repository;
pub mod router;
pub mod service;

#[cfg(test)]
mod tests;

pub use admission::{AdmissionController, QuotaDenial};
pub use audit::{AuditAction, AuditEntry, AuditMeta, AuditTrail};
pub use chat::{ChatOverlay, ChatPage, HistoryCursor};
pub use domain::{
    ChatMessage, GeoPoint, IssueCategory, Location, MechanicDetails, Membership, MembershipPlan,
    NewServiceRequest, Page, PaymentMode, PricingEstimate, Principal, Provider, ProviderId,
    ProviderSubscription, ProviderSummary, QueuedRequest, Rating, RequestId, RequestStatus,
    Requester, RequesterId, SenderRole, ServiceRequest, StatusChange, SubscriptionStatus, Vehicle,
    VehicleClass, VehicleId,
};
pub use error::DispatchError;
pub use fanout::{ChannelKey, DispatchEvent, Notification, NotificationError, NotificationPublisher};
pub use matching::{haversine_km, Candidate, CandidateSelector, MatchingConfig};
pub use memory::{BroadcastHub, InMemoryStore};
pub use repository::{
    ChatAppend, ChatLog, DispatchStore, GuardedWrite, MembershipLedger, ProviderDirectory,
    RepositoryError, RequestRepository, VehicleRegistry,
};
pub use router::{dispatch_router, DispatchApi};
pub use service::{AcceptRequest, CreatedRequest, DispatchCoordinator};
