use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::domain::{
    ChatMessage, MechanicDetails, PricingEstimate, ProviderId, ProviderSummary, RequestId,
    RequestStatus, RequesterId, ServiceRequest,
};

/// Addressable real-time channel.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ChannelKey {
    /// Status, chat and tracking events for one request.
    Request(RequestId),
    /// Acceptance notices for a requester.
    Requester(RequesterId),
    /// New-request notices for a provider.
    Provider(ProviderId),
}

impl fmt::Display for ChannelKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ChannelKey::Request(id) => write!(f, "request:{id}"),
            ChannelKey::Requester(id) => write!(f, "requester:{id}"),
            ChannelKey::Provider(id) => write!(f, "provider:{id}"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "event", content = "payload", rename_all = "snake_case")]
pub enum DispatchEvent {
    NewRequest {
        request: ServiceRequest,
        distance_km: f64,
    },
    RequestAccepted {
        request_id: RequestId,
        provider: ProviderSummary,
        mechanic: Option<MechanicDetails>,
        eta: Option<DateTime<Utc>>,
    },
    RequestStatusUpdated {
        request_id: RequestId,
        status: RequestStatus,
        eta: Option<DateTime<Utc>>,
        pricing_estimate: Option<PricingEstimate>,
    },
    ReceiveMessage {
        request_id: RequestId,
        message: ChatMessage,
    },
    ProviderLocationUpdate {
        request_id: RequestId,
        provider_id: ProviderId,
        lat: f64,
        lng: f64,
        timestamp: DateTime<Utc>,
    },
}

impl DispatchEvent {
    pub fn name(&self) -> &'static str {
        match self {
            DispatchEvent::NewRequest { .. } => "new_request",
            DispatchEvent::RequestAccepted { .. } => "request_accepted",
            DispatchEvent::RequestStatusUpdated { .. } => "request_status_updated",
            DispatchEvent::ReceiveMessage { .. } => "receive_message",
            DispatchEvent::ProviderLocationUpdate { .. } => "provider_location_update",
        }
    }
}

/// Event as seen by a subscriber.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Notification {
    pub channel: String,
    #[serde(flatten)]
    pub event: DispatchEvent,
}

/// Best-effort, at-least-once delivery to whoever is listening on a channel right now.
/// There is no replay: a listener that missed events re-fetches the request.
pub trait NotificationPublisher: Send + Sync {
    /// Returns the number of listeners the event reached.
    fn publish(&self, channel: &ChannelKey, event: DispatchEvent)
        -> Result<usize, NotificationError>;
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("no subscribers on {0}")]
    NoSubscribers(String),
    #[error("notification transport unavailable: {0}")]
    Transport(String),
}

/// Publishes and logs failures instead of returning them; fan-out never fails the caller.
pub(crate) fn publish_quietly<N>(publisher: &N, channel: ChannelKey, event: DispatchEvent) -> bool
where
    N: NotificationPublisher + ?Sized,
{
    let name = event.name();
    match publisher.publish(&channel, event) {
        Ok(listeners) => {
            debug!(%channel, event = name, listeners, "event published");
            true
        }
        Err(NotificationError::NoSubscribers(_)) => {
            info!(%channel, event = name, "no listeners for event");
            false
        }
        Err(err) => {
            warn!(%channel, event = name, error = %err, "failed to publish event");
            false
        }
    }
}
