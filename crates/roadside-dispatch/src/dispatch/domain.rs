use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

macro_rules! identifier {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(pub String);

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_string())
            }
        }
    };
}

identifier!(
    /// Identifier of a service request.
    RequestId
);
identifier!(
    /// Identifier of a requester (vehicle owner) account.
    RequesterId
);
identifier!(
    /// Identifier of a provider (workshop) account.
    ProviderId
);
identifier!(VehicleId);

impl RequestId {
    pub fn generate() -> Self {
        Self(format!("req-{}", Uuid::new_v4().simple()))
    }
}

/// Authenticated caller handed to the core by the authentication layer.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", content = "id", rename_all = "snake_case")]
pub enum Principal {
    Requester(RequesterId),
    Provider(ProviderId),
}

impl Principal {
    pub fn role(&self) -> SenderRole {
        match self {
            Principal::Requester(_) => SenderRole::Requester,
            Principal::Provider(_) => SenderRole::Provider,
        }
    }

    pub fn id(&self) -> &str {
        match self {
            Principal::Requester(id) => &id.0,
            Principal::Provider(id) => &id.0,
        }
    }
}

impl fmt::Display for Principal {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Principal::Requester(id) => write!(f, "requester:{id}"),
            Principal::Provider(id) => write!(f, "provider:{id}"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    Requester,
    Provider,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct GeoPoint {
    pub lat: f64,
    pub lng: f64,
}

impl GeoPoint {
    pub fn new(lat: f64, lng: f64) -> Self {
        Self { lat, lng }
    }

    pub fn is_valid(&self) -> bool {
        (-90.0..=90.0).contains(&self.lat) && (-180.0..=180.0).contains(&self.lng)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Location {
    pub lat: f64,
    pub lng: f64,
    pub address: String,
}

impl Location {
    pub fn point(&self) -> GeoPoint {
        GeoPoint::new(self.lat, self.lng)
    }
}

/// Vehicle classes a workshop can service.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum VehicleClass {
    #[serde(rename = "2W")]
    TwoWheeler,
    #[serde(rename = "3W")]
    ThreeWheeler,
    #[serde(rename = "4W")]
    FourWheeler,
    #[serde(rename = "EV")]
    Electric,
}

impl VehicleClass {
    pub fn code(self) -> &'static str {
        match self {
            VehicleClass::TwoWheeler => "2W",
            VehicleClass::ThreeWheeler => "3W",
            VehicleClass::FourWheeler => "4W",
            VehicleClass::Electric => "EV",
        }
    }
}

impl fmt::Display for VehicleClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.code())
    }
}

impl FromStr for VehicleClass {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        match raw.trim().to_ascii_uppercase().as_str() {
            "2W" => Ok(Self::TwoWheeler),
            "3W" => Ok(Self::ThreeWheeler),
            "4W" => Ok(Self::FourWheeler),
            "EV" => Ok(Self::Electric),
            other => Err(format!("unknown vehicle class '{other}' (expected 2W, 3W, 4W or EV)")),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IssueCategory {
    Battery,
    Tire,
    Towing,
    FuelDelivery,
    LockOut,
    JumpStart,
    FlatTire,
    Engine,
    Other,
}

/// Lifecycle of a service request.
///
/// `Pending → Accepted → InProgress → Completed`, and any non-terminal state may move to
/// `Cancelled`. Nothing re-enters `Pending`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum RequestStatus {
    Pending,
    Accepted,
    InProgress,
    Completed,
    Cancelled,
}

impl RequestStatus {
    pub fn label(self) -> &'static str {
        match self {
            RequestStatus::Pending => "Pending",
            RequestStatus::Accepted => "Accepted",
            RequestStatus::InProgress => "InProgress",
            RequestStatus::Completed => "Completed",
            RequestStatus::Cancelled => "Cancelled",
        }
    }

    pub fn is_terminal(self) -> bool {
        matches!(self, RequestStatus::Completed | RequestStatus::Cancelled)
    }

    pub fn can_transition_to(self, next: RequestStatus) -> bool {
        use RequestStatus::*;
        matches!(
            (self, next),
            (Pending, Accepted)
                | (Accepted, InProgress)
                | (InProgress, Completed)
                | (Pending | Accepted | InProgress, Cancelled)
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentMode {
    Cash,
    Upi,
    Card,
    #[default]
    Pending,
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct PricingEstimate {
    #[serde(default)]
    pub labor: f64,
    #[serde(default)]
    pub parts: f64,
    #[serde(default)]
    pub travel: f64,
    #[serde(default)]
    pub total: f64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub notes: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MechanicDetails {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub phone: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub photo: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MembershipPlan {
    #[serde(rename = "none")]
    Unsubscribed,
    Free,
    Basic,
    Premium,
}

/// Requester-side quota. Plan and expiry are written by the payment collaborator; the
/// dispatch core only consumes `requests_used`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Membership {
    pub plan: MembershipPlan,
    pub requests_used: u32,
    pub max_requests: u32,
    pub expiry: DateTime<Utc>,
    pub last_reset_date: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Requester {
    pub id: RequesterId,
    pub name: String,
    pub phone: String,
    pub membership: Membership,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Vehicle {
    pub id: VehicleId,
    pub owner: RequesterId,
    pub class: VehicleClass,
    pub brand: String,
    pub model: String,
    pub registration_number: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SubscriptionStatus {
    Active,
    Inactive,
    Expired,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProviderSubscription {
    pub status: SubscriptionStatus,
    pub expiry: Option<DateTime<Utc>>,
}

impl ProviderSubscription {
    pub fn is_active_at(&self, now: DateTime<Utc>) -> bool {
        self.status == SubscriptionStatus::Active
            && self.expiry.map(|expiry| expiry > now).unwrap_or(false)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Rating {
    pub average: f64,
    pub count: u32,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Provider {
    pub id: ProviderId,
    pub name: String,
    pub phone: String,
    pub location: Location,
    pub vehicle_classes: BTreeSet<VehicleClass>,
    pub services_offered: BTreeSet<IssueCategory>,
    pub is_online: bool,
    pub subscription: ProviderSubscription,
    pub rating: Rating,
    pub is_sponsored: bool,
}

impl Provider {
    pub fn summary(&self) -> ProviderSummary {
        ProviderSummary {
            id: self.id.clone(),
            name: self.name.clone(),
            phone: self.phone.clone(),
            location: self.location.clone(),
            rating: self.rating,
        }
    }
}

/// Contact card sent to the requester once a workshop accepts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProviderSummary {
    pub id: ProviderId,
    pub name: String,
    pub phone: String,
    pub location: Location,
    pub rating: Rating,
}

/// Fields supplied by the requester when opening a request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewServiceRequest {
    pub vehicle_id: VehicleId,
    pub issue: IssueCategory,
    pub description: String,
    #[serde(default)]
    pub attachments: Vec<String>,
    pub location: Location,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: RequestId,
    pub requester: RequesterId,
    pub vehicle: VehicleId,
    pub vehicle_class: VehicleClass,
    pub issue: IssueCategory,
    pub description: String,
    pub attachments: Vec<String>,
    pub location: Location,
    pub status: RequestStatus,
    pub assigned_provider: Option<ProviderId>,
    pub assigned_mechanic: Option<MechanicDetails>,
    pub eta: Option<DateTime<Utc>>,
    /// Candidates captured at creation, in rank order. Never rewritten.
    pub notified_providers: Vec<ProviderId>,
    pub pricing_estimate: Option<PricingEstimate>,
    pub payment_mode: PaymentMode,
    pub is_paid: bool,
    pub paid_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub cancelled_at: Option<DateTime<Utc>>,
    pub cancellation_reason: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ServiceRequest {
    pub fn open(
        requester: RequesterId,
        vehicle: &Vehicle,
        draft: NewServiceRequest,
        notified_providers: Vec<ProviderId>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: RequestId::generate(),
            requester,
            vehicle: vehicle.id.clone(),
            vehicle_class: vehicle.class,
            issue: draft.issue,
            description: draft.description,
            attachments: draft.attachments,
            location: draft.location,
            status: RequestStatus::Pending,
            assigned_provider: None,
            assigned_mechanic: None,
            eta: None,
            notified_providers,
            pricing_estimate: None,
            payment_mode: PaymentMode::Pending,
            is_paid: false,
            paid_at: None,
            completed_at: None,
            cancelled_at: None,
            cancellation_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn was_notified(&self, provider: &ProviderId) -> bool {
        self.notified_providers.iter().any(|id| id == provider)
    }

    pub fn is_assigned_to(&self, provider: &ProviderId) -> bool {
        self.assigned_provider.as_ref() == Some(provider)
    }

    /// Requester or assigned provider: the parties allowed to drive status and chat.
    pub fn is_party(&self, principal: &Principal) -> bool {
        match principal {
            Principal::Requester(id) => &self.requester == id,
            Principal::Provider(id) => self.is_assigned_to(id),
        }
    }

    /// Parties plus notified candidates, who may read the request while deciding.
    pub fn is_visible_to(&self, principal: &Principal) -> bool {
        match principal {
            Principal::Requester(id) => &self.requester == id,
            Principal::Provider(id) => self.is_assigned_to(id) || self.was_notified(id),
        }
    }

    /// Applies a mutation that the store has already guarded on `status`.
    pub fn apply(&mut self, update: &RequestUpdate, now: DateTime<Utc>) {
        match update {
            RequestUpdate::Accept {
                provider,
                mechanic,
                eta,
            } => {
                self.status = RequestStatus::Accepted;
                self.assigned_provider = Some(provider.clone());
                self.eta = *eta;
                if let Some(mechanic) = mechanic {
                    self.assigned_mechanic = Some(mechanic.clone());
                }
            }
            RequestUpdate::Transition(change) => {
                self.status = change.to;
                if let Some(eta) = change.eta {
                    self.eta = Some(eta);
                }
                if let Some(estimate) = &change.pricing_estimate {
                    self.pricing_estimate = Some(estimate.clone());
                }
                if let Some(mode) = change.payment_mode {
                    self.payment_mode = mode;
                }
                match change.to {
                    RequestStatus::Completed => {
                        self.completed_at = Some(now);
                        if matches!(change.payment_mode, Some(mode) if mode != PaymentMode::Pending)
                        {
                            self.is_paid = true;
                            self.paid_at = Some(now);
                        }
                    }
                    RequestStatus::Cancelled => {
                        self.cancelled_at = Some(now);
                        self.cancellation_reason = change.cancellation_reason.clone();
                    }
                    _ => {}
                }
            }
        }
        self.updated_at = now;
    }
}

/// A guarded mutation of a stored request.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestUpdate {
    Accept {
        provider: ProviderId,
        mechanic: Option<MechanicDetails>,
        eta: Option<DateTime<Utc>>,
    },
    Transition(StatusChange),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StatusChange {
    #[serde(rename = "status")]
    pub to: RequestStatus,
    #[serde(default)]
    pub eta: Option<DateTime<Utc>>,
    #[serde(default)]
    pub pricing_estimate: Option<PricingEstimate>,
    #[serde(default)]
    pub payment_mode: Option<PaymentMode>,
    #[serde(default)]
    pub cancellation_reason: Option<String>,
}

impl StatusChange {
    pub fn to(status: RequestStatus) -> Self {
        Self {
            to: status,
            eta: None,
            pricing_estimate: None,
            payment_mode: None,
            cancellation_reason: None,
        }
    }
}

/// Entry of the per-request chat log. `sequence` is assigned by the store on append and is
/// strictly increasing within one request.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub request_id: RequestId,
    pub sequence: u64,
    pub sender: Principal,
    pub sender_role: SenderRole,
    pub sender_name: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

/// A message before the log has assigned it a sequence number.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatDraft {
    pub sender: Principal,
    pub sender_name: String,
    pub text: String,
    pub sent_at: DateTime<Utc>,
}

impl ChatDraft {
    pub fn into_message(self, request_id: RequestId, sequence: u64) -> ChatMessage {
        ChatMessage {
            request_id,
            sequence,
            sender_role: self.sender.role(),
            sender: self.sender,
            sender_name: self.sender_name,
            text: self.text,
            sent_at: self.sent_at,
        }
    }
}

/// Request annotated with its distance from the viewing provider.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct QueuedRequest {
    #[serde(flatten)]
    pub request: ServiceRequest,
    pub distance_km: f64,
}

/// One page of a newest-first listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Page<T> {
    pub items: Vec<T>,
    pub page: usize,
    pub limit: usize,
    pub total: usize,
    pub pages: usize,
}
