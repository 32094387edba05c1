use std::collections::BTreeSet;
use std::sync::{Arc, Mutex};

use axum::response::Response;
use chrono::{DateTime, Duration, Utc};
use serde_json::Value;

use crate::dispatch::audit::{AuditEntry, AuditTrail};
use crate::dispatch::domain::{
    ChatDraft, ChatMessage, GeoPoint, IssueCategory, Location, Membership, MembershipPlan,
    NewServiceRequest, Principal, Provider, ProviderId, ProviderSubscription, Rating, RequestId,
    RequestStatus, RequestUpdate, Requester, RequesterId, ServiceRequest, StatusChange,
    SubscriptionStatus, Vehicle, VehicleClass, VehicleId,
};
use crate::dispatch::fanout::{ChannelKey, DispatchEvent, NotificationError, NotificationPublisher};
use crate::dispatch::matching::{EARTH_RADIUS_KM, MatchingConfig};
use crate::dispatch::memory::InMemoryStore;
use crate::dispatch::repository::{
    ChatAppend, ChatLog, GuardedWrite, MembershipLedger, ProviderDirectory, RepositoryError,
    RequestRepository, VehicleRegistry,
};
use crate::dispatch::service::DispatchCoordinator;

pub(super) const REQUESTER: &str = "usr-1";
pub(super) const VEHICLE: &str = "veh-1";

/// Sitabuldi, Nagpur.
pub(super) fn origin() -> GeoPoint {
    GeoPoint::new(21.1458, 79.0882)
}

/// A point `km` due north of `from`; haversine returns `km` for it.
pub(super) fn north_of(from: GeoPoint, km: f64) -> GeoPoint {
    let degrees = (km / EARTH_RADIUS_KM).to_degrees();
    GeoPoint::new(from.lat + degrees, from.lng)
}

pub(super) fn membership(plan: MembershipPlan, used: u32, max: u32) -> Membership {
    let now = Utc::now();
    Membership {
        plan,
        requests_used: used,
        max_requests: max,
        expiry: now + Duration::days(30),
        last_reset_date: now - Duration::days(1),
    }
}

pub(super) fn requester(id: &str, membership: Membership) -> Requester {
    Requester {
        id: RequesterId::from(id),
        name: format!("Driver {id}"),
        phone: "+91-98000-00001".to_string(),
        membership,
    }
}

pub(super) fn vehicle(id: &str, owner: &str, class: VehicleClass) -> Vehicle {
    Vehicle {
        id: VehicleId::from(id),
        owner: RequesterId::from(owner),
        class,
        brand: "Maruti".to_string(),
        model: "Swift".to_string(),
        registration_number: "MH31AB1234".to_string(),
        is_active: true,
    }
}

pub(super) fn active_subscription() -> ProviderSubscription {
    ProviderSubscription {
        status: SubscriptionStatus::Active,
        expiry: Some(Utc::now() + Duration::days(30)),
    }
}

/// Online, subscribed, servicing two- and four-wheelers, `km` north of [`origin`].
pub(super) fn provider(id: &str, km: f64, rating: f64) -> Provider {
    let point = north_of(origin(), km);
    Provider {
        id: ProviderId::from(id),
        name: format!("Workshop {id}"),
        phone: "+91-71200-00000".to_string(),
        location: Location {
            lat: point.lat,
            lng: point.lng,
            address: format!("{km} km north of Sitabuldi"),
        },
        vehicle_classes: BTreeSet::from([VehicleClass::TwoWheeler, VehicleClass::FourWheeler]),
        services_offered: BTreeSet::from([IssueCategory::Battery, IssueCategory::FlatTire]),
        is_online: true,
        subscription: active_subscription(),
        rating: Rating {
            average: rating,
            count: 12,
        },
        is_sponsored: false,
    }
}

pub(super) fn draft() -> NewServiceRequest {
    let point = origin();
    NewServiceRequest {
        vehicle_id: VehicleId::from(VEHICLE),
        issue: IssueCategory::Battery,
        description: "Car won't start after overnight parking".to_string(),
        attachments: vec!["uploads/battery.jpg".to_string()],
        location: Location {
            lat: point.lat,
            lng: point.lng,
            address: "Sitabuldi, Nagpur".to_string(),
        },
    }
}

pub(super) fn driver() -> Principal {
    Principal::Requester(RequesterId::from(REQUESTER))
}

pub(super) fn workshop(id: &str) -> Principal {
    Principal::Provider(ProviderId::from(id))
}

/// Store holding one free-tier requester with a four-wheeler and three nearby workshops.
pub(super) fn seeded_store() -> Arc<InMemoryStore> {
    let store = InMemoryStore::new();
    seed(&store);
    Arc::new(store)
}

fn seed(store: &InMemoryStore) {
    store.put_requester(requester(REQUESTER, membership(MembershipPlan::Free, 0, 3)));
    store.put_vehicle(vehicle(VEHICLE, REQUESTER, VehicleClass::FourWheeler));
    store.put_provider(provider("ws-a", 1.0, 4.2));
    store.put_provider(provider("ws-b", 3.0, 4.8));
    store.put_provider(provider("ws-c", 6.0, 3.9));
}

pub(super) fn build_coordinator(
    store: Arc<InMemoryStore>,
) -> (
    DispatchCoordinator<InMemoryStore, RecordingPublisher>,
    Arc<RecordingPublisher>,
) {
    let publisher = Arc::new(RecordingPublisher::default());
    let coordinator = DispatchCoordinator::new(store, publisher.clone(), MatchingConfig::default());
    (coordinator, publisher)
}

/// Creates a request as [`REQUESTER`] and lets `provider` accept it.
pub(super) fn accepted_request(
    coordinator: &DispatchCoordinator<InMemoryStore, RecordingPublisher>,
    provider: &str,
) -> ServiceRequest {
    let created = coordinator
        .create_request(&driver(), draft())
        .expect("request created");
    coordinator
        .accept_request(&workshop(provider), &created.request.id, Default::default())
        .expect("request accepted")
}

#[derive(Default)]
pub(super) struct RecordingPublisher {
    events: Mutex<Vec<(String, DispatchEvent)>>,
}

impl RecordingPublisher {
    pub(super) fn events(&self) -> Vec<(String, DispatchEvent)> {
        self.events.lock().expect("publisher mutex poisoned").clone()
    }

    pub(super) fn on(&self, channel: &ChannelKey) -> Vec<DispatchEvent> {
        let key = channel.to_string();
        self.events()
            .into_iter()
            .filter(|(name, _)| name == &key)
            .map(|(_, event)| event)
            .collect()
    }
}

impl NotificationPublisher for RecordingPublisher {
    fn publish(
        &self,
        channel: &ChannelKey,
        event: DispatchEvent,
    ) -> Result<usize, NotificationError> {
        self.events
            .lock()
            .expect("publisher mutex poisoned")
            .push((channel.to_string(), event));
        Ok(1)
    }
}

pub(super) struct BrokenPublisher;

impl NotificationPublisher for BrokenPublisher {
    fn publish(
        &self,
        _channel: &ChannelKey,
        _event: DispatchEvent,
    ) -> Result<usize, NotificationError> {
        Err(NotificationError::Transport("socket gateway down".to_string()))
    }
}

/// Store whose every call fails, for exercising the internal-error path.
pub(super) struct OfflineStore;

fn offline<T>() -> Result<T, RepositoryError> {
    Err(RepositoryError::Unavailable("database offline".to_string()))
}

impl RequestRepository for OfflineStore {
    fn insert(&self, _request: ServiceRequest) -> Result<ServiceRequest, RepositoryError> {
        offline()
    }

    fn fetch(&self, _id: &RequestId) -> Result<Option<ServiceRequest>, RepositoryError> {
        offline()
    }

    fn update_if_status(
        &self,
        _id: &RequestId,
        _expected: RequestStatus,
        _update: &RequestUpdate,
        _now: DateTime<Utc>,
    ) -> Result<GuardedWrite, RepositoryError> {
        offline()
    }

    fn for_requester(
        &self,
        _requester: &RequesterId,
        _status: Option<RequestStatus>,
        _offset: usize,
        _limit: usize,
    ) -> Result<(Vec<ServiceRequest>, usize), RepositoryError> {
        offline()
    }

    fn pending_for_candidate(
        &self,
        _provider: &ProviderId,
        _limit: usize,
    ) -> Result<Vec<ServiceRequest>, RepositoryError> {
        offline()
    }

    fn assigned_to(
        &self,
        _provider: &ProviderId,
        _status: RequestStatus,
        _limit: usize,
    ) -> Result<Vec<ServiceRequest>, RepositoryError> {
        offline()
    }
}

impl MembershipLedger for OfflineStore {
    fn requester(&self, _id: &RequesterId) -> Result<Option<Requester>, RepositoryError> {
        offline()
    }

    fn increment_requests_below(
        &self,
        _id: &RequesterId,
        _limit: u32,
    ) -> Result<Option<u32>, RepositoryError> {
        offline()
    }

    fn release_request(&self, _id: &RequesterId) -> Result<(), RepositoryError> {
        offline()
    }
}

impl ProviderDirectory for OfflineStore {
    fn provider(&self, _id: &ProviderId) -> Result<Option<Provider>, RepositoryError> {
        offline()
    }

    fn online_providers(
        &self,
        _class: Option<VehicleClass>,
    ) -> Result<Vec<Provider>, RepositoryError> {
        offline()
    }
}

impl VehicleRegistry for OfflineStore {
    fn vehicle(&self, _id: &VehicleId) -> Result<Option<Vehicle>, RepositoryError> {
        offline()
    }
}

impl ChatLog for OfflineStore {
    fn append(
        &self,
        _request: &RequestId,
        _draft: ChatDraft,
    ) -> Result<ChatAppend, RepositoryError> {
        offline()
    }

    fn messages(
        &self,
        _request: &RequestId,
        _after: Option<u64>,
        _limit: usize,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        offline()
    }
}

impl AuditTrail for OfflineStore {
    fn record(&self, _entry: AuditEntry) -> Result<(), RepositoryError> {
        offline()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Fault {
    /// Every request insert fails as if the database rejected the write.
    RejectInsert,
    /// The request is cancelled by its requester just before each chat append lands.
    CancelBeforeAppend,
}

/// Seeded in-memory store with one injected failure; everything else passes through.
pub(super) struct FaultyStore {
    pub(super) inner: InMemoryStore,
    fault: Fault,
}

impl FaultyStore {
    pub(super) fn seeded(fault: Fault) -> Arc<Self> {
        let inner = InMemoryStore::new();
        seed(&inner);
        Arc::new(Self { inner, fault })
    }
}

impl RequestRepository for FaultyStore {
    fn insert(&self, request: ServiceRequest) -> Result<ServiceRequest, RepositoryError> {
        if self.fault == Fault::RejectInsert {
            return Err(RepositoryError::Unavailable("write rejected".to_string()));
        }
        self.inner.insert(request)
    }

    fn fetch(&self, id: &RequestId) -> Result<Option<ServiceRequest>, RepositoryError> {
        self.inner.fetch(id)
    }

    fn update_if_status(
        &self,
        id: &RequestId,
        expected: RequestStatus,
        update: &RequestUpdate,
        now: DateTime<Utc>,
    ) -> Result<GuardedWrite, RepositoryError> {
        self.inner.update_if_status(id, expected, update, now)
    }

    fn for_requester(
        &self,
        requester: &RequesterId,
        status: Option<RequestStatus>,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<ServiceRequest>, usize), RepositoryError> {
        self.inner.for_requester(requester, status, offset, limit)
    }

    fn pending_for_candidate(
        &self,
        provider: &ProviderId,
        limit: usize,
    ) -> Result<Vec<ServiceRequest>, RepositoryError> {
        self.inner.pending_for_candidate(provider, limit)
    }

    fn assigned_to(
        &self,
        provider: &ProviderId,
        status: RequestStatus,
        limit: usize,
    ) -> Result<Vec<ServiceRequest>, RepositoryError> {
        self.inner.assigned_to(provider, status, limit)
    }
}

impl MembershipLedger for FaultyStore {
    fn requester(&self, id: &RequesterId) -> Result<Option<Requester>, RepositoryError> {
        self.inner.requester(id)
    }

    fn increment_requests_below(
        &self,
        id: &RequesterId,
        limit: u32,
    ) -> Result<Option<u32>, RepositoryError> {
        self.inner.increment_requests_below(id, limit)
    }

    fn release_request(&self, id: &RequesterId) -> Result<(), RepositoryError> {
        self.inner.release_request(id)
    }
}

impl ProviderDirectory for FaultyStore {
    fn provider(&self, id: &ProviderId) -> Result<Option<Provider>, RepositoryError> {
        self.inner.provider(id)
    }

    fn online_providers(
        &self,
        class: Option<VehicleClass>,
    ) -> Result<Vec<Provider>, RepositoryError> {
        self.inner.online_providers(class)
    }
}

impl VehicleRegistry for FaultyStore {
    fn vehicle(&self, id: &VehicleId) -> Result<Option<Vehicle>, RepositoryError> {
        self.inner.vehicle(id)
    }
}

impl ChatLog for FaultyStore {
    fn append(&self, request: &RequestId, draft: ChatDraft) -> Result<ChatAppend, RepositoryError> {
        if self.fault == Fault::CancelBeforeAppend {
            let cancel = RequestUpdate::Transition(StatusChange::to(RequestStatus::Cancelled));
            if let Some(current) = self.inner.fetch(request)? {
                self.inner
                    .update_if_status(request, current.status, &cancel, Utc::now())?;
            }
        }
        self.inner.append(request, draft)
    }

    fn messages(
        &self,
        request: &RequestId,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        self.inner.messages(request, after, limit)
    }
}

impl AuditTrail for FaultyStore {
    fn record(&self, entry: AuditEntry) -> Result<(), RepositoryError> {
        self.inner.record(entry)
    }
}

pub(super) async fn read_json_body(response: Response) -> Value {
    let body = axum::body::to_bytes(response.into_body(), 64 * 1024)
        .await
        .expect("read body");
    serde_json::from_slice(&body).expect("json payload")
}
