//! In-process implementations of the storage and fan-out contracts.
//!
//! Every guarded write runs under one mutex, which gives the same all-or-nothing behavior a
//! durable store provides with a conditional update.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tokio::sync::broadcast;

use super::audit::{AuditEntry, AuditTrail};
use super::domain::{
    ChatDraft, ChatMessage, Provider, ProviderId, RequestId, RequestStatus, RequestUpdate,
    Requester, RequesterId, ServiceRequest, Vehicle, VehicleClass, VehicleId,
};
use super::fanout::{ChannelKey, DispatchEvent, Notification, NotificationError, NotificationPublisher};
use super::repository::{
    ChatAppend, ChatLog, GuardedWrite, MembershipLedger, ProviderDirectory, RepositoryError,
    RequestRepository, VehicleRegistry,
};

#[derive(Default)]
struct StoreState {
    requests: HashMap<RequestId, ServiceRequest>,
    /// Insertion order, oldest first.
    request_order: Vec<RequestId>,
    requesters: HashMap<RequesterId, Requester>,
    providers: HashMap<ProviderId, Provider>,
    vehicles: HashMap<VehicleId, Vehicle>,
    chat: HashMap<RequestId, Vec<ChatMessage>>,
    audit: Vec<AuditEntry>,
}

impl StoreState {
    fn newest_first(&self) -> impl Iterator<Item = &ServiceRequest> {
        self.request_order
            .iter()
            .rev()
            .filter_map(|id| self.requests.get(id))
    }
}

#[derive(Default)]
pub struct InMemoryStore {
    state: Mutex<StoreState>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, StoreState>, RepositoryError> {
        self.state
            .lock()
            .map_err(|_| RepositoryError::Unavailable("store mutex poisoned".to_string()))
    }

    fn lock_for_seed(&self) -> MutexGuard<'_, StoreState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub fn put_requester(&self, requester: Requester) {
        self.lock_for_seed()
            .requesters
            .insert(requester.id.clone(), requester);
    }

    pub fn put_provider(&self, provider: Provider) {
        self.lock_for_seed()
            .providers
            .insert(provider.id.clone(), provider);
    }

    pub fn put_vehicle(&self, vehicle: Vehicle) {
        self.lock_for_seed()
            .vehicles
            .insert(vehicle.id.clone(), vehicle);
    }

    pub fn audit_entries(&self) -> Vec<AuditEntry> {
        self.lock_for_seed().audit.clone()
    }
}

impl RequestRepository for InMemoryStore {
    fn insert(&self, request: ServiceRequest) -> Result<ServiceRequest, RepositoryError> {
        let mut state = self.lock()?;
        if state.requests.contains_key(&request.id) {
            return Err(RepositoryError::Conflict);
        }
        state.request_order.push(request.id.clone());
        state.requests.insert(request.id.clone(), request.clone());
        Ok(request)
    }

    fn fetch(&self, id: &RequestId) -> Result<Option<ServiceRequest>, RepositoryError> {
        Ok(self.lock()?.requests.get(id).cloned())
    }

    fn update_if_status(
        &self,
        id: &RequestId,
        expected: RequestStatus,
        update: &RequestUpdate,
        now: DateTime<Utc>,
    ) -> Result<GuardedWrite, RepositoryError> {
        let mut state = self.lock()?;
        let request = state.requests.get_mut(id).ok_or(RepositoryError::NotFound)?;
        if request.status != expected {
            return Ok(GuardedWrite::StatusMismatch(request.status));
        }
        request.apply(update, now);
        Ok(GuardedWrite::Applied(request.clone()))
    }

    fn for_requester(
        &self,
        requester: &RequesterId,
        status: Option<RequestStatus>,
        offset: usize,
        limit: usize,
    ) -> Result<(Vec<ServiceRequest>, usize), RepositoryError> {
        let state = self.lock()?;
        let matching: Vec<&ServiceRequest> = state
            .newest_first()
            .filter(|request| &request.requester == requester)
            .filter(|request| status.map_or(true, |status| request.status == status))
            .collect();
        let total = matching.len();
        let page = matching
            .into_iter()
            .skip(offset)
            .take(limit)
            .cloned()
            .collect();
        Ok((page, total))
    }

    fn pending_for_candidate(
        &self,
        provider: &ProviderId,
        limit: usize,
    ) -> Result<Vec<ServiceRequest>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .newest_first()
            .filter(|request| request.status == RequestStatus::Pending)
            .filter(|request| request.was_notified(provider))
            .take(limit)
            .cloned()
            .collect())
    }

    fn assigned_to(
        &self,
        provider: &ProviderId,
        status: RequestStatus,
        limit: usize,
    ) -> Result<Vec<ServiceRequest>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .newest_first()
            .filter(|request| request.status == status && request.is_assigned_to(provider))
            .take(limit)
            .cloned()
            .collect())
    }
}

impl MembershipLedger for InMemoryStore {
    fn requester(&self, id: &RequesterId) -> Result<Option<Requester>, RepositoryError> {
        Ok(self.lock()?.requesters.get(id).cloned())
    }

    fn increment_requests_below(
        &self,
        id: &RequesterId,
        limit: u32,
    ) -> Result<Option<u32>, RepositoryError> {
        let mut state = self.lock()?;
        let membership = &mut state
            .requesters
            .get_mut(id)
            .ok_or(RepositoryError::NotFound)?
            .membership;
        if membership.requests_used >= limit {
            return Ok(None);
        }
        membership.requests_used += 1;
        Ok(Some(membership.requests_used))
    }

    fn release_request(&self, id: &RequesterId) -> Result<(), RepositoryError> {
        let mut state = self.lock()?;
        let membership = &mut state
            .requesters
            .get_mut(id)
            .ok_or(RepositoryError::NotFound)?
            .membership;
        membership.requests_used = membership.requests_used.saturating_sub(1);
        Ok(())
    }
}

impl ProviderDirectory for InMemoryStore {
    fn provider(&self, id: &ProviderId) -> Result<Option<Provider>, RepositoryError> {
        Ok(self.lock()?.providers.get(id).cloned())
    }

    fn online_providers(
        &self,
        class: Option<VehicleClass>,
    ) -> Result<Vec<Provider>, RepositoryError> {
        let state = self.lock()?;
        let mut providers: Vec<Provider> = state
            .providers
            .values()
            .filter(|provider| provider.is_online)
            .filter(|provider| class.map_or(true, |class| provider.vehicle_classes.contains(&class)))
            .cloned()
            .collect();
        providers.sort_by(|a, b| a.id.cmp(&b.id));
        Ok(providers)
    }
}

impl VehicleRegistry for InMemoryStore {
    fn vehicle(&self, id: &VehicleId) -> Result<Option<Vehicle>, RepositoryError> {
        Ok(self.lock()?.vehicles.get(id).cloned())
    }
}

impl ChatLog for InMemoryStore {
    fn append(
        &self,
        request: &RequestId,
        draft: ChatDraft,
    ) -> Result<ChatAppend, RepositoryError> {
        let mut state = self.lock()?;
        match state.requests.get(request).map(|stored| stored.status) {
            None => return Err(RepositoryError::NotFound),
            Some(RequestStatus::Cancelled) => return Ok(ChatAppend::RequestCancelled),
            Some(_) => {}
        }
        let log = state.chat.entry(request.clone()).or_default();
        let sequence = log.last().map_or(1, |last| last.sequence + 1);
        let message = draft.into_message(request.clone(), sequence);
        log.push(message.clone());
        Ok(ChatAppend::Appended(message))
    }

    fn messages(
        &self,
        request: &RequestId,
        after: Option<u64>,
        limit: usize,
    ) -> Result<Vec<ChatMessage>, RepositoryError> {
        let state = self.lock()?;
        Ok(state
            .chat
            .get(request)
            .map(|log| {
                log.iter()
                    .filter(|message| after.map_or(true, |after| message.sequence > after))
                    .take(limit)
                    .cloned()
                    .collect()
            })
            .unwrap_or_default())
    }
}

impl AuditTrail for InMemoryStore {
    fn record(&self, entry: AuditEntry) -> Result<(), RepositoryError> {
        self.lock()?.audit.push(entry);
        Ok(())
    }
}

/// Channel hub backed by `tokio::sync::broadcast`. Channels exist while someone listens.
pub struct BroadcastHub {
    channels: Mutex<HashMap<String, broadcast::Sender<Notification>>>,
    capacity: usize,
}

impl Default for BroadcastHub {
    fn default() -> Self {
        Self::with_capacity(64)
    }
}

impl BroadcastHub {
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            channels: Mutex::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    pub fn subscribe(&self, channel: &ChannelKey) -> broadcast::Receiver<Notification> {
        let mut channels = self.channels.lock().unwrap_or_else(PoisonError::into_inner);
        channels
            .entry(channel.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0)
            .subscribe()
    }
}

impl NotificationPublisher for BroadcastHub {
    fn publish(
        &self,
        channel: &ChannelKey,
        event: DispatchEvent,
    ) -> Result<usize, NotificationError> {
        let key = channel.to_string();
        let mut channels = self
            .channels
            .lock()
            .map_err(|_| NotificationError::Transport("hub mutex poisoned".to_string()))?;
        let Some(sender) = channels.get(&key) else {
            return Err(NotificationError::NoSubscribers(key));
        };

        let notification = Notification {
            channel: key.clone(),
            event,
        };
        match sender.send(notification) {
            Ok(listeners) => Ok(listeners),
            Err(_) => {
                channels.remove(&key);
                Err(NotificationError::NoSubscribers(key))
            }
        }
    }
}
