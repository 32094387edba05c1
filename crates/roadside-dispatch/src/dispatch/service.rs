use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::admission::AdmissionController;
use super::audit::{record_quietly, AuditAction, AuditEntry, AuditMeta};
use super::domain::{
    GeoPoint, MechanicDetails, NewServiceRequest, Page, Principal, ProviderId, QueuedRequest,
    RequestId, RequestStatus, RequestUpdate, RequesterId, ServiceRequest, StatusChange,
    VehicleClass,
};
use super::error::DispatchError;
use super::fanout::{publish_quietly, ChannelKey, DispatchEvent, NotificationPublisher};
use super::matching::{haversine_km, round_km, Candidate, CandidateSelector, MatchingConfig};
use super::repository::{DispatchStore, GuardedWrite};

/// Cap on a provider's request queue.
pub const PROVIDER_QUEUE_LIMIT: usize = 50;
pub const DEFAULT_PAGE_SIZE: usize = 20;
pub const MAX_PAGE_SIZE: usize = 100;

/// Optional details a provider attaches when claiming a request.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AcceptRequest {
    #[serde(default)]
    pub mechanic: Option<MechanicDetails>,
    #[serde(default)]
    pub eta: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CreatedRequest {
    pub request: ServiceRequest,
    pub notified_providers: usize,
}

/// Owns the service-request lifecycle: creation with its candidate snapshot, the accept
/// race, status transitions and who may do what.
pub struct DispatchCoordinator<S, N> {
    store: Arc<S>,
    publisher: Arc<N>,
    admission: AdmissionController<S>,
    selector: CandidateSelector<S>,
}

impl<S, N> DispatchCoordinator<S, N>
where
    S: DispatchStore + 'static,
    N: NotificationPublisher + 'static,
{
    pub fn new(store: Arc<S>, publisher: Arc<N>, matching: MatchingConfig) -> Self {
        let admission = AdmissionController::new(store.clone());
        let selector = CandidateSelector::new(store.clone(), matching);
        Self {
            store,
            publisher,
            admission,
            selector,
        }
    }

    pub fn admission(&self) -> &AdmissionController<S> {
        &self.admission
    }

    pub fn selector(&self) -> &CandidateSelector<S> {
        &self.selector
    }

    /// Open a request, snapshot its candidates and tell each of them about it.
    pub fn create_request(
        &self,
        principal: &Principal,
        draft: NewServiceRequest,
    ) -> Result<CreatedRequest, DispatchError> {
        let requester_id = requester_of(principal)?;
        validate_draft(&draft)?;
        let now = Utc::now();

        self.admission.can_create_request(requester_id, now)?;

        let vehicle = self
            .store
            .vehicle(&draft.vehicle_id)?
            .filter(|vehicle| &vehicle.owner == requester_id && vehicle.is_active)
            .ok_or(DispatchError::NotFound("vehicle"))?;

        let candidates = self
            .selector
            .select(vehicle.class, draft.location.point(), now)?;
        let notified = candidates
            .iter()
            .map(|candidate| candidate.provider.id.clone())
            .collect();

        self.admission.admit(requester_id, now)?;

        let request = ServiceRequest::open(requester_id.clone(), &vehicle, draft, notified, now);
        let request = match self.store.insert(request) {
            Ok(request) => request,
            Err(err) => {
                if let Err(release_err) = self.admission.release(requester_id) {
                    warn!(
                        requester = %requester_id,
                        error = %release_err,
                        "could not hand back quota after a failed insert"
                    );
                }
                return Err(err.into());
            }
        };

        for candidate in &candidates {
            publish_quietly(
                self.publisher.as_ref(),
                ChannelKey::Provider(candidate.provider.id.clone()),
                DispatchEvent::NewRequest {
                    request: request.clone(),
                    distance_km: candidate.distance_km,
                },
            );
        }

        record_quietly(
            self.store.as_ref(),
            AuditEntry::new(
                request.id.clone(),
                AuditAction::Create,
                principal.clone(),
                AuditMeta::RequestCreated {
                    notified_providers: candidates.len(),
                },
                now,
            ),
        );

        info!(
            request = %request.id,
            requester = %requester_id,
            class = %request.vehicle_class,
            notified = candidates.len(),
            "service request created"
        );

        Ok(CreatedRequest {
            notified_providers: candidates.len(),
            request,
        })
    }

    /// Claim a pending request. Only the first of any number of concurrent callers wins;
    /// the rest get [`DispatchError::Conflict`] and must not retry.
    pub fn accept_request(
        &self,
        principal: &Principal,
        request_id: &RequestId,
        accept: AcceptRequest,
    ) -> Result<ServiceRequest, DispatchError> {
        let provider_id = provider_of(principal)?;
        let now = Utc::now();

        let request = self.fetch(request_id)?;
        if request.status != RequestStatus::Pending {
            return Err(DispatchError::Conflict);
        }
        if !request.was_notified(provider_id) {
            return Err(DispatchError::Forbidden(
                "provider was not notified for this request",
            ));
        }

        let provider = self
            .store
            .provider(provider_id)?
            .ok_or(DispatchError::NotFound("provider"))?;
        if !provider.subscription.is_active_at(now) {
            return Err(DispatchError::Forbidden("subscription expired or inactive"));
        }

        let update = RequestUpdate::Accept {
            provider: provider_id.clone(),
            mechanic: accept.mechanic.clone(),
            eta: accept.eta,
        };
        let accepted = match self
            .store
            .update_if_status(request_id, RequestStatus::Pending, &update, now)?
        {
            GuardedWrite::Applied(request) => request,
            GuardedWrite::StatusMismatch(current) => {
                info!(
                    request = %request_id,
                    provider = %provider_id,
                    status = %current,
                    "accept lost the race"
                );
                return Err(DispatchError::Conflict);
            }
        };

        publish_quietly(
            self.publisher.as_ref(),
            ChannelKey::Requester(accepted.requester.clone()),
            DispatchEvent::RequestAccepted {
                request_id: accepted.id.clone(),
                provider: provider.summary(),
                mechanic: accept.mechanic,
                eta: accept.eta,
            },
        );

        record_quietly(
            self.store.as_ref(),
            AuditEntry::new(
                accepted.id.clone(),
                AuditAction::Update,
                principal.clone(),
                AuditMeta::Assigned {
                    provider: provider_id.clone(),
                },
                now,
            ),
        );

        info!(request = %accepted.id, provider = %provider_id, "request assigned");
        Ok(accepted)
    }

    /// Move a request along its lifecycle on behalf of the requester or the assigned
    /// provider.
    pub fn update_status(
        &self,
        principal: &Principal,
        request_id: &RequestId,
        change: StatusChange,
    ) -> Result<ServiceRequest, DispatchError> {
        let now = Utc::now();
        let request = self.fetch(request_id)?;
        if !request.is_party(principal) {
            return Err(DispatchError::Forbidden("access denied"));
        }

        let from = request.status;
        if change.to == RequestStatus::Accepted {
            return Err(DispatchError::Validation(
                "requests are assigned by accepting them, not by status update".to_string(),
            ));
        }
        if !from.can_transition_to(change.to) {
            return Err(DispatchError::Validation(format!(
                "cannot move request from {from} to {}",
                change.to
            )));
        }

        let updated = match self.store.update_if_status(
            request_id,
            from,
            &RequestUpdate::Transition(change.clone()),
            now,
        )? {
            GuardedWrite::Applied(request) => request,
            GuardedWrite::StatusMismatch(current) => {
                warn!(
                    request = %request_id,
                    expected = %from,
                    found = %current,
                    "status changed concurrently"
                );
                return Err(DispatchError::Conflict);
            }
        };

        publish_quietly(
            self.publisher.as_ref(),
            ChannelKey::Request(updated.id.clone()),
            DispatchEvent::RequestStatusUpdated {
                request_id: updated.id.clone(),
                status: updated.status,
                eta: updated.eta,
                pricing_estimate: updated.pricing_estimate.clone(),
            },
        );

        record_quietly(
            self.store.as_ref(),
            AuditEntry::new(
                updated.id.clone(),
                AuditAction::StatusChange,
                principal.clone(),
                AuditMeta::StatusChanged {
                    from,
                    to: updated.status,
                },
                now,
            ),
        );

        info!(request = %updated.id, %from, to = %updated.status, by = %principal, "status updated");
        Ok(updated)
    }

    /// Relay the assigned provider's live position to the request channel. Positions are not
    /// stored.
    pub fn share_location(
        &self,
        principal: &Principal,
        request_id: &RequestId,
        position: GeoPoint,
    ) -> Result<bool, DispatchError> {
        let provider_id = provider_of(principal)?;
        if !position.is_valid() {
            return Err(DispatchError::Validation(format!(
                "coordinates out of range: ({}, {})",
                position.lat, position.lng
            )));
        }

        let request = self.fetch(request_id)?;
        if !request.is_assigned_to(provider_id) {
            return Err(DispatchError::Forbidden("only the assigned provider can share location"));
        }
        if !matches!(
            request.status,
            RequestStatus::Accepted | RequestStatus::InProgress
        ) {
            return Err(DispatchError::Validation(format!(
                "location sharing is closed for {} requests",
                request.status
            )));
        }

        Ok(publish_quietly(
            self.publisher.as_ref(),
            ChannelKey::Request(request.id.clone()),
            DispatchEvent::ProviderLocationUpdate {
                request_id: request.id,
                provider_id: provider_id.clone(),
                lat: position.lat,
                lng: position.lng,
                timestamp: Utc::now(),
            },
        ))
    }

    /// Full request for the requester, the assigned provider, or any notified candidate.
    pub fn request_details(
        &self,
        principal: &Principal,
        request_id: &RequestId,
    ) -> Result<ServiceRequest, DispatchError> {
        let request = self.fetch(request_id)?;
        if !request.is_visible_to(principal) {
            return Err(DispatchError::Forbidden("access denied"));
        }
        Ok(request)
    }

    /// The caller's own requests, newest first. `page` starts at 1.
    pub fn list_my_requests(
        &self,
        principal: &Principal,
        status: Option<RequestStatus>,
        page: usize,
        limit: usize,
    ) -> Result<Page<ServiceRequest>, DispatchError> {
        let requester_id = requester_of(principal)?;
        if page == 0 {
            return Err(DispatchError::Validation("page starts at 1".to_string()));
        }
        if limit == 0 || limit > MAX_PAGE_SIZE {
            return Err(DispatchError::Validation(format!(
                "limit must be between 1 and {MAX_PAGE_SIZE}"
            )));
        }

        let offset = (page - 1) * limit;
        let (items, total) = self
            .store
            .for_requester(requester_id, status, offset, limit)?;
        Ok(Page {
            items,
            page,
            limit,
            total,
            pages: total.div_ceil(limit),
        })
    }

    /// Pending requests the provider was offered, or its assigned requests in `status`.
    pub fn provider_queue(
        &self,
        principal: &Principal,
        status: RequestStatus,
    ) -> Result<Vec<QueuedRequest>, DispatchError> {
        let provider_id = provider_of(principal)?;
        let provider = self
            .store
            .provider(provider_id)?
            .ok_or(DispatchError::NotFound("provider"))?;

        let requests = if status == RequestStatus::Pending {
            self.store
                .pending_for_candidate(provider_id, PROVIDER_QUEUE_LIMIT)?
        } else {
            self.store
                .assigned_to(provider_id, status, PROVIDER_QUEUE_LIMIT)?
        };

        let origin = provider.location.point();
        Ok(requests
            .into_iter()
            .map(|request| {
                let distance_km = round_km(haversine_km(origin, request.location.point()));
                QueuedRequest {
                    request,
                    distance_km,
                }
            })
            .collect())
    }

    /// Diagnostic view of who would be matched around a point.
    pub fn nearby_providers(
        &self,
        origin: GeoPoint,
        radius_km: Option<f64>,
        class: Option<VehicleClass>,
    ) -> Result<Vec<Candidate>, DispatchError> {
        let config = self.selector.config();
        let radius_km = radius_km.unwrap_or(config.radius_km);
        self.selector
            .select_within(class, origin, radius_km, usize::MAX, Utc::now())
    }

    fn fetch(&self, request_id: &RequestId) -> Result<ServiceRequest, DispatchError> {
        self.store
            .fetch(request_id)?
            .ok_or(DispatchError::NotFound("request"))
    }
}

pub(crate) fn requester_of(principal: &Principal) -> Result<&RequesterId, DispatchError> {
    match principal {
        Principal::Requester(id) => Ok(id),
        Principal::Provider(_) => Err(DispatchError::Forbidden("requester access only")),
    }
}

pub(crate) fn provider_of(principal: &Principal) -> Result<&ProviderId, DispatchError> {
    match principal {
        Principal::Provider(id) => Ok(id),
        Principal::Requester(_) => Err(DispatchError::Forbidden("provider access only")),
    }
}

fn validate_draft(draft: &NewServiceRequest) -> Result<(), DispatchError> {
    if draft.description.trim().is_empty() {
        return Err(DispatchError::Validation(
            "description must not be empty".to_string(),
        ));
    }
    if draft.location.address.trim().is_empty() {
        return Err(DispatchError::Validation(
            "location address must not be empty".to_string(),
        ));
    }
    if !draft.location.point().is_valid() {
        return Err(DispatchError::Validation(format!(
            "coordinates out of range: ({}, {})",
            draft.location.lat, draft.location.lng
        )));
    }
    Ok(())
}
