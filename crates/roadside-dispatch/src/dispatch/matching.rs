use std::cmp::Ordering;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tracing::{debug, info};

use super::domain::{GeoPoint, Provider, VehicleClass};
use super::error::DispatchError;
use super::repository::ProviderDirectory;

pub const EARTH_RADIUS_KM: f64 = 6371.0;

/// Providers whose distances differ by at most this much compete on rating instead.
pub const RATING_TIE_WINDOW_KM: f64 = 0.5;

const WINDOW_EPSILON: f64 = 1e-9;

/// Search radius and candidate cap applied when a request is created.
#[derive(Debug, Clone, PartialEq)]
pub struct MatchingConfig {
    pub radius_km: f64,
    pub limit: usize,
}

impl Default for MatchingConfig {
    fn default() -> Self {
        Self {
            radius_km: 10.0,
            limit: 10,
        }
    }
}

/// Great-circle distance in kilometres.
pub fn haversine_km(from: GeoPoint, to: GeoPoint) -> f64 {
    let d_lat = (to.lat - from.lat).to_radians();
    let d_lng = (to.lng - from.lng).to_radians();
    let a = (d_lat / 2.0).sin().powi(2)
        + from.lat.to_radians().cos() * to.lat.to_radians().cos() * (d_lng / 2.0).sin().powi(2);
    let c = 2.0 * a.sqrt().atan2((1.0 - a).sqrt());
    EARTH_RADIUS_KM * c
}

/// Distances are reported and ranked at 10 m resolution.
pub fn round_km(km: f64) -> f64 {
    (km * 100.0).round() / 100.0
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Candidate {
    pub provider: Provider,
    pub distance_km: f64,
}

/// Online, subscribed past `now`, and servicing `class` when one is given.
pub fn is_eligible(provider: &Provider, class: Option<VehicleClass>, now: DateTime<Utc>) -> bool {
    provider.is_online
        && provider.subscription.is_active_at(now)
        && class.map_or(true, |class| provider.vehicle_classes.contains(&class))
}

/// Orders candidates: sponsored first; then, inside each group, nearest first except that
/// providers within [`RATING_TIE_WINDOW_KM`] of a window's nearest member are ordered by
/// rating. Windows are anchored greedily from the nearest remaining provider, which keeps the
/// ordering total and stable for a fixed input.
pub fn rank(mut candidates: Vec<Candidate>) -> Vec<Candidate> {
    candidates.sort_by(by_distance);
    let (sponsored, regular): (Vec<_>, Vec<_>) = candidates
        .into_iter()
        .partition(|candidate| candidate.provider.is_sponsored);

    let mut ranked = rank_group(sponsored);
    ranked.extend(rank_group(regular));
    ranked
}

fn rank_group(sorted: Vec<Candidate>) -> Vec<Candidate> {
    let mut ranked = Vec::with_capacity(sorted.len());
    let mut window: Vec<Candidate> = Vec::new();
    let mut anchor: Option<f64> = None;

    for candidate in sorted {
        match anchor {
            Some(start)
                if candidate.distance_km - start <= RATING_TIE_WINDOW_KM + WINDOW_EPSILON =>
            {
                window.push(candidate);
            }
            _ => {
                flush_window(&mut window, &mut ranked);
                anchor = Some(candidate.distance_km);
                window.push(candidate);
            }
        }
    }
    flush_window(&mut window, &mut ranked);
    ranked
}

fn flush_window(window: &mut Vec<Candidate>, ranked: &mut Vec<Candidate>) {
    window.sort_by(|a, b| {
        b.provider
            .rating
            .average
            .total_cmp(&a.provider.rating.average)
            .then_with(|| by_distance(a, b))
    });
    ranked.append(window);
}

fn by_distance(a: &Candidate, b: &Candidate) -> Ordering {
    a.distance_km
        .total_cmp(&b.distance_km)
        .then_with(|| a.provider.id.cmp(&b.provider.id))
}

/// Geospatial and capability filter over the provider directory.
pub struct CandidateSelector<P> {
    directory: Arc<P>,
    config: MatchingConfig,
}

impl<P> CandidateSelector<P>
where
    P: ProviderDirectory + 'static,
{
    pub fn new(directory: Arc<P>, config: MatchingConfig) -> Self {
        Self { directory, config }
    }

    pub fn config(&self) -> &MatchingConfig {
        &self.config
    }

    /// Candidates for a new request, using the configured radius and limit.
    pub fn select(
        &self,
        class: VehicleClass,
        origin: GeoPoint,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candidate>, DispatchError> {
        self.select_within(Some(class), origin, self.config.radius_km, self.config.limit, now)
    }

    pub fn select_within(
        &self,
        class: Option<VehicleClass>,
        origin: GeoPoint,
        radius_km: f64,
        limit: usize,
        now: DateTime<Utc>,
    ) -> Result<Vec<Candidate>, DispatchError> {
        if !origin.is_valid() {
            return Err(DispatchError::Validation(format!(
                "coordinates out of range: ({}, {})",
                origin.lat, origin.lng
            )));
        }
        if !(radius_km.is_finite() && radius_km > 0.0) {
            return Err(DispatchError::Validation(
                "radius must be a positive number of kilometres".to_string(),
            ));
        }

        let providers = self.directory.online_providers(class)?;
        let in_range: Vec<Candidate> = providers
            .into_iter()
            .filter(|provider| is_eligible(provider, class, now))
            .map(|provider| {
                let distance_km = round_km(haversine_km(origin, provider.location.point()));
                Candidate {
                    provider,
                    distance_km,
                }
            })
            .filter(|candidate| candidate.distance_km <= radius_km)
            .collect();

        if in_range.is_empty() {
            info!(?class, radius_km, "no eligible providers in range");
            return Ok(Vec::new());
        }

        let mut ranked = rank(in_range);
        ranked.truncate(limit);
        debug!(
            ?class,
            radius_km,
            matched = ranked.len(),
            "ranked candidate providers"
        );
        Ok(ranked)
    }
}
