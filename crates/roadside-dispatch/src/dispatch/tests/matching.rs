use super::common::*;
use chrono::{Duration, Utc};
use std::sync::Arc;

use crate::dispatch::domain::{GeoPoint, ProviderId, SubscriptionStatus, VehicleClass};
use crate::dispatch::error::DispatchError;
use crate::dispatch::matching::{haversine_km, rank, Candidate, CandidateSelector, MatchingConfig};
use crate::dispatch::memory::InMemoryStore;

fn ids(candidates: &[Candidate]) -> Vec<&str> {
    candidates
        .iter()
        .map(|candidate| candidate.provider.id.0.as_str())
        .collect()
}

fn candidate(id: &str, km: f64, rating: f64, sponsored: bool) -> Candidate {
    let mut provider = provider(id, km, rating);
    provider.is_sponsored = sponsored;
    Candidate {
        provider,
        distance_km: km,
    }
}

fn selector_over(store: Arc<InMemoryStore>) -> CandidateSelector<InMemoryStore> {
    CandidateSelector::new(store, MatchingConfig::default())
}

#[test]
fn haversine_matches_known_city_distance() {
    let sitabuldi = GeoPoint::new(21.1458, 79.0882);
    let dharampeth = GeoPoint::new(21.1565, 79.0950);

    let km = haversine_km(sitabuldi, dharampeth);

    assert!((km - 1.38).abs() < 0.05, "unexpected distance {km}");
    assert!((haversine_km(dharampeth, sitabuldi) - km).abs() < 1e-9);
    assert_eq!(haversine_km(sitabuldi, sitabuldi), 0.0);
}

#[test]
fn rating_wins_inside_the_tie_window() {
    let ranked = rank(vec![
        candidate("near", 2.0, 4.0, false),
        candidate("rated", 2.4, 4.8, false),
    ]);
    assert_eq!(ids(&ranked), vec!["rated", "near"]);
}

#[test]
fn distance_wins_outside_the_tie_window() {
    let ranked = rank(vec![
        candidate("far", 4.0, 5.0, false),
        candidate("near", 2.0, 3.5, false),
    ]);
    assert_eq!(ids(&ranked), vec!["near", "far"]);
}

#[test]
fn sponsored_providers_lead_regardless_of_distance() {
    let ranked = rank(vec![
        candidate("close", 1.0, 4.9, false),
        candidate("promoted", 8.0, 3.0, true),
    ]);
    assert_eq!(ids(&ranked), vec!["promoted", "close"]);
}

#[test]
fn ranking_is_independent_of_input_order() {
    let pool = vec![
        candidate("ws-1", 0.9, 4.1, false),
        candidate("ws-2", 1.2, 4.6, false),
        candidate("ws-3", 1.35, 4.6, false),
        candidate("ws-4", 1.7, 3.0, false),
        candidate("ws-5", 5.0, 4.0, true),
    ];
    let mut reversed = pool.clone();
    reversed.reverse();

    let forward = rank(pool);
    let backward = rank(reversed);

    assert_eq!(ids(&forward), ids(&backward));
    assert_eq!(ids(&forward), vec!["ws-5", "ws-2", "ws-3", "ws-1", "ws-4"]);
}

#[test]
fn select_filters_ineligible_providers() {
    let store = Arc::new(InMemoryStore::new());
    store.put_provider(provider("ok", 2.0, 4.0));

    let mut offline = provider("offline", 1.0, 4.0);
    offline.is_online = false;
    store.put_provider(offline);

    let mut lapsed = provider("lapsed", 1.0, 4.0);
    lapsed.subscription.expiry = Some(Utc::now() - Duration::hours(1));
    store.put_provider(lapsed);

    let mut suspended = provider("suspended", 1.0, 4.0);
    suspended.subscription.status = SubscriptionStatus::Inactive;
    store.put_provider(suspended);

    let mut trucks_only = provider("ev-only", 1.0, 4.0);
    trucks_only.vehicle_classes = [VehicleClass::Electric].into();
    store.put_provider(trucks_only);

    store.put_provider(provider("distant", 10.5, 5.0));

    let selected = selector_over(store)
        .select(VehicleClass::FourWheeler, origin(), Utc::now())
        .expect("selection runs");

    assert_eq!(ids(&selected), vec!["ok"]);
    assert_eq!(selected[0].distance_km, 2.0);
}

#[test]
fn select_includes_providers_on_the_radius_edge() {
    let store = Arc::new(InMemoryStore::new());
    store.put_provider(provider("edge", 10.0, 4.0));

    let selected = selector_over(store)
        .select(VehicleClass::TwoWheeler, origin(), Utc::now())
        .expect("selection runs");

    assert_eq!(ids(&selected), vec!["edge"]);
}

#[test]
fn select_caps_candidates_at_the_limit() {
    let store = Arc::new(InMemoryStore::new());
    for index in 0..5 {
        store.put_provider(provider(&format!("ws-{index}"), 1.0 + index as f64, 4.0));
    }
    let selector = CandidateSelector::new(
        store,
        MatchingConfig {
            radius_km: 10.0,
            limit: 3,
        },
    );

    let selected = selector
        .select(VehicleClass::FourWheeler, origin(), Utc::now())
        .expect("selection runs");

    assert_eq!(ids(&selected), vec!["ws-0", "ws-1", "ws-2"]);
}

#[test]
fn select_with_nobody_nearby_is_empty_not_an_error() {
    let selected = selector_over(Arc::new(InMemoryStore::new()))
        .select(VehicleClass::ThreeWheeler, origin(), Utc::now())
        .expect("selection runs");
    assert!(selected.is_empty());
}

#[test]
fn select_rejects_bad_coordinates_and_radius() {
    let selector = selector_over(seeded_store());
    let now = Utc::now();

    match selector.select_within(None, GeoPoint::new(91.0, 0.0), 5.0, 10, now) {
        Err(DispatchError::Validation(_)) => {}
        other => panic!("expected validation error, got {other:?}"),
    }
    match selector.select_within(None, origin(), 0.0, 10, now) {
        Err(DispatchError::Validation(_)) => {}
        other => panic!("expected validation error, got {other:?}"),
    }
}

#[test]
fn repeated_selection_is_deterministic() {
    let store = seeded_store();
    store.put_provider(provider("ws-d", 1.2, 4.9));
    let selector = selector_over(store);
    let now = Utc::now();

    let first = selector
        .select(VehicleClass::FourWheeler, origin(), now)
        .expect("selection runs");
    let second = selector
        .select(VehicleClass::FourWheeler, origin(), now)
        .expect("selection runs");

    assert_eq!(first, second);
    assert_eq!(first[0].provider.id, ProviderId::from("ws-d"));
}
