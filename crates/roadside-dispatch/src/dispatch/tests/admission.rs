use super::common::*;
use chrono::{Duration, Utc};
use std::sync::{Arc, Barrier};

use crate::dispatch::admission::{AdmissionController, QuotaDenial};
use crate::dispatch::domain::{MembershipPlan, RequesterId};
use crate::dispatch::error::DispatchError;
use crate::dispatch::memory::InMemoryStore;
use crate::dispatch::repository::MembershipLedger;

#[test]
fn free_tier_admits_until_the_trial_is_used() {
    let now = Utc::now();
    assert_eq!(membership(MembershipPlan::Free, 2, 3).admission(now), Ok(()));
    assert_eq!(
        membership(MembershipPlan::Free, 3, 3).admission(now),
        Err(QuotaDenial::TrialExhausted)
    );
}

#[test]
fn free_tier_ignores_expiry() {
    let now = Utc::now();
    let mut free = membership(MembershipPlan::Free, 0, 3);
    free.expiry = now - Duration::days(400);

    assert!(free.can_create_request(now));
}

#[test]
fn paid_plans_need_time_and_allowance_left() {
    let now = Utc::now();
    assert!(membership(MembershipPlan::Basic, 4, 5).can_create_request(now));

    let used_up = membership(MembershipPlan::Premium, 5, 5);
    assert_eq!(used_up.admission(now), Err(QuotaDenial::NoActivePlan));

    let mut lapsed = membership(MembershipPlan::Basic, 0, 5);
    lapsed.expiry = now - Duration::minutes(1);
    assert_eq!(lapsed.admission(now), Err(QuotaDenial::NoActivePlan));

    let mut last_instant = membership(MembershipPlan::Basic, 0, 5);
    last_instant.expiry = now;
    assert!(last_instant.can_create_request(now));
}

#[test]
fn unsubscribed_requesters_are_never_admitted() {
    let none = membership(MembershipPlan::Unsubscribed, 0, 10);
    assert_eq!(none.admission(Utc::now()), Err(QuotaDenial::NoActivePlan));
}

#[test]
fn reset_quota_restores_the_full_allowance() {
    let now = Utc::now();
    let mut exhausted = membership(MembershipPlan::Basic, 5, 5);
    exhausted.reset_quota(now);

    assert_eq!(exhausted.requests_used, 0);
    assert_eq!(exhausted.remaining(), 5);
    assert_eq!(exhausted.last_reset_date, now);
}

#[test]
fn admit_consumes_exactly_one_slot() {
    let store = seeded_store();
    let controller = AdmissionController::new(store.clone());
    let id = RequesterId::from(REQUESTER);

    let consumed = controller.admit(&id, Utc::now()).expect("admitted");

    assert_eq!(consumed.requests_used, 1);
    let stored = store.requester(&id).expect("ledger").expect("present");
    assert_eq!(stored.membership.requests_used, 1);
}

#[test]
fn denied_admission_leaves_the_counter_alone() {
    let store = Arc::new(InMemoryStore::new());
    store.put_requester(requester("usr-9", membership(MembershipPlan::Free, 3, 3)));
    let controller = AdmissionController::new(store.clone());
    let id = RequesterId::from("usr-9");

    match controller.admit(&id, Utc::now()) {
        Err(DispatchError::QuotaExceeded(QuotaDenial::TrialExhausted)) => {}
        other => panic!("expected trial exhausted, got {other:?}"),
    }
    let stored = store.requester(&id).expect("ledger").expect("present");
    assert_eq!(stored.membership.requests_used, 3);
}

#[test]
fn unknown_requester_is_not_found() {
    let controller = AdmissionController::new(Arc::new(InMemoryStore::new()));
    match controller.can_create_request(&RequesterId::from("ghost"), Utc::now()) {
        Err(DispatchError::NotFound("requester")) => {}
        other => panic!("expected not found, got {other:?}"),
    }
}

#[test]
fn concurrent_admissions_never_exceed_the_allowance() {
    const CALLERS: usize = 16;
    let store = Arc::new(InMemoryStore::new());
    store.put_requester(requester("usr-race", membership(MembershipPlan::Free, 0, 3)));
    let controller = AdmissionController::new(store.clone());
    let id = RequesterId::from("usr-race");
    let barrier = Barrier::new(CALLERS);
    let now = Utc::now();

    let outcomes: Vec<_> = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    controller.admit(&id, now)
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("caller thread"))
            .collect()
    });

    let admitted = outcomes.iter().filter(|outcome| outcome.is_ok()).count();
    assert_eq!(admitted, 3);
    assert!(outcomes.iter().all(|outcome| matches!(
        outcome,
        Ok(_) | Err(DispatchError::QuotaExceeded(QuotaDenial::TrialExhausted))
    )));
    let stored = store.requester(&id).expect("ledger").expect("present");
    assert_eq!(stored.membership.requests_used, 3);
}

#[test]
fn heavy_contention_on_a_roomy_plan_admits_every_caller() {
    const CALLERS: usize = 32;
    const ROUNDS: usize = 20;
    let store = Arc::new(InMemoryStore::new());
    store.put_requester(requester(
        "usr-fleet",
        membership(MembershipPlan::Premium, 0, 1_000),
    ));
    let controller = AdmissionController::new(store.clone());
    let id = RequesterId::from("usr-fleet");
    let barrier = Barrier::new(CALLERS);
    let now = Utc::now();

    let failures: usize = std::thread::scope(|scope| {
        let handles: Vec<_> = (0..CALLERS)
            .map(|_| {
                scope.spawn(|| {
                    barrier.wait();
                    (0..ROUNDS)
                        .filter(|_| controller.admit(&id, now).is_err())
                        .count()
                })
            })
            .collect();
        handles
            .into_iter()
            .map(|handle| handle.join().expect("caller thread"))
            .sum()
    });

    assert_eq!(failures, 0);
    let stored = store.requester(&id).expect("ledger").expect("present");
    assert_eq!(stored.membership.requests_used, (CALLERS * ROUNDS) as u32);
}

#[test]
fn release_hands_back_one_slot_and_stops_at_zero() {
    let store = seeded_store();
    let controller = AdmissionController::new(store.clone());
    let id = RequesterId::from(REQUESTER);

    controller.admit(&id, Utc::now()).expect("admitted");
    controller.release(&id).expect("released");
    controller.release(&id).expect("released again");

    let stored = store.requester(&id).expect("ledger").expect("present");
    assert_eq!(stored.membership.requests_used, 0);
}

#[test]
fn counter_never_moves_past_the_limit() {
    let store = InMemoryStore::new();
    store.put_requester(requester("usr-edge", membership(MembershipPlan::Free, 2, 3)));
    let id = RequesterId::from("usr-edge");

    assert_eq!(store.increment_requests_below(&id, 3).expect("ledger"), Some(3));
    assert_eq!(store.increment_requests_below(&id, 3).expect("ledger"), None);
}
