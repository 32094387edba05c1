use chrono::{Duration, Utc};
use metrics_exporter_prometheus::PrometheusHandle;
use roadside_dispatch::dispatch::{
    InMemoryStore, IssueCategory, Location, Membership, MembershipPlan, Provider, ProviderId,
    ProviderSubscription, Rating, Requester, RequesterId, SubscriptionStatus, Vehicle,
    VehicleClass, VehicleId,
};
use std::collections::BTreeSet;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

pub(crate) const DEMO_REQUESTER: &str = "usr-asha";
pub(crate) const DEMO_VEHICLE: &str = "veh-asha-i20";

#[derive(Clone)]
pub(crate) struct AppState {
    pub(crate) readiness: Arc<AtomicBool>,
    pub(crate) metrics: Arc<PrometheusHandle>,
}

struct WorkshopSeed {
    id: &'static str,
    name: &'static str,
    lat: f64,
    lng: f64,
    address: &'static str,
    rating: f64,
    classes: &'static [VehicleClass],
    sponsored: bool,
    online: bool,
}

const WORKSHOPS: &[WorkshopSeed] = &[
    WorkshopSeed {
        id: "ws-dharampeth",
        name: "Dharampeth Auto Care",
        lat: 21.1565,
        lng: 79.0950,
        address: "West High Court Rd, Dharampeth",
        rating: 4.3,
        classes: &[VehicleClass::FourWheeler, VehicleClass::Electric],
        sponsored: false,
        online: true,
    },
    WorkshopSeed {
        id: "ws-sadar",
        name: "Sadar Service Point",
        lat: 21.1610,
        lng: 79.0800,
        address: "Mount Rd, Sadar",
        rating: 4.7,
        classes: &[VehicleClass::TwoWheeler, VehicleClass::FourWheeler],
        sponsored: false,
        online: true,
    },
    WorkshopSeed {
        id: "ws-manish-nagar",
        name: "Manish Nagar Motors",
        lat: 21.0900,
        lng: 79.0700,
        address: "Manish Nagar Main Rd",
        rating: 3.9,
        classes: &[VehicleClass::FourWheeler],
        sponsored: true,
        online: true,
    },
    WorkshopSeed {
        id: "ws-itwari",
        name: "Itwari Two Wheelers",
        lat: 21.1530,
        lng: 79.1100,
        address: "Itwari Bazaar",
        rating: 4.8,
        classes: &[VehicleClass::TwoWheeler, VehicleClass::ThreeWheeler],
        sponsored: false,
        online: true,
    },
    WorkshopSeed {
        id: "ws-kamptee",
        name: "Kamptee Highway Garage",
        lat: 21.2200,
        lng: 79.2000,
        address: "NH44, Kamptee",
        rating: 4.9,
        classes: &[VehicleClass::FourWheeler],
        sponsored: false,
        online: true,
    },
    WorkshopSeed {
        id: "ws-civil-lines",
        name: "Civil Lines Garage",
        lat: 21.1500,
        lng: 79.0750,
        address: "Civil Lines",
        rating: 4.5,
        classes: &[VehicleClass::FourWheeler],
        sponsored: false,
        online: false,
    },
];

/// Loads the Nagpur demo city: one basic-plan requester with a hatchback and a handful of
/// workshops around Sitabuldi.
pub(crate) fn seed_demo_city(store: &InMemoryStore) {
    let now = Utc::now();
    store.put_requester(Requester {
        id: RequesterId::from(DEMO_REQUESTER),
        name: "Asha Kulkarni".to_string(),
        phone: "+91-98220-11223".to_string(),
        membership: Membership {
            plan: MembershipPlan::Basic,
            requests_used: 0,
            max_requests: 5,
            expiry: now + Duration::days(30),
            last_reset_date: now,
        },
    });
    store.put_vehicle(Vehicle {
        id: VehicleId::from(DEMO_VEHICLE),
        owner: RequesterId::from(DEMO_REQUESTER),
        class: VehicleClass::FourWheeler,
        brand: "Hyundai".to_string(),
        model: "i20".to_string(),
        registration_number: "MH31CD5678".to_string(),
        is_active: true,
    });

    for seed in WORKSHOPS {
        store.put_provider(Provider {
            id: ProviderId::from(seed.id),
            name: seed.name.to_string(),
            phone: "+91-71200-00000".to_string(),
            location: Location {
                lat: seed.lat,
                lng: seed.lng,
                address: seed.address.to_string(),
            },
            vehicle_classes: seed.classes.iter().copied().collect(),
            services_offered: BTreeSet::from([
                IssueCategory::Battery,
                IssueCategory::FlatTire,
                IssueCategory::JumpStart,
            ]),
            is_online: seed.online,
            subscription: ProviderSubscription {
                status: SubscriptionStatus::Active,
                expiry: Some(now + Duration::days(90)),
            },
            rating: Rating {
                average: seed.rating,
                count: 25,
            },
            is_sponsored: seed.sponsored,
        });
    }
}
