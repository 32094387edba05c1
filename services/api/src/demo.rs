use crate::infra::{seed_demo_city, DEMO_REQUESTER, DEMO_VEHICLE};
use clap::Args;
use roadside_dispatch::config::DispatchConfig;
use roadside_dispatch::dispatch::{
    BroadcastHub, ChannelKey, DispatchApi, DispatchError, DispatchEvent, GeoPoint, InMemoryStore,
    IssueCategory, Location, MembershipLedger, NewServiceRequest, Notification, PaymentMode,
    PricingEstimate, Principal, ProviderDirectory, RequestStatus, RequesterId, StatusChange,
    VehicleClass, VehicleId,
};
use roadside_dispatch::error::AppError;
use std::sync::Arc;
use tokio::sync::broadcast::Receiver;

type DemoApi = DispatchApi<InMemoryStore, BroadcastHub>;

#[derive(Args, Debug)]
pub(crate) struct DemoArgs {
    /// Breakdown latitude (defaults to Sitabuldi, Nagpur)
    #[arg(long, default_value_t = 21.1458)]
    pub(crate) lat: f64,
    /// Breakdown longitude
    #[arg(long, default_value_t = 79.0882)]
    pub(crate) lng: f64,
    /// Print each fanned-out event as a JSON line
    #[arg(long)]
    pub(crate) json: bool,
}

#[derive(Args, Debug)]
pub(crate) struct NearbyArgs {
    #[arg(long, default_value_t = 21.1458)]
    pub(crate) lat: f64,
    #[arg(long, default_value_t = 79.0882)]
    pub(crate) lng: f64,
    /// Search radius in kilometres (defaults to the configured matching radius)
    #[arg(long)]
    pub(crate) radius: Option<f64>,
    /// Only workshops servicing this class: 2W, 3W, 4W or EV
    #[arg(long)]
    pub(crate) class: Option<VehicleClass>,
}

fn demo_api() -> (Arc<InMemoryStore>, Arc<BroadcastHub>, DemoApi) {
    let store = Arc::new(InMemoryStore::new());
    seed_demo_city(&store);
    let hub = Arc::new(BroadcastHub::default());
    let api = DispatchApi::new(store.clone(), hub.clone(), &DispatchConfig::default());
    (store, hub, api)
}

pub(crate) fn run_nearby(args: NearbyArgs) -> Result<(), AppError> {
    let (_, _, api) = demo_api();
    let candidates =
        api.coordinator
            .nearby_providers(GeoPoint::new(args.lat, args.lng), args.radius, args.class)?;

    println!(
        "Workshops around ({:.4}, {:.4}){}",
        args.lat,
        args.lng,
        args.class
            .map(|class| format!(" servicing {class}"))
            .unwrap_or_default()
    );
    if candidates.is_empty() {
        println!("  none in range");
        return Ok(());
    }
    for (rank, candidate) in candidates.iter().enumerate() {
        let provider = &candidate.provider;
        println!(
            "  {:>2}. {:<26} {:>6.2} km  rating {:.1}{}",
            rank + 1,
            provider.name,
            candidate.distance_km,
            provider.rating.average,
            if provider.is_sponsored { "  [sponsored]" } else { "" }
        );
    }
    Ok(())
}

pub(crate) async fn run_demo(args: DemoArgs) -> Result<(), AppError> {
    let (store, hub, api) = demo_api();
    let driver = Principal::Requester(RequesterId::from(DEMO_REQUESTER));

    let mut offer_inboxes: Vec<Receiver<Notification>> = store
        .online_providers(None)
        .map_err(DispatchError::from)?
        .iter()
        .map(|provider| hub.subscribe(&ChannelKey::Provider(provider.id.clone())))
        .collect();
    let mut driver_inbox = hub.subscribe(&ChannelKey::Requester(RequesterId::from(DEMO_REQUESTER)));

    println!("Roadside dispatch demo");
    let created = api.coordinator.create_request(
        &driver,
        NewServiceRequest {
            vehicle_id: VehicleId::from(DEMO_VEHICLE),
            issue: IssueCategory::Battery,
            description: "Hatchback will not crank, dashboard lights flicker".to_string(),
            attachments: Vec::new(),
            location: Location {
                lat: args.lat,
                lng: args.lng,
                address: "Breakdown point".to_string(),
            },
        },
    )?;
    let request_id = created.request.id.clone();
    println!(
        "\nRequest {request_id} opened; {} workshop(s) notified",
        created.notified_providers
    );
    for inbox in &mut offer_inboxes {
        drain(inbox, args.json);
    }

    if created.request.notified_providers.is_empty() {
        println!("No workshop in range; the requester would widen the search or call support.");
        return Ok(());
    }

    println!("\nEvery notified workshop taps accept at once:");
    let contenders: Vec<Principal> = created
        .request
        .notified_providers
        .iter()
        .cloned()
        .map(Principal::Provider)
        .collect();
    let outcomes: Vec<(Principal, Result<_, DispatchError>)> = std::thread::scope(|scope| {
        let handles: Vec<_> = contenders
            .iter()
            .map(|principal| {
                let api = &api;
                let request_id = &request_id;
                scope.spawn(move || {
                    (
                        principal.clone(),
                        api.coordinator
                            .accept_request(principal, request_id, Default::default()),
                    )
                })
            })
            .collect();
        handles
            .into_iter()
            .filter_map(|handle| handle.join().ok())
            .collect()
    });

    let mut winner = None;
    for (principal, outcome) in outcomes {
        match outcome {
            Ok(_) => {
                println!("  {principal}: won the request");
                winner = Some(principal);
            }
            Err(err) => println!("  {principal}: {err}"),
        }
    }
    let Some(winner) = winner else {
        println!("Nobody could take the request.");
        return Ok(());
    };
    drain(&mut driver_inbox, args.json);

    let mut room = hub.subscribe(&ChannelKey::Request(request_id.clone()));
    api.coordinator
        .share_location(&winner, &request_id, GeoPoint::new(args.lat + 0.004, args.lng))?;
    api.chat
        .post_message(&driver, &request_id, "White i20 outside the bank, hazards on")?;
    api.chat
        .post_message(&winner, &request_id, "Spotted you, two minutes away")?;

    let mut start = StatusChange::to(RequestStatus::InProgress);
    start.pricing_estimate = Some(PricingEstimate {
        labor: 250.0,
        parts: 4200.0,
        travel: 150.0,
        total: 4600.0,
        notes: Some("replace 35Ah battery".to_string()),
    });
    api.coordinator.update_status(&winner, &request_id, start)?;

    let mut finish = StatusChange::to(RequestStatus::Completed);
    finish.payment_mode = Some(PaymentMode::Upi);
    let completed = api.coordinator.update_status(&winner, &request_id, finish)?;

    println!("\nRequest room traffic:");
    drain(&mut room, args.json);

    let remaining = store
        .requester(&RequesterId::from(DEMO_REQUESTER))
        .map_err(DispatchError::from)?
        .map(|requester| requester.membership.remaining())
        .unwrap_or_default();
    println!(
        "\nFinal state: {} (paid: {}), {} audit entries, {} request(s) left on the plan",
        completed.status,
        completed.is_paid,
        store.audit_entries().len(),
        remaining
    );
    Ok(())
}

fn drain(inbox: &mut Receiver<Notification>, as_json: bool) {
    while let Ok(notification) = inbox.try_recv() {
        if as_json {
            match serde_json::to_string(&notification) {
                Ok(line) => println!("{line}"),
                Err(err) => println!("  <unprintable event: {err}>"),
            }
        } else {
            println!("  [{}] {}", notification.channel, describe(&notification.event));
        }
    }
}

fn describe(event: &DispatchEvent) -> String {
    match event {
        DispatchEvent::NewRequest {
            request,
            distance_km,
        } => format!(
            "new request {} for a {} ({distance_km:.2} km away)",
            request.id, request.vehicle_class
        ),
        DispatchEvent::RequestAccepted { provider, eta, .. } => format!(
            "{} accepted{}",
            provider.name,
            eta.map(|eta| format!(", eta {}", eta.format("%H:%M")))
                .unwrap_or_default()
        ),
        DispatchEvent::RequestStatusUpdated {
            status,
            pricing_estimate,
            ..
        } => format!(
            "status -> {status}{}",
            pricing_estimate
                .as_ref()
                .map(|estimate| format!(" (estimate INR {:.0})", estimate.total))
                .unwrap_or_default()
        ),
        DispatchEvent::ReceiveMessage { message, .. } => {
            format!("{}: {}", message.sender_name, message.text)
        }
        DispatchEvent::ProviderLocationUpdate {
            provider_id,
            lat,
            lng,
            ..
        } => format!("{provider_id} is at ({lat:.4}, {lng:.4})"),
    }
}
