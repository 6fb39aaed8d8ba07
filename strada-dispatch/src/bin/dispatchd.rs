use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};
use uuid::Uuid;

use strada_core::{DriverDirectory, RequestRepository, TripRepository};
use strada_dispatch::DispatchService;
use strada_shared::{Coordinates, DriverProfile};
use strada_store::{
    AppConfig, ExpirySweeper, InMemoryDriverDirectory, InMemoryRequestRepository,
    InMemoryTripRepository,
};

/// Demo wiring: seeds a few drivers, dispatches one trip against an
/// auto-accepting driver, and prints the outcome.
#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "strada_dispatch=debug,strada_store=info".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = AppConfig::load().unwrap_or_default();
    tracing::info!(?config, "starting strada dispatch engine");

    let trips = Arc::new(InMemoryTripRepository::new());
    let requests = Arc::new(InMemoryRequestRepository::new());
    let directory = Arc::new(InMemoryDriverDirectory::new());

    let pickup = Coordinates::new(52.5200, 13.4050);
    for (name, km) in [("ada", 1.2), ("grace", 3.4), ("edsger", 5.0)] {
        directory.upsert(DriverProfile {
            id: Uuid::new_v4(),
            name: name.into(),
            rating: 4.8,
            online: true,
            approved: true,
            active: true,
            location: Coordinates::new(pickup.lat + km / 111.19, pickup.lon),
            region: "berlin".into(),
        })?;
    }

    let service = Arc::new(DispatchService::new(
        Arc::clone(&trips) as Arc<dyn TripRepository>,
        Arc::clone(&requests) as Arc<dyn RequestRepository>,
        Arc::clone(&directory) as Arc<dyn DriverDirectory>,
        config.dispatch.clone(),
    ));

    let sweeper = ExpirySweeper::new(
        Arc::clone(&requests) as Arc<dyn RequestRepository>,
        config.dispatch.sweep_interval(),
    );
    let sweep_handle = sweeper.spawn();

    // The nearest driver answers after a couple of seconds.
    let mut offers = service.subscribe_offers();
    let responder = Arc::clone(&service);
    tokio::spawn(async move {
        while let Ok(offer) = offers.recv().await {
            tokio::time::sleep(Duration::from_secs(2)).await;
            match responder.accept(offer.request_id, offer.driver_id).await {
                Ok(request) => tracing::info!(request_id = %request.id, "driver accepted"),
                Err(e) => tracing::warn!("driver response lost the race: {e}"),
            }
        }
    });

    let trip = service
        .create_trip(
            Uuid::new_v4(),
            pickup,
            Coordinates::new(52.4800, 13.4500),
            "berlin".into(),
            1490,
            "EUR".into(),
        )
        .await?;

    let outcome = service.dispatch(trip.id).await?;
    tracing::info!(trip_id = %trip.id, ?outcome, "dispatch finished");
    println!("{}", serde_json::to_string_pretty(&outcome)?);

    sweep_handle.shutdown().await;
    Ok(())
}
