use std::{error::Error, net::SocketAddr, sync::Arc};

use axum_server::tls_rustls::RustlsConfig;
use tokio::sync::broadcast;
use tracing::{error, info, Level};
use wellpoint::{
    application::{Catalog, Projector, Store},
    infrastructure::{
        project_events, InMemoryCatalog, MeiliCatalog, RemoteAuthenticator, StripeClient,
    },
    WellPointConfig,
};
use wellpoint_web::{router, AppState};

/// Capacity of the in-process event bus.
const BUS_CAPACITY: usize = 1024;

#[tokio::main]
async fn main() {
    match WellPointConfig::load() {
        Ok(config) => {
            tracing_subscriber::fmt()
                .with_max_level(Level::from(&config.logger.level))
                .init();
            if let Err(error) = serve(&config).await {
                error!("アプリケーションエラー: {}", error);
            }
        }
        Err(error) => {
            tracing_subscriber::fmt::init();
            error!("アプリケーションエラー: {}", error)
        }
    }
}

async fn storage(config: &WellPointConfig) -> Result<(Store, Arc<dyn Catalog>), Box<dyn Error>> {
    match (&config.eventstore, &config.meilisearch) {
        (Some(eventstore), Some(meilisearch)) => {
            let client = eventstore::Client::new(eventstore.url.parse()?)?;
            let catalog = MeiliCatalog::new(meilisearch);
            catalog.ensure_indexes().await?;
            info!("EventStoreDB と Meilisearch に接続");
            let catalog: Arc<dyn Catalog> = Arc::new(catalog);
            Ok((Store::event_store(client), catalog))
        }
        (Some(_), None) => Err("eventstore requires meilisearch for the catalog".into()),
        (None, _) => {
            let (bus, events) = broadcast::channel(BUS_CAPACITY);
            let store = Store::in_memory(bus);
            let catalog = Arc::new(InMemoryCatalog::default());
            tokio::spawn(project_events(
                Projector::new(store.clone(), catalog.clone()),
                events,
            ));
            info!("インメモリストアで起動");
            let catalog: Arc<dyn Catalog> = catalog;
            Ok((store, catalog))
        }
    }
}

async fn serve(config: &WellPointConfig) -> Result<(), Box<dyn Error>> {
    let (store, catalog) = storage(config).await?;
    let state = AppState::new(
        store,
        catalog,
        Arc::new(RemoteAuthenticator::new(&config.auth)),
        Arc::new(StripeClient::new(&config.stripe)),
        &config.stripe,
        &config.booking,
        &config.media,
    );
    let app = router(state).into_make_service();
    let address: SocketAddr = config.web.address.parse()?;
    info!("{} で待ち受け開始", address);
    match &config.web.tls {
        Some(tls) => {
            let tls = RustlsConfig::from_pem_file(&tls.cert, &tls.key).await?;
            axum_server::bind_rustls(address, tls).serve(app).await?;
        }
        None => axum_server::bind(address).serve(app).await?,
    }
    Ok(())
}
