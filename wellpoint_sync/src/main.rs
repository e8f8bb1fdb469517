use std::{error::Error, sync::Arc};

use eventstore::{ClientSettings, Position, StreamPosition, SubscribeToAllOptions};
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn, Level};
use uuid::Uuid;
use wellpoint::{
    application::{Execute, Projector, Store},
    domain::DomainEvent,
    infrastructure::MeiliCatalog,
    WellPointConfig,
};

static VERSION_UID: &str = "eventstore_version";

#[tokio::main]
async fn main() {
    match WellPointConfig::load() {
        Ok(config) => {
            tracing_subscriber::fmt()
                .with_max_level(Level::from(&config.logger.level))
                .init();
            if let Err(error) = subscribe(&config).await {
                error!("アプリケーションエラー: {}", error);
            }
        }
        Err(error) => {
            tracing_subscriber::fmt::init();
            error!("アプリケーションエラー: {}", error)
        }
    }
}

/// Last event of the `$all` stream applied to the catalog.
#[derive(Serialize, Deserialize)]
struct EventstoreVersion {
    id: u64,
    event_id: Uuid,
    commit: u64,
    prepare: u64,
}

impl EventstoreVersion {
    fn position(&self) -> Position {
        Position {
            commit: self.commit,
            prepare: self.prepare,
        }
    }
}

async fn subscribe(config: &WellPointConfig) -> Result<(), Box<dyn Error>> {
    let (eventstore, meilisearch) = match (&config.eventstore, &config.meilisearch) {
        (Some(eventstore), Some(meilisearch)) => (eventstore, meilisearch),
        _ => return Err("eventstore and meilisearch must both be configured".into()),
    };
    let settings = eventstore.url.parse::<ClientSettings>()?;
    let client = eventstore::Client::new(settings)?;
    let catalog = MeiliCatalog::new(meilisearch);
    catalog.ensure_indexes().await?;
    let projector = Projector::new(Store::event_store(client.clone()), Arc::new(catalog.clone()));
    let versions = catalog.client().index(VERSION_UID);

    let start = match versions.get_document::<EventstoreVersion>("1").await {
        Ok(version) => StreamPosition::Position(version.position()),
        Err(e) => {
            warn!("バージョン情報なし、先頭から同期: {}", e);
            StreamPosition::Start
        }
    };
    let mut sub = client
        .subscribe_to_all(&SubscribeToAllOptions::default().position(start))
        .await;
    info!("イベントの購読を開始");
    loop {
        let resolved = sub.next().await?;
        match DomainEvent::try_from(&resolved) {
            Ok(event) => {
                debug!("ドメインイベントを受信: {:?}", event);
                if let Err(e) = projector.execute(event).await {
                    error!("イベント実行エラー: {}", e);
                    continue;
                }
            }
            Err(_) => debug!("システムイベントをスキップ: {}", resolved.get_original_stream_id()),
        }
        let event = resolved.get_original_event();
        if let Err(e) = versions
            .add_or_replace(
                &[EventstoreVersion {
                    id: 1,
                    event_id: event.id,
                    commit: event.position.commit,
                    prepare: event.position.prepare,
                }],
                Some("id"),
            )
            .await
        {
            error!("バージョン情報保存失敗: {}", e);
        }
    }
}
