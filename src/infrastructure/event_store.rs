use std::{marker::PhantomData, sync::Arc};

use async_trait::async_trait;
use eventstore::{AppendToStreamOptions, Client, ExpectedRevision};
use tracing::debug;

use crate::application::Store;
use crate::domain::{Aggregation, DataAccessError, Entity, Repository};

use super::{from_event, stream_name, try_from_resolved_event};

/// Repository that keeps each aggregate in its own EventStoreDB stream.
pub struct EventStoreRepository<A> {
    client: Client,
    _aggregate: PhantomData<fn() -> A>,
}

impl<A> EventStoreRepository<A> {
    pub fn new(client: Client) -> Self {
        Self {
            client,
            _aggregate: PhantomData,
        }
    }
}

impl<A> Clone for EventStoreRepository<A> {
    fn clone(&self) -> Self {
        Self::new(self.client.clone())
    }
}

#[async_trait]
impl<A: Aggregation> Repository<A> for EventStoreRepository<A> {
    async fn find_by_id(&self, id: A::Id) -> Result<Option<A>, DataAccessError> {
        match self
            .client
            .read_stream(stream_name::<A>(id), &Default::default())
            .await
        {
            Ok(mut stream) => {
                let mut entity = A::default();
                let mut revision = None;
                loop {
                    match stream.next().await {
                        Ok(Some(e)) => {
                            revision = Some(e.get_original_event().revision);
                            entity.apply(try_from_resolved_event(&e)?);
                        }
                        Ok(_) => break,
                        Err(eventstore::Error::ResourceDeleted) => return Ok(None),
                        Err(eventstore::Error::ResourceNotFound) => return Ok(None),
                        Err(e) => return Err(e.into()),
                    }
                }
                if revision.is_none() {
                    return Ok(None);
                }
                entity.clear();
                entity.events_mut().set_revision(revision);
                Ok(Some(entity))
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn save(&self, entity: &mut A) -> Result<bool, DataAccessError> {
        if entity.events().is_empty() {
            return Ok(false);
        }
        let stream_name = stream_name::<A>(entity.id());
        let rev = match entity.revision() {
            Some(revision) => ExpectedRevision::Exact(revision),
            None => ExpectedRevision::NoStream,
        };
        let events = entity
            .iter()
            .map(from_event)
            .collect::<Result<Vec<_>, _>>()?;
        let result = self
            .client
            .append_to_stream(
                &stream_name,
                &AppendToStreamOptions::default().expected_revision(rev),
                events,
            )
            .await?;
        debug!("{} に {} 件のイベントを追加", stream_name, entity.events().len());
        entity.clear();
        entity
            .events_mut()
            .set_revision(Some(result.next_expected_version));
        Ok(true)
    }

    async fn delete(&self, entity: &mut A) -> Result<bool, DataAccessError> {
        self.save(entity).await?;
        let stream_name = stream_name::<A>(entity.id());
        self.client
            .delete_stream(&stream_name, &Default::default())
            .await?;
        entity.events_mut().set_revision(None);
        Ok(true)
    }
}

impl Store {
    /// Repositories backed by one EventStoreDB connection.
    pub fn event_store(client: Client) -> Self {
        Self {
            profiles: Arc::new(EventStoreRepository::new(client.clone())),
            consultorios: Arc::new(EventStoreRepository::new(client.clone())),
            agendas: Arc::new(EventStoreRepository::new(client.clone())),
            reservations: Arc::new(EventStoreRepository::new(client.clone())),
            favorites: Arc::new(EventStoreRepository::new(client.clone())),
            ratings: Arc::new(EventStoreRepository::new(client.clone())),
            media: Arc::new(EventStoreRepository::new(client.clone())),
            stripe_accounts: Arc::new(EventStoreRepository::new(client.clone())),
            stripe_payments: Arc::new(EventStoreRepository::new(client.clone())),
            stripe_webhooks: Arc::new(EventStoreRepository::new(client)),
        }
    }
}
