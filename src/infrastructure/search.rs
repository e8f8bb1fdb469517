use async_trait::async_trait;
use meilisearch_sdk::{errors::Error as MeiliError, indexes::Index, Client};
use serde::de::DeserializeOwned;
use tracing::info;

use crate::application::{
    Catalog, CatalogWriter, ConsultorioDocument, ListingQuery, ReservationDocument,
};
use crate::domain::{
    core::{Consultorio, ConsultorioId, ProfileId, Reservation},
    DataAccessError, Entity,
};

impl From<MeiliError> for DataAccessError {
    fn from(value: MeiliError) -> Self {
        match value {
            MeiliError::HttpError(_) => DataAccessError::ConnectionError(Box::new(value)),
            _ => DataAccessError::QueryError(Box::new(value)),
        }
    }
}

/// Catalog backed by Meilisearch. One index per document type, named after
/// the entity.
#[derive(Clone)]
pub struct MeiliCatalog {
    client: Client,
}

impl MeiliCatalog {
    const OWNER_LIMIT: usize = 1000;
    const RESERVATION_LIMIT: usize = 1000;

    pub fn new(config: &crate::MeiliSearch) -> Self {
        Self {
            client: Client::new(&config.url, &config.api_key),
        }
    }

    pub fn client(&self) -> &Client {
        &self.client
    }

    fn consultorios(&self) -> Index {
        self.client.index(Consultorio::ENTITY_NAME)
    }

    fn reservations(&self) -> Index {
        self.client.index(Reservation::ENTITY_NAME)
    }

    /// Declares the attributes the queries filter and sort on.
    pub async fn ensure_indexes(&self) -> Result<(), DataAccessError> {
        self.consultorios()
            .set_filterable_attributes(["owner", "city", "bookable", "price_per_hour"])
            .await?;
        self.reservations()
            .set_filterable_attributes(["booker", "owner", "consultorio"])
            .await?;
        self.reservations()
            .set_sortable_attributes(["start_ts"])
            .await?;
        info!("検索インデックスを設定しました");
        Ok(())
    }

    async fn search<T>(
        index: &Index,
        text: &str,
        filter: &str,
        sort: &[&str],
        limit: usize,
        offset: usize,
    ) -> Result<Vec<T>, DataAccessError>
    where
        T: DeserializeOwned + 'static,
    {
        let mut query = index.search();
        query
            .with_query(text)
            .with_filter(filter)
            .with_limit(limit)
            .with_offset(offset);
        if !sort.is_empty() {
            query.with_sort(sort);
        }
        let results = query.execute::<T>().await?;
        Ok(results.hits.into_iter().map(|hit| hit.result).collect())
    }
}

fn quoted(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// Meilisearch filter equivalent of [`ListingQuery::matches`].
fn listing_filter(query: &ListingQuery) -> String {
    let mut filter = vec!["bookable = true".to_owned()];
    if let Some(city) = query.city.as_deref().map(str::trim) {
        filter.push(format!("city = {}", quoted(city)));
    }
    if let Some(max) = query.max_price_per_hour {
        filter.push(format!("price_per_hour <= {}", max));
    }
    filter.join(" AND ")
}

#[async_trait]
impl Catalog for MeiliCatalog {
    async fn search_consultorios(
        &self,
        query: &ListingQuery,
    ) -> Result<Vec<ConsultorioDocument>, DataAccessError> {
        let text = query.text.clone().unwrap_or_default();
        Self::search(
            &self.consultorios(),
            text.trim(),
            &listing_filter(query),
            &[],
            query.limit(),
            query.offset(),
        )
        .await
    }

    async fn consultorios_of_owner(
        &self,
        owner: ProfileId,
    ) -> Result<Vec<ConsultorioDocument>, DataAccessError> {
        let filter = format!("owner = {}", quoted(&owner.to_string()));
        Self::search(&self.consultorios(), "", &filter, &[], Self::OWNER_LIMIT, 0).await
    }

    async fn reservations_of_booker(
        &self,
        booker: ProfileId,
    ) -> Result<Vec<ReservationDocument>, DataAccessError> {
        let filter = format!("booker = {}", quoted(&booker.to_string()));
        Self::search(
            &self.reservations(),
            "",
            &filter,
            &["start_ts:desc"],
            Self::RESERVATION_LIMIT,
            0,
        )
        .await
    }

    async fn reservations_of_consultorio(
        &self,
        consultorio: ConsultorioId,
    ) -> Result<Vec<ReservationDocument>, DataAccessError> {
        let filter = format!("consultorio = {}", quoted(&consultorio.to_string()));
        Self::search(
            &self.reservations(),
            "",
            &filter,
            &["start_ts:desc"],
            Self::RESERVATION_LIMIT,
            0,
        )
        .await
    }
}

#[async_trait]
impl CatalogWriter for MeiliCatalog {
    async fn upsert_consultorio(
        &self,
        document: ConsultorioDocument,
    ) -> Result<(), DataAccessError> {
        self.consultorios()
            .add_or_replace(&[document], Some("id"))
            .await?;
        Ok(())
    }

    async fn remove_consultorio(&self, id: ConsultorioId) -> Result<(), DataAccessError> {
        self.consultorios().delete_document(id).await?;
        Ok(())
    }

    async fn upsert_reservation(
        &self,
        document: ReservationDocument,
    ) -> Result<(), DataAccessError> {
        self.reservations()
            .add_or_replace(&[document], Some("id"))
            .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_listing_filter() {
        assert_eq!(listing_filter(&ListingQuery::default()), "bookable = true");
        let query = ListingQuery {
            city: Some(" San \"Pedro\" ".to_owned()),
            max_price_per_hour: Some(50_000),
            ..Default::default()
        };
        assert_eq!(
            listing_filter(&query),
            r#"bookable = true AND city = "San \"Pedro\"" AND price_per_hour <= 50000"#
        );
    }

    #[tokio::test]
    #[ignore = "requires a running Meilisearch"]
    async fn test_upsert_and_search() {
        use crate::domain::core::draft;

        let catalog = MeiliCatalog::new(&crate::MeiliSearch {
            url: "http://localhost:7700".to_owned(),
            api_key: "masterKey".to_owned(),
        });
        catalog.ensure_indexes().await.unwrap();
        let mut consultorio = Consultorio::create(1.into(), 2.into(), draft()).unwrap();
        consultorio.approve().unwrap();
        catalog
            .upsert_consultorio(ConsultorioDocument::new(&consultorio, None))
            .await
            .unwrap();
    }
}
