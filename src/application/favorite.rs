use crate::domain::core::{ConsultorioId, Favorites, ProfileId};

use super::{actor, live_consultorio, ServiceError, Store};

/// お気に入りサービス
#[derive(Clone)]
pub struct FavoriteService {
    store: Store,
}

impl FavoriteService {
    pub fn new(store: Store) -> Self {
        Self { store }
    }

    pub async fn list(&self, profile: ProfileId) -> Result<Vec<ConsultorioId>, ServiceError> {
        actor(&self.store, profile).await?;
        Ok(self.favorites(profile).await?.consultorios().to_vec())
    }

    pub async fn add(
        &self,
        profile: ProfileId,
        consultorio: ConsultorioId,
    ) -> Result<Vec<ConsultorioId>, ServiceError> {
        actor(&self.store, profile).await?;
        live_consultorio(&self.store, consultorio).await?;
        let mut favorites = self.favorites(profile).await?;
        favorites.add(consultorio)?;
        self.store.favorites.save(&mut favorites).await?;
        Ok(favorites.consultorios().to_vec())
    }

    pub async fn remove(
        &self,
        profile: ProfileId,
        consultorio: ConsultorioId,
    ) -> Result<Vec<ConsultorioId>, ServiceError> {
        actor(&self.store, profile).await?;
        let mut favorites = self.favorites(profile).await?;
        favorites.remove(consultorio)?;
        self.store.favorites.save(&mut favorites).await?;
        Ok(favorites.consultorios().to_vec())
    }

    async fn favorites(&self, profile: ProfileId) -> Result<Favorites, ServiceError> {
        Ok(self
            .store
            .favorites
            .find_by_id(profile)
            .await?
            .unwrap_or_else(|| Favorites::new(profile)))
    }
}

#[cfg(test)]
mod tests {
    use crate::application::booking::tests::listing;
    use crate::application::tests::{register, store};
    use crate::domain::{core::Role, Entity};

    use super::*;

    #[tokio::test]
    async fn test_add_and_remove() {
        let store = store();
        let service = FavoriteService::new(store.clone());
        let consultorio = listing(&store).await;
        let ana = register(&store, "ana", Role::User).await;

        assert!(service.list(ana.id()).await.unwrap().is_empty());
        let favorites = service.add(ana.id(), consultorio.id()).await.unwrap();
        assert_eq!(favorites, vec![consultorio.id()]);
        assert!(matches!(
            service.add(ana.id(), consultorio.id()).await,
            Err(ServiceError::Invalid(_))
        ));
        assert!(service
            .remove(ana.id(), consultorio.id())
            .await
            .unwrap()
            .is_empty());
        assert!(matches!(
            service.remove(ana.id(), consultorio.id()).await,
            Err(ServiceError::Invalid(_))
        ));
    }

    #[tokio::test]
    async fn test_only_existing_listings() {
        let store = store();
        let service = FavoriteService::new(store.clone());
        let ana = register(&store, "ana", Role::User).await;
        assert!(matches!(
            service.add(ana.id(), 404.into()).await,
            Err(ServiceError::NotFound(_))
        ));

        let mut consultorio = listing(&store).await;
        consultorio.delete().unwrap();
        store.consultorios.save(&mut consultorio).await.unwrap();
        assert!(matches!(
            service.add(ana.id(), consultorio.id()).await,
            Err(ServiceError::NotFound(_))
        ));
    }
}
