use std::sync::Arc;

use tracing::{info, warn};

use crate::domain::{
    core::{Consultorio, ConsultorioDraft, ConsultorioId, Media, MediaId, ProfileId},
    Entity, ID_GENERATOR,
};

use super::{
    actor, ensure_owner_or_admin, live_consultorio, load, Catalog, ConsultorioDocument,
    ListingQuery, ServiceError, Store,
};

/// 診察室サービス
#[derive(Clone)]
pub struct ListingService {
    store: Store,
    catalog: Arc<dyn Catalog>,
    media_max_bytes: usize,
}

impl ListingService {
    pub fn new(store: Store, catalog: Arc<dyn Catalog>, media_max_bytes: usize) -> Self {
        Self {
            store,
            catalog,
            media_max_bytes,
        }
    }

    pub async fn search(
        &self,
        query: &ListingQuery,
    ) -> Result<Vec<ConsultorioDocument>, ServiceError> {
        Ok(self.catalog.search_consultorios(query).await?)
    }

    pub async fn of_owner(&self, owner: ProfileId) -> Result<Vec<ConsultorioDocument>, ServiceError> {
        actor(&self.store, owner).await?;
        Ok(self.catalog.consultorios_of_owner(owner).await?)
    }

    pub async fn create(
        &self,
        owner: ProfileId,
        draft: ConsultorioDraft,
    ) -> Result<Consultorio, ServiceError> {
        if !actor(&self.store, owner).await?.role().can_list() {
            return Err(ServiceError::Forbidden("Your role cannot publish consultorios"));
        }
        let mut consultorio = Consultorio::create(ID_GENERATOR.generate(), owner, draft)?;
        self.store.consultorios.save(&mut consultorio).await?;
        info!("診察室 {} を登録", consultorio.id());
        Ok(consultorio)
    }

    /// Bookable listings are public. Others are visible to their owner and
    /// administrators only.
    pub async fn get(
        &self,
        id: ConsultorioId,
        viewer: Option<ProfileId>,
    ) -> Result<Consultorio, ServiceError> {
        let consultorio = live_consultorio(&self.store, id).await?;
        if consultorio.is_bookable() {
            return Ok(consultorio);
        }
        let viewer = match viewer {
            Some(viewer) => self.store.profiles.find_by_id(viewer).await?,
            None => None,
        };
        match viewer {
            Some(v) if v.id() == consultorio.owner() || v.role().is_admin() => Ok(consultorio),
            _ => Err(ServiceError::NotFound("Consultorio")),
        }
    }

    pub async fn revise(
        &self,
        editor: ProfileId,
        id: ConsultorioId,
        draft: ConsultorioDraft,
    ) -> Result<Consultorio, ServiceError> {
        self.modify(editor, id, |c| c.revise(draft)).await
    }

    pub async fn delete(&self, editor: ProfileId, id: ConsultorioId) -> Result<(), ServiceError> {
        self.modify(editor, id, Consultorio::delete).await?;
        info!("診察室 {} を削除", id);
        Ok(())
    }

    pub async fn approve(
        &self,
        admin: ProfileId,
        id: ConsultorioId,
    ) -> Result<Consultorio, ServiceError> {
        self.moderate(admin, id, Consultorio::approve).await
    }

    pub async fn revoke_approval(
        &self,
        admin: ProfileId,
        id: ConsultorioId,
    ) -> Result<Consultorio, ServiceError> {
        self.moderate(admin, id, Consultorio::revoke_approval).await
    }

    pub async fn activate(
        &self,
        editor: ProfileId,
        id: ConsultorioId,
    ) -> Result<Consultorio, ServiceError> {
        self.modify(editor, id, Consultorio::activate).await
    }

    pub async fn deactivate(
        &self,
        editor: ProfileId,
        id: ConsultorioId,
    ) -> Result<Consultorio, ServiceError> {
        self.modify(editor, id, Consultorio::deactivate).await
    }

    /// Uploads a photo and appends it to the listing.
    pub async fn add_image(
        &self,
        editor: ProfileId,
        id: ConsultorioId,
        data: Vec<u8>,
    ) -> Result<Consultorio, ServiceError> {
        let editor = actor(&self.store, editor).await?;
        let mut consultorio = live_consultorio(&self.store, id).await?;
        ensure_owner_or_admin(&editor, consultorio.owner(), "Only the owner can edit")?;
        let mut media = Media::upload(
            ID_GENERATOR.generate(),
            consultorio.owner(),
            data,
            self.media_max_bytes,
        )?;
        consultorio.add_image(media.id())?;
        self.store.media.save(&mut media).await?;
        self.store.consultorios.save(&mut consultorio).await?;
        Ok(consultorio)
    }

    pub async fn remove_image(
        &self,
        editor: ProfileId,
        id: ConsultorioId,
        image: MediaId,
    ) -> Result<Consultorio, ServiceError> {
        let consultorio = self.modify(editor, id, |c| c.remove_image(image)).await?;
        if let Some(mut media) = self.store.media.find_by_id(image).await? {
            media.delete()?;
            if let Err(e) = self.store.media.delete(&mut media).await {
                warn!("画像 {} の削除に失敗: {}", image, e);
            }
        }
        Ok(consultorio)
    }

    pub async fn media(&self, id: MediaId) -> Result<Media, ServiceError> {
        match load(self.store.media.as_ref(), id, "Media").await? {
            media if media.data().is_empty() => Err(ServiceError::NotFound("Media")),
            media => Ok(media),
        }
    }

    async fn modify<F, E>(
        &self,
        editor: ProfileId,
        id: ConsultorioId,
        command: F,
    ) -> Result<Consultorio, ServiceError>
    where
        F: FnOnce(&mut Consultorio) -> Result<(), E>,
        ServiceError: From<E>,
    {
        let editor = actor(&self.store, editor).await?;
        let mut consultorio = live_consultorio(&self.store, id).await?;
        ensure_owner_or_admin(&editor, consultorio.owner(), "Only the owner can edit")?;
        command(&mut consultorio)?;
        self.store.consultorios.save(&mut consultorio).await?;
        Ok(consultorio)
    }

    async fn moderate<F, E>(
        &self,
        admin: ProfileId,
        id: ConsultorioId,
        command: F,
    ) -> Result<Consultorio, ServiceError>
    where
        F: FnOnce(&mut Consultorio) -> Result<(), E>,
        ServiceError: From<E>,
    {
        if !actor(&self.store, admin).await?.role().is_admin() {
            return Err(ServiceError::Forbidden("Only administrators can moderate"));
        }
        let mut consultorio = live_consultorio(&self.store, id).await?;
        command(&mut consultorio)?;
        self.store.consultorios.save(&mut consultorio).await?;
        info!("診察室 {} の承認状態を変更", id);
        Ok(consultorio)
    }
}
