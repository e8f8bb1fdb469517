use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::domain::{
    core::{Media, Profile, ProfileId, Role},
    Entity, ID_GENERATOR,
};

use super::{actor, load, AuthUser, ServiceError, Store};

/// Registration form. The email falls back to the one on the token.
#[derive(Clone, Debug, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileInput {
    #[serde(default)]
    pub email: Option<String>,
    pub full_name: String,
    #[serde(default)]
    pub phone: Option<String>,
}

/// プロフィールサービス
#[derive(Clone)]
pub struct ProfileService {
    store: Store,
    media_max_bytes: usize,
}

impl ProfileService {
    pub fn new(store: Store, media_max_bytes: usize) -> Self {
        Self {
            store,
            media_max_bytes,
        }
    }

    pub async fn get(&self, id: ProfileId) -> Result<Profile, ServiceError> {
        load(self.store.profiles.as_ref(), id, "Profile").await
    }

    pub async fn register(
        &self,
        user: &AuthUser,
        input: ProfileInput,
    ) -> Result<Profile, ServiceError> {
        if self.store.profiles.find_by_id(user.profile_id()).await?.is_some() {
            return Err(ServiceError::Conflict("Profile already registered".to_owned()));
        }
        let email = input
            .email
            .or_else(|| user.email.clone())
            .ok_or_else(|| ServiceError::BadRequest("email is required".to_owned()))?;
        let mut profile =
            Profile::register(user.subject.clone(), email, input.full_name, input.phone)?;
        self.store.profiles.save(&mut profile).await?;
        info!("プロフィール {} を登録", profile.id());
        Ok(profile)
    }

    pub async fn update_contact(
        &self,
        id: ProfileId,
        full_name: String,
        phone: Option<String>,
    ) -> Result<Profile, ServiceError> {
        let mut profile = actor(&self.store, id).await?;
        if profile.full_name() != full_name.trim() || profile.phone() != phone.as_deref() {
            profile.change_contact(full_name, phone)?;
            self.store.profiles.save(&mut profile).await?;
        }
        Ok(profile)
    }

    /// Stores `data` as the new avatar and drops the previous image.
    pub async fn change_avatar(
        &self,
        id: ProfileId,
        data: Vec<u8>,
    ) -> Result<Profile, ServiceError> {
        let mut profile = actor(&self.store, id).await?;
        let mut media = Media::upload(ID_GENERATOR.generate(), id, data, self.media_max_bytes)?;
        self.store.media.save(&mut media).await?;
        let previous = profile.avatar();
        profile.change_avatar(Some(media.id()))?;
        self.store.profiles.save(&mut profile).await?;
        if let Some(previous) = previous {
            if let Err(e) = self.delete_media(previous).await {
                warn!("旧アバター {} の削除に失敗: {}", previous, e);
            }
        }
        Ok(profile)
    }

    pub async fn change_role(
        &self,
        admin: ProfileId,
        target: ProfileId,
        role: Role,
    ) -> Result<Profile, ServiceError> {
        if !actor(&self.store, admin).await?.role().is_admin() {
            return Err(ServiceError::Forbidden("Only administrators can change roles"));
        }
        let mut profile = load(self.store.profiles.as_ref(), target, "Profile").await?;
        if profile.role() != role {
            profile.change_role(role)?;
            self.store.profiles.save(&mut profile).await?;
            info!("プロフィール {} の役割を {:?} に変更", target, role);
        }
        Ok(profile)
    }

    async fn delete_media(&self, id: crate::domain::core::MediaId) -> Result<(), ServiceError> {
        if let Some(mut media) = self.store.media.find_by_id(id).await? {
            media.delete()?;
            self.store.media.delete(&mut media).await?;
        }
        Ok(())
    }
}
