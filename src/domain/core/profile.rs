use derive_more::{Deref, Display, Error, From};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::domain::{hashed_id, Aggregation, Entity, Event, EventQueue, Id};

use super::MediaId;

/// Profile id derived from the hosted-auth subject, so a verified token maps to its
/// profile without a lookup.
#[serde_as]
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Deref, Default,
)]
pub struct ProfileId(#[serde_as(as = "DisplayFromStr")] u64);

impl ProfileId {
    pub fn from_subject(subject: &str) -> Self {
        hashed_id(subject)
    }
}

impl Id for ProfileId {
    type Inner = u64;
}

/// 役割
#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
    /// Legacy role that could only book.
    Professional,
    /// Legacy role that could only list.
    Owner,
}

impl Role {
    pub fn can_list(&self) -> bool {
        !matches!(self, Role::Professional)
    }

    pub fn can_book(&self) -> bool {
        !matches!(self, Role::Owner)
    }

    pub fn is_admin(&self) -> bool {
        matches!(self, Role::Admin)
    }
}

/// プロフィールイベント
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProfileEvent {
    ProfileRegistered {
        id: ProfileId,
        subject: String,
        email: String,
        full_name: String,
        phone: Option<String>,
    },
    ContactChanged {
        id: ProfileId,
        full_name: String,
        phone: Option<String>,
    },
    AvatarChanged {
        id: ProfileId,
        avatar: Option<MediaId>,
    },
    RoleChanged {
        id: ProfileId,
        role: Role,
    },
}

impl Event for ProfileEvent {
    type Id = ProfileId;
}

/// プロフィールエンティティ
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Profile {
    id: ProfileId,
    subject: String,
    email: String,
    full_name: String,
    phone: Option<String>,
    avatar: Option<MediaId>,
    role: Role,
    #[serde(skip)]
    events: EventQueue<ProfileEvent>,
}

impl Profile {
    pub fn register(
        subject: String,
        email: String,
        full_name: String,
        phone: Option<String>,
    ) -> Result<Self, ProfileError> {
        let mut entity = Profile::default();
        entity.record(ProfileEvent::ProfileRegistered {
            id: ProfileId::from_subject(&subject),
            subject,
            email,
            full_name,
            phone,
        })?;
        Ok(entity)
    }

    pub fn change_contact(
        &mut self,
        full_name: String,
        phone: Option<String>,
    ) -> Result<(), ProfileError> {
        self.record(ProfileEvent::ContactChanged {
            id: self.id,
            full_name,
            phone,
        })
    }

    pub fn change_avatar(&mut self, avatar: Option<MediaId>) -> Result<(), ProfileError> {
        self.record(ProfileEvent::AvatarChanged { id: self.id, avatar })
    }

    pub fn change_role(&mut self, role: Role) -> Result<(), ProfileError> {
        self.record(ProfileEvent::RoleChanged { id: self.id, role })
    }

    pub fn subject(&self) -> &str {
        &self.subject
    }

    pub fn email(&self) -> &str {
        &self.email
    }

    pub fn full_name(&self) -> &str {
        &self.full_name
    }

    pub fn phone(&self) -> Option<&str> {
        self.phone.as_deref()
    }

    pub fn avatar(&self) -> Option<MediaId> {
        self.avatar
    }

    pub fn role(&self) -> Role {
        self.role
    }

    fn is_registered(&self) -> bool {
        !self.subject.is_empty()
    }

    fn validate_id(&self, id: &ProfileId) -> Result<(), ProfileError> {
        match self.is_registered() && self.id == *id {
            true => Ok(()),
            false => Err(ProfileError::MismatchedId),
        }
    }

    fn validate_email(email: &str) -> Result<(), ProfileError> {
        let email = email.trim();
        match email.len() > 2 && email.contains('@') && !email.contains(char::is_whitespace) {
            true => Ok(()),
            false => Err(ProfileError::InvalidEmail),
        }
    }

    fn validate_full_name(full_name: &str) -> Result<(), ProfileError> {
        match full_name.trim().is_empty() {
            true => Err(ProfileError::FullNameIsBlank),
            false => Ok(()),
        }
    }

    fn validate_phone(phone: &Option<String>) -> Result<(), ProfileError> {
        match phone {
            Some(phone)
                if !phone
                    .chars()
                    .all(|c| c.is_ascii_digit() || " +-()".contains(c)) =>
            {
                Err(ProfileError::InvalidPhone)
            }
            _ => Ok(()),
        }
    }
}

impl Entity for Profile {
    type Id = ProfileId;

    const ENTITY_NAME: &'static str = "profile";

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Aggregation for Profile {
    type Event = ProfileEvent;
    type Error = ProfileError;

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            ProfileEvent::ProfileRegistered {
                subject,
                email,
                full_name,
                phone,
                ..
            } => {
                if self.is_registered() {
                    return Err(ProfileError::AlreadyRegistered);
                }
                if subject.is_empty() {
                    return Err(ProfileError::SubjectRequired);
                }
                Self::validate_email(email)?;
                Self::validate_full_name(full_name)?;
                Self::validate_phone(phone)
            }
            ProfileEvent::ContactChanged {
                id,
                full_name,
                phone,
            } => {
                self.validate_id(id)?;
                Self::validate_full_name(full_name)?;
                Self::validate_phone(phone)
            }
            ProfileEvent::AvatarChanged { id, .. } | ProfileEvent::RoleChanged { id, .. } => {
                self.validate_id(id)
            }
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            ProfileEvent::ProfileRegistered {
                id,
                subject,
                email,
                full_name,
                phone,
            } => {
                self.id = id;
                self.subject = subject;
                self.email = email.trim().to_owned();
                self.full_name = full_name.trim().to_owned();
                self.phone = phone;
                self.role = Role::User;
            }
            ProfileEvent::ContactChanged {
                full_name, phone, ..
            } => {
                self.full_name = full_name.trim().to_owned();
                self.phone = phone;
            }
            ProfileEvent::AvatarChanged { avatar, .. } => self.avatar = avatar,
            ProfileEvent::RoleChanged { role, .. } => self.role = role,
        }
    }

    fn events(&self) -> &EventQueue<Self::Event> {
        &self.events
    }

    fn events_mut(&mut self) -> &mut EventQueue<Self::Event> {
        &mut self.events
    }
}

impl PartialEq for Profile {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.subject == other.subject
            && self.email == other.email
            && self.full_name == other.full_name
            && self.phone == other.phone
            && self.avatar == other.avatar
            && self.role == other.role
    }
}

impl Eq for Profile {}

/// プロフィールエラー
#[derive(Error, Display, Debug, PartialEq, Eq)]
pub enum ProfileError {
    #[display(fmt = "ID does not match")]
    MismatchedId,
    #[display(fmt = "Profile is already registered")]
    AlreadyRegistered,
    #[display(fmt = "Auth subject is required")]
    SubjectRequired,
    #[display(fmt = "Invalid email address")]
    InvalidEmail,
    #[display(fmt = "Full name cannot be blank")]
    FullNameIsBlank,
    #[display(fmt = "Invalid phone number")]
    InvalidPhone,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn profile() -> Profile {
        Profile::register(
            "auth|ana".to_owned(),
            "ana@example.com".to_owned(),
            " Ana Torres ".to_owned(),
            Some("+52 55 1234 5678".to_owned()),
        )
        .unwrap()
    }

    #[test]
    fn test_register() {
        let profile = profile();
        assert_eq!(profile.id(), ProfileId::from_subject("auth|ana"));
        assert_eq!(profile.full_name(), "Ana Torres");
        assert_eq!(profile.role(), Role::User);
        assert_eq!(profile.events().len(), 1);
    }

    #[test]
    fn test_register_rejects_bad_input() {
        let bad_email = Profile::register(
            "auth|x".to_owned(),
            "not-an-email".to_owned(),
            "X".to_owned(),
            None,
        );
        assert_eq!(bad_email.unwrap_err(), ProfileError::InvalidEmail);
        let blank = Profile::register(
            "auth|x".to_owned(),
            "x@example.com".to_owned(),
            "  ".to_owned(),
            None,
        );
        assert_eq!(blank.unwrap_err(), ProfileError::FullNameIsBlank);
    }

    #[test]
    fn test_cannot_register_twice() {
        let mut profile = profile();
        let event = ProfileEvent::ProfileRegistered {
            id: profile.id(),
            subject: "auth|ana".to_owned(),
            email: "ana@example.com".to_owned(),
            full_name: "Ana".to_owned(),
            phone: None,
        };
        assert_eq!(profile.record(event), Err(ProfileError::AlreadyRegistered));
    }

    #[test]
    fn test_change_contact_and_role() {
        let mut profile = profile();
        profile
            .change_contact("Ana T.".to_owned(), Some("bad#phone".to_owned()))
            .unwrap_err();
        profile.change_contact("Ana T.".to_owned(), None).unwrap();
        profile.change_role(Role::Admin).unwrap();
        assert_eq!(profile.full_name(), "Ana T.");
        assert!(profile.role().is_admin());
    }

    #[test]
    fn test_legacy_roles() {
        assert!(!Role::Professional.can_list());
        assert!(Role::Professional.can_book());
        assert!(Role::Owner.can_list());
        assert!(!Role::Owner.can_book());
        assert_eq!(serde_json::to_string(&Role::Owner).unwrap(), "\"owner\"");
    }
}
