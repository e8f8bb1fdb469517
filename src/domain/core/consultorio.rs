use chrono::{NaiveTime, Timelike, Weekday};
use derive_more::{Deref, Display, Error, From};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::domain::{Aggregation, Entity, Event, EventQueue, Id};

use super::{MediaId, Money, ProfileId};

/// Maximum number of photos per listing.
pub const MAX_IMAGES: usize = 10;

/// 診察室ID
#[serde_as]
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Deref, Default,
)]
pub struct ConsultorioId(#[serde_as(as = "DisplayFromStr")] u64);

impl Id for ConsultorioId {
    type Inner = u64;
}

/// 住所
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Address {
    pub street: String,
    pub city: String,
    pub state: String,
    pub postal_code: String,
}

/// 料金
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct Pricing {
    pub per_hour: Option<Money>,
    pub per_day: Option<Money>,
    pub per_month: Option<Money>,
}

impl Pricing {
    fn prices(&self) -> impl Iterator<Item = &Money> {
        [&self.per_hour, &self.per_day, &self.per_month]
            .into_iter()
            .flatten()
    }
}

/// 営業時間 (local time of the marketplace)
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct OpeningHours {
    pub days: Vec<Weekday>,
    pub open: NaiveTime,
    pub close: NaiveTime,
}

impl OpeningHours {
    pub fn is_open_on(&self, weekday: Weekday) -> bool {
        self.days.contains(&weekday)
    }

    /// Start hours of the whole-hour slots that fit between open and close.
    pub fn slot_hours(&self) -> impl Iterator<Item = u32> {
        let first = match (self.open.minute(), self.open.second()) {
            (0, 0) => self.open.hour(),
            _ => self.open.hour() + 1,
        };
        let close = self.close.num_seconds_from_midnight();
        (first..24).take_while(move |h| (h + 1) * 3600 <= close)
    }

    pub fn contains_hour(&self, hour: u32) -> bool {
        self.slot_hours().any(|h| h == hour)
    }
}

/// Everything an owner fills in when listing a room.
#[derive(Clone, Debug, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ConsultorioDraft {
    pub title: String,
    pub description: String,
    pub address: Address,
    pub pricing: Pricing,
    pub amenities: Vec<String>,
    pub opening_hours: OpeningHours,
}

/// 診察室イベント
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConsultorioEvent {
    ConsultorioCreated {
        id: ConsultorioId,
        owner: ProfileId,
        title: String,
        description: String,
        address: Address,
        pricing: Pricing,
        amenities: Vec<String>,
        opening_hours: OpeningHours,
    },
    DetailsChanged {
        id: ConsultorioId,
        title: String,
        description: String,
    },
    AddressChanged {
        id: ConsultorioId,
        address: Address,
    },
    PricingChanged {
        id: ConsultorioId,
        pricing: Pricing,
    },
    AmenitiesChanged {
        id: ConsultorioId,
        amenities: Vec<String>,
    },
    OpeningHoursChanged {
        id: ConsultorioId,
        opening_hours: OpeningHours,
    },
    ImageAdded {
        id: ConsultorioId,
        image: MediaId,
    },
    ImageRemoved {
        id: ConsultorioId,
        image: MediaId,
    },
    Approved {
        id: ConsultorioId,
    },
    ApprovalRevoked {
        id: ConsultorioId,
    },
    Activated {
        id: ConsultorioId,
    },
    Deactivated {
        id: ConsultorioId,
    },
    ConsultorioDeleted {
        id: ConsultorioId,
    },
}

impl Event for ConsultorioEvent {
    type Id = ConsultorioId;
}

/// 診察室エンティティ
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct Consultorio {
    id: ConsultorioId,
    owner: ProfileId,
    title: String,
    description: String,
    address: Address,
    pricing: Pricing,
    amenities: Vec<String>,
    opening_hours: OpeningHours,
    images: Vec<MediaId>,
    active: bool,
    approved: bool,
    deleted: bool,
    #[serde(skip)]
    events: EventQueue<ConsultorioEvent>,
}

impl Consultorio {
    pub fn create(
        id: ConsultorioId,
        owner: ProfileId,
        draft: ConsultorioDraft,
    ) -> Result<Self, ConsultorioError> {
        let mut entity = Consultorio::default();
        entity.record(ConsultorioEvent::ConsultorioCreated {
            id,
            owner,
            title: draft.title.trim().to_owned(),
            description: draft.description.trim().to_owned(),
            address: draft.address,
            pricing: draft.pricing,
            amenities: normalize_amenities(draft.amenities),
            opening_hours: draft.opening_hours,
        })?;
        Ok(entity)
    }

    pub fn change_details(
        &mut self,
        title: String,
        description: String,
    ) -> Result<(), ConsultorioError> {
        self.record(ConsultorioEvent::DetailsChanged {
            id: self.id,
            title: title.trim().to_owned(),
            description: description.trim().to_owned(),
        })
    }

    pub fn change_address(&mut self, address: Address) -> Result<(), ConsultorioError> {
        self.record(ConsultorioEvent::AddressChanged {
            id: self.id,
            address,
        })
    }

    pub fn change_pricing(&mut self, pricing: Pricing) -> Result<(), ConsultorioError> {
        self.record(ConsultorioEvent::PricingChanged {
            id: self.id,
            pricing,
        })
    }

    pub fn change_amenities(&mut self, amenities: Vec<String>) -> Result<(), ConsultorioError> {
        self.record(ConsultorioEvent::AmenitiesChanged {
            id: self.id,
            amenities: normalize_amenities(amenities),
        })
    }

    pub fn change_opening_hours(
        &mut self,
        opening_hours: OpeningHours,
    ) -> Result<(), ConsultorioError> {
        self.record(ConsultorioEvent::OpeningHoursChanged {
            id: self.id,
            opening_hours,
        })
    }

    /// Applies every field of the draft that differs from the current state.
    pub fn revise(&mut self, draft: ConsultorioDraft) -> Result<(), ConsultorioError> {
        if draft.title.trim() != self.title || draft.description.trim() != self.description {
            self.change_details(draft.title, draft.description)?;
        }
        if draft.address != self.address {
            self.change_address(draft.address)?;
        }
        if draft.pricing != self.pricing {
            self.change_pricing(draft.pricing)?;
        }
        if normalize_amenities(draft.amenities.clone()) != self.amenities {
            self.change_amenities(draft.amenities)?;
        }
        if draft.opening_hours != self.opening_hours {
            self.change_opening_hours(draft.opening_hours)?;
        }
        Ok(())
    }

    pub fn add_image(&mut self, image: MediaId) -> Result<(), ConsultorioError> {
        self.record(ConsultorioEvent::ImageAdded { id: self.id, image })
    }

    pub fn remove_image(&mut self, image: MediaId) -> Result<(), ConsultorioError> {
        self.record(ConsultorioEvent::ImageRemoved { id: self.id, image })
    }

    pub fn approve(&mut self) -> Result<(), ConsultorioError> {
        self.record(ConsultorioEvent::Approved { id: self.id })
    }

    pub fn revoke_approval(&mut self) -> Result<(), ConsultorioError> {
        self.record(ConsultorioEvent::ApprovalRevoked { id: self.id })
    }

    pub fn activate(&mut self) -> Result<(), ConsultorioError> {
        self.record(ConsultorioEvent::Activated { id: self.id })
    }

    pub fn deactivate(&mut self) -> Result<(), ConsultorioError> {
        self.record(ConsultorioEvent::Deactivated { id: self.id })
    }

    pub fn delete(&mut self) -> Result<(), ConsultorioError> {
        self.record(ConsultorioEvent::ConsultorioDeleted { id: self.id })
    }

    pub fn owner(&self) -> ProfileId {
        self.owner
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn description(&self) -> &str {
        &self.description
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn pricing(&self) -> &Pricing {
        &self.pricing
    }

    pub fn amenities(&self) -> &[String] {
        &self.amenities
    }

    pub fn opening_hours(&self) -> &OpeningHours {
        &self.opening_hours
    }

    pub fn images(&self) -> &[MediaId] {
        &self.images
    }

    pub fn is_active(&self) -> bool {
        self.active
    }

    pub fn is_approved(&self) -> bool {
        self.approved
    }

    pub fn is_deleted(&self) -> bool {
        self.deleted
    }

    /// Listed publicly and open for reservations.
    pub fn is_bookable(&self) -> bool {
        self.active && self.approved && !self.deleted
    }

    fn is_created(&self) -> bool {
        !self.title.is_empty()
    }

    fn validate_id(&self, id: &ConsultorioId) -> Result<(), ConsultorioError> {
        if !self.is_created() || self.id != *id {
            return Err(ConsultorioError::MismatchedId);
        }
        if self.deleted {
            return Err(ConsultorioError::Deleted);
        }
        Ok(())
    }

    fn validate_details(title: &str) -> Result<(), ConsultorioError> {
        if title.trim().is_empty() {
            return Err(ConsultorioError::TitleIsBlank);
        }
        if title.chars().count() > 120 {
            return Err(ConsultorioError::TitleTooLong);
        }
        Ok(())
    }

    fn validate_address(address: &Address) -> Result<(), ConsultorioError> {
        if address.street.trim().is_empty() || address.city.trim().is_empty() {
            return Err(ConsultorioError::IncompleteAddress);
        }
        Ok(())
    }

    fn validate_pricing(pricing: &Pricing) -> Result<(), ConsultorioError> {
        let mut prices = pricing.prices().peekable();
        let currency = match prices.peek() {
            Some(price) => price.currency(),
            None => return Err(ConsultorioError::PricingRequired),
        };
        for price in prices {
            if !price.is_positive() {
                return Err(ConsultorioError::NonPositivePrice);
            }
            if price.currency() != currency {
                return Err(ConsultorioError::MixedCurrencies);
            }
        }
        Ok(())
    }

    fn validate_amenities(amenities: &[String]) -> Result<(), ConsultorioError> {
        match amenities.iter().any(|a| a.trim().is_empty()) {
            true => Err(ConsultorioError::AmenityIsBlank),
            false => Ok(()),
        }
    }

    fn validate_opening_hours(opening_hours: &OpeningHours) -> Result<(), ConsultorioError> {
        if opening_hours.days.is_empty() {
            return Err(ConsultorioError::NoOpeningDays);
        }
        if opening_hours.open >= opening_hours.close {
            return Err(ConsultorioError::InvalidOpeningHours);
        }
        Ok(())
    }

    fn validate_image_added(&self, image: &MediaId) -> Result<(), ConsultorioError> {
        if self.images.contains(image) {
            return Err(ConsultorioError::DuplicateImage);
        }
        if self.images.len() >= MAX_IMAGES {
            return Err(ConsultorioError::TooManyImages);
        }
        Ok(())
    }

    fn validate_image_removed(&self, image: &MediaId) -> Result<(), ConsultorioError> {
        match self.images.contains(image) {
            true => Ok(()),
            false => Err(ConsultorioError::ImageNotFound),
        }
    }
}

fn normalize_amenities(amenities: Vec<String>) -> Vec<String> {
    let mut normalized: Vec<String> = Vec::with_capacity(amenities.len());
    for amenity in amenities {
        let amenity = amenity.trim();
        if !amenity.is_empty() && !normalized.iter().any(|a| a.eq_ignore_ascii_case(amenity)) {
            normalized.push(amenity.to_owned());
        }
    }
    normalized
}

impl Entity for Consultorio {
    type Id = ConsultorioId;

    const ENTITY_NAME: &'static str = "consultorio";

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Aggregation for Consultorio {
    type Event = ConsultorioEvent;
    type Error = ConsultorioError;

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            ConsultorioEvent::ConsultorioCreated {
                title,
                address,
                pricing,
                amenities,
                opening_hours,
                ..
            } => {
                if self.is_created() {
                    return Err(ConsultorioError::AlreadyCreated);
                }
                Self::validate_details(title)?;
                Self::validate_address(address)?;
                Self::validate_pricing(pricing)?;
                Self::validate_amenities(amenities)?;
                Self::validate_opening_hours(opening_hours)
            }
            ConsultorioEvent::DetailsChanged { id, title, .. } => {
                self.validate_id(id)?;
                Self::validate_details(title)
            }
            ConsultorioEvent::AddressChanged { id, address } => {
                self.validate_id(id)?;
                Self::validate_address(address)
            }
            ConsultorioEvent::PricingChanged { id, pricing } => {
                self.validate_id(id)?;
                Self::validate_pricing(pricing)
            }
            ConsultorioEvent::AmenitiesChanged { id, amenities } => {
                self.validate_id(id)?;
                Self::validate_amenities(amenities)
            }
            ConsultorioEvent::OpeningHoursChanged { id, opening_hours } => {
                self.validate_id(id)?;
                Self::validate_opening_hours(opening_hours)
            }
            ConsultorioEvent::ImageAdded { id, image } => {
                self.validate_id(id)?;
                self.validate_image_added(image)
            }
            ConsultorioEvent::ImageRemoved { id, image } => {
                self.validate_id(id)?;
                self.validate_image_removed(image)
            }
            ConsultorioEvent::Approved { id } => {
                self.validate_id(id)?;
                match self.approved {
                    true => Err(ConsultorioError::AlreadyApproved),
                    false => Ok(()),
                }
            }
            ConsultorioEvent::ApprovalRevoked { id } => {
                self.validate_id(id)?;
                match self.approved {
                    true => Ok(()),
                    false => Err(ConsultorioError::NotApproved),
                }
            }
            ConsultorioEvent::Activated { id } => {
                self.validate_id(id)?;
                match self.active {
                    true => Err(ConsultorioError::AlreadyActive),
                    false => Ok(()),
                }
            }
            ConsultorioEvent::Deactivated { id } => {
                self.validate_id(id)?;
                match self.active {
                    true => Ok(()),
                    false => Err(ConsultorioError::AlreadyInactive),
                }
            }
            ConsultorioEvent::ConsultorioDeleted { id } => self.validate_id(id),
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            ConsultorioEvent::ConsultorioCreated {
                id,
                owner,
                title,
                description,
                address,
                pricing,
                amenities,
                opening_hours,
            } => {
                self.id = id;
                self.owner = owner;
                self.title = title;
                self.description = description;
                self.address = address;
                self.pricing = pricing;
                self.amenities = amenities;
                self.opening_hours = opening_hours;
                self.active = true;
                self.approved = false;
            }
            ConsultorioEvent::DetailsChanged {
                title, description, ..
            } => {
                self.title = title;
                self.description = description;
            }
            ConsultorioEvent::AddressChanged { address, .. } => self.address = address,
            ConsultorioEvent::PricingChanged { pricing, .. } => self.pricing = pricing,
            ConsultorioEvent::AmenitiesChanged { amenities, .. } => self.amenities = amenities,
            ConsultorioEvent::OpeningHoursChanged { opening_hours, .. } => {
                self.opening_hours = opening_hours
            }
            ConsultorioEvent::ImageAdded { image, .. } => self.images.push(image),
            ConsultorioEvent::ImageRemoved { image, .. } => self.images.retain(|i| *i != image),
            ConsultorioEvent::Approved { .. } => self.approved = true,
            ConsultorioEvent::ApprovalRevoked { .. } => self.approved = false,
            ConsultorioEvent::Activated { .. } => self.active = true,
            ConsultorioEvent::Deactivated { .. } => self.active = false,
            ConsultorioEvent::ConsultorioDeleted { .. } => {
                self.deleted = true;
                self.active = false;
            }
        }
    }

    fn events(&self) -> &EventQueue<Self::Event> {
        &self.events
    }

    fn events_mut(&mut self) -> &mut EventQueue<Self::Event> {
        &mut self.events
    }
}

impl PartialEq for Consultorio {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.owner == other.owner
            && self.title == other.title
            && self.description == other.description
            && self.address == other.address
            && self.pricing == other.pricing
            && self.amenities == other.amenities
            && self.opening_hours == other.opening_hours
            && self.images == other.images
            && self.active == other.active
            && self.approved == other.approved
            && self.deleted == other.deleted
    }
}

impl Eq for Consultorio {}

/// 診察室エラー
#[derive(Error, Display, Debug, PartialEq, Eq)]
pub enum ConsultorioError {
    #[display(fmt = "ID does not match")]
    MismatchedId,
    #[display(fmt = "Consultorio already exists")]
    AlreadyCreated,
    #[display(fmt = "Consultorio has been deleted")]
    Deleted,
    #[display(fmt = "Title cannot be blank")]
    TitleIsBlank,
    #[display(fmt = "Title is longer than 120 characters")]
    TitleTooLong,
    #[display(fmt = "Street and city are required")]
    IncompleteAddress,
    #[display(fmt = "At least one price is required")]
    PricingRequired,
    #[display(fmt = "Prices must be positive")]
    NonPositivePrice,
    #[display(fmt = "All prices must use the same currency")]
    MixedCurrencies,
    #[display(fmt = "Amenity cannot be blank")]
    AmenityIsBlank,
    #[display(fmt = "At least one opening day is required")]
    NoOpeningDays,
    #[display(fmt = "Opening time must be before closing time")]
    InvalidOpeningHours,
    #[display(fmt = "Image is already attached")]
    DuplicateImage,
    #[display(fmt = "A consultorio can have at most 10 images")]
    TooManyImages,
    #[display(fmt = "Image not found")]
    ImageNotFound,
    #[display(fmt = "Consultorio is already approved")]
    AlreadyApproved,
    #[display(fmt = "Consultorio is not approved")]
    NotApproved,
    #[display(fmt = "Consultorio is already active")]
    AlreadyActive,
    #[display(fmt = "Consultorio is already inactive")]
    AlreadyInactive,
}
