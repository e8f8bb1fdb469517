use std::io::Cursor;

use derive_more::{Deref, Display, Error, From};
use image::{io::Reader, ImageFormat};
use serde::{Deserialize, Serialize};
use serde_with::{serde_as, DisplayFromStr};

use crate::domain::{Aggregation, Entity, Event, EventQueue, Id};

use super::{Mime, ProfileId};

/// メディアID
#[serde_as]
#[derive(
    Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize, Display, From, Deref, Default,
)]
pub struct MediaId(#[serde_as(as = "DisplayFromStr")] u64);

impl Id for MediaId {
    type Inner = u64;
}

/// メディアイベント
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub enum MediaEvent {
    MediaUploaded {
        id: MediaId,
        owner: ProfileId,
        mime: Mime,
        width: u32,
        height: u32,
        #[serde(with = "serde_bytes")]
        data: Vec<u8>,
    },
    MediaDeleted {
        id: MediaId,
    },
}

impl Event for MediaEvent {
    type Id = MediaId;
}

/// Uploaded image. Listing photos and avatars share this entity.
#[derive(Debug, Default, Clone)]
pub struct Media {
    id: MediaId,
    owner: ProfileId,
    mime: Mime,
    width: u32,
    height: u32,
    data: Vec<u8>,
    events: EventQueue<MediaEvent>,
}

impl Media {
    pub fn upload(
        id: MediaId,
        owner: ProfileId,
        data: Vec<u8>,
        max_bytes: usize,
    ) -> Result<Self, MediaError> {
        if data.is_empty() {
            return Err(MediaError::DataIsEmpty);
        }
        if data.len() > max_bytes {
            return Err(MediaError::TooLarge);
        }
        let format = image::guess_format(&data).map_err(|_| MediaError::UnsupportedFormat)?;
        if !matches!(
            format,
            ImageFormat::Jpeg | ImageFormat::Png | ImageFormat::WebP | ImageFormat::Gif
        ) {
            return Err(MediaError::UnsupportedFormat);
        }
        let (width, height) = Reader::with_format(Cursor::new(&data), format)
            .into_dimensions()
            .map_err(|_| MediaError::Undecodable)?;
        let mime = format
            .to_mime_type()
            .parse::<Mime>()
            .map_err(|_| MediaError::UnsupportedFormat)?;
        let mut entity = Media::default();
        entity.record(MediaEvent::MediaUploaded {
            id,
            owner,
            mime,
            width,
            height,
            data,
        })?;
        Ok(entity)
    }

    pub fn delete(&mut self) -> Result<(), MediaError> {
        self.record(MediaEvent::MediaDeleted { id: self.id })
    }

    pub fn owner(&self) -> ProfileId {
        self.owner
    }

    pub fn mime(&self) -> &Mime {
        &self.mime
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }
}

impl Entity for Media {
    type Id = MediaId;

    const ENTITY_NAME: &'static str = "media";

    fn id(&self) -> Self::Id {
        self.id
    }
}

impl Aggregation for Media {
    type Event = MediaEvent;
    type Error = MediaError;

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error> {
        match event {
            MediaEvent::MediaUploaded { data, mime, .. } => {
                if data.is_empty() {
                    return Err(MediaError::DataIsEmpty);
                }
                if !mime.is_image() {
                    return Err(MediaError::UnsupportedFormat);
                }
                Ok(())
            }
            MediaEvent::MediaDeleted { id } => match self.id == *id {
                true => Ok(()),
                false => Err(MediaError::MismatchedId),
            },
        }
    }

    fn apply(&mut self, event: Self::Event) {
        match event {
            MediaEvent::MediaUploaded {
                id,
                owner,
                mime,
                width,
                height,
                data,
            } => {
                self.id = id;
                self.owner = owner;
                self.mime = mime;
                self.width = width;
                self.height = height;
                self.data = data;
            }
            MediaEvent::MediaDeleted { .. } => self.data.clear(),
        }
    }

    fn events(&self) -> &EventQueue<Self::Event> {
        &self.events
    }

    fn events_mut(&mut self) -> &mut EventQueue<Self::Event> {
        &mut self.events
    }
}

impl PartialEq for Media {
    fn eq(&self, other: &Self) -> bool {
        self.id == other.id
            && self.owner == other.owner
            && self.mime == other.mime
            && self.data == other.data
    }
}

impl Eq for Media {}

#[derive(Error, Display, Debug, PartialEq, Eq)]
pub enum MediaError {
    #[display(fmt = "ID does not match")]
    MismatchedId,
    #[display(fmt = "Data cannot be empty")]
    DataIsEmpty,
    #[display(fmt = "File is too large")]
    TooLarge,
    #[display(fmt = "Only JPEG, PNG, WebP and GIF images are accepted")]
    UnsupportedFormat,
    #[display(fmt = "Image could not be decoded")]
    Undecodable,
}

#[cfg(test)]
pub(crate) mod tests {
    use image::{DynamicImage, ImageOutputFormat, RgbImage};

    use super::*;

    pub(crate) fn png(width: u32, height: u32) -> Vec<u8> {
        let mut bytes = Cursor::new(Vec::new());
        DynamicImage::ImageRgb8(RgbImage::new(width, height))
            .write_to(&mut bytes, ImageOutputFormat::Png)
            .unwrap();
        bytes.into_inner()
    }

    #[test]
    fn test_upload_png() {
        let media = Media::upload(7.into(), 1.into(), png(4, 3), 1024 * 1024).unwrap();
        assert_eq!(media.mime().to_string(), "image/png");
        assert_eq!(media.dimensions(), (4, 3));
        assert_eq!(media.owner(), ProfileId::from(1));
    }

    #[test]
    fn test_upload_rejects_non_images() {
        let result = Media::upload(7.into(), 1.into(), b"%PDF-1.7 ...".to_vec(), 1024);
        assert_eq!(result.unwrap_err(), MediaError::UnsupportedFormat);
        let result = Media::upload(7.into(), 1.into(), Vec::new(), 1024);
        assert_eq!(result.unwrap_err(), MediaError::DataIsEmpty);
    }

    #[test]
    fn test_upload_enforces_size_limit() {
        let data = png(64, 64);
        let limit = data.len() - 1;
        assert_eq!(
            Media::upload(7.into(), 1.into(), data, limit).unwrap_err(),
            MediaError::TooLarge
        );
    }
}
