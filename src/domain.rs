pub mod core;
pub mod payment;

use async_trait::async_trait;
use once_cell::sync;
use serde::{de::DeserializeOwned, Serialize};
use sha2::{Digest, Sha256};
use snowflake::SnowflakeIdGenerator;
use std::{
    collections::VecDeque,
    error::Error,
    fmt::{Debug, Display},
    hash::Hash,
    ops::Deref,
    str::FromStr,
    sync::{Mutex, PoisonError},
};
use thiserror::Error;

use self::{core::CoreEvent, payment::PaymentEvent};

pub trait Id:
    Copy
    + Eq
    + Hash
    + Deref<Target = Self::Inner>
    + From<Self::Inner>
    + Display
    + Debug
    + Serialize
    + DeserializeOwned
    + Send
    + Sync
    + 'static
{
    type Inner: FromStr;
}

pub trait Event: Clone + Eq + Debug + Serialize + DeserializeOwned + Send + Sync + 'static {
    type Id: Id;
}

pub trait Entity {
    type Id: Id;

    /// Prefix of the stream that holds this entity's events.
    const ENTITY_NAME: &'static str;

    fn id(&self) -> Self::Id;
}

/// An event-sourced aggregate.
///
/// Commands build an event, [`Aggregation::record`] validates it against the
/// current state, applies it and queues it for the repository. Replaying a
/// stream only calls [`Aggregation::apply`].
pub trait Aggregation: Entity + Debug + Default + Clone + Send + Sync + 'static {
    type Event: Event<Id = Self::Id>;
    type Error: Error + Send + Sync + 'static;

    fn validate(&self, event: &Self::Event) -> Result<(), Self::Error>;
    fn apply(&mut self, event: Self::Event);
    fn events(&self) -> &EventQueue<Self::Event>;
    fn events_mut(&mut self) -> &mut EventQueue<Self::Event>;

    fn record(&mut self, event: Self::Event) -> Result<(), Self::Error> {
        self.validate(&event)?;
        self.apply(event.clone());
        self.events_mut().push(event);
        Ok(())
    }
    fn revision(&self) -> Option<u64> {
        self.events().revision()
    }
    fn pop(&mut self) -> Option<Self::Event> {
        self.events_mut().pop()
    }
    fn pop_all(&mut self) -> Vec<Self::Event> {
        let mut events = Vec::new();
        while let Some(e) = self.pop() {
            events.push(e);
        }
        events
    }
    fn clear(&mut self) {
        self.events_mut().clear()
    }
    fn peek(&self) -> Option<&Self::Event> {
        self.events().peek()
    }
    fn iter(&self) -> EventQueueIter<'_, Self::Event> {
        self.events().iter()
    }
}

/// Persistence of one aggregate type.
#[async_trait]
pub trait Repository<A: Aggregation>: Send + Sync {
    /// Replays the aggregate's stream. `None` when the stream does not exist.
    async fn find_by_id(&self, id: A::Id) -> Result<Option<A>, DataAccessError>;
    /// Appends the pending events. Fails with [`DataAccessError::Conflict`]
    /// when the stream moved since the aggregate was loaded.
    async fn save(&self, entity: &mut A) -> Result<bool, DataAccessError>;
    /// Removes the aggregate's stream.
    async fn delete(&self, entity: &mut A) -> Result<bool, DataAccessError>;
}

type BoxError = Box<dyn Error + Send + Sync>;

#[derive(Error, Debug)]
pub enum DataAccessError {
    #[error("Database connection error: {0}")]
    ConnectionError(BoxError),
    #[error("Database query error: {0}")]
    QueryError(BoxError),
    #[error("Data read error: {0}")]
    ReadError(BoxError),
    #[error("Data write error: {0}")]
    WriteError(BoxError),
    #[error("Concurrent modification of {0}")]
    Conflict(String),
    #[error("Client side error: {0}")]
    ClientSideError(BoxError),
}

/// Every event the system emits, tagged by bounded context.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DomainEvent {
    Core(CoreEvent),
    Payment(PaymentEvent),
}

impl From<CoreEvent> for DomainEvent {
    fn from(value: CoreEvent) -> Self {
        DomainEvent::Core(value)
    }
}

impl From<PaymentEvent> for DomainEvent {
    fn from(value: PaymentEvent) -> Self {
        DomainEvent::Payment(value)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventQueue<T> {
    queue: VecDeque<T>,
    revision: Option<u64>,
}

impl<T> EventQueue<T> {
    pub fn new() -> Self {
        Self {
            queue: VecDeque::new(),
            revision: None,
        }
    }
    pub fn peek(&self) -> Option<&T> {
        self.queue.front()
    }
    pub fn push(&mut self, value: T) {
        self.queue.push_back(value)
    }
    pub fn pop(&mut self) -> Option<T> {
        self.queue.pop_front()
    }
    pub fn clear(&mut self) {
        self.queue.clear()
    }
    pub fn len(&self) -> usize {
        self.queue.len()
    }
    pub fn is_empty(&self) -> bool {
        self.queue.is_empty()
    }
    pub fn iter(&self) -> EventQueueIter<'_, T> {
        self.queue.iter()
    }
    /// Revision of the last persisted event, `None` for a new stream.
    pub fn revision(&self) -> Option<u64> {
        self.revision
    }
    pub fn set_revision(&mut self, revision: Option<u64>) {
        self.revision = revision;
    }
}

impl<T> IntoIterator for EventQueue<T> {
    type Item = T;
    type IntoIter = EventQueueIntoIter<T>;
    fn into_iter(self) -> Self::IntoIter {
        self.queue.into_iter()
    }
}

impl<T> Default for EventQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

pub type EventQueueIntoIter<T> = std::collections::vec_deque::IntoIter<T>;
pub type EventQueueIter<'a, T> = std::collections::vec_deque::Iter<'a, T>;

pub struct IdGenerator(Mutex<SnowflakeIdGenerator>);

impl IdGenerator {
    pub fn new(gen: SnowflakeIdGenerator) -> Self {
        Self(Mutex::new(gen))
    }

    pub fn generate<T>(&self) -> T
    where
        T: From<u64>,
    {
        let mut gen = self.0.lock().unwrap_or_else(PoisonError::into_inner);
        T::from(gen.generate() as u64)
    }
}

impl From<SnowflakeIdGenerator> for IdGenerator {
    fn from(value: SnowflakeIdGenerator) -> Self {
        Self::new(value)
    }
}

pub static ID_GENERATOR: sync::Lazy<IdGenerator> =
    sync::Lazy::new(|| SnowflakeIdGenerator::new(1, 1).into());

/// Stable identifier for entities keyed by an external string, such as an
/// auth subject or a processor event id. Kept within 63 bits.
pub fn hashed_id<T: From<u64>>(key: &str) -> T {
    let digest = Sha256::digest(key.as_bytes());
    let mut bytes = [0u8; 8];
    bytes.copy_from_slice(&digest[..8]);
    T::from(u64::from_be_bytes(bytes) & (u64::MAX >> 1))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hashed_id_is_stable() {
        let a: u64 = hashed_id("auth|0f6c1e52");
        let b: u64 = hashed_id("auth|0f6c1e52");
        let c: u64 = hashed_id("auth|0f6c1e53");
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(a <= i64::MAX as u64);
    }

    #[test]
    fn test_id_generator_is_monotonic() {
        let first: u64 = ID_GENERATOR.generate();
        let second: u64 = ID_GENERATOR.generate();
        assert!(second > first);
    }

    #[test]
    fn test_event_queue_order() {
        let mut queue = EventQueue::new();
        queue.push(1);
        queue.push(2);
        assert_eq!(queue.peek(), Some(&1));
        assert_eq!(queue.pop(), Some(1));
        assert_eq!(queue.len(), 1);
        queue.set_revision(Some(4));
        queue.clear();
        assert!(queue.is_empty());
        assert_eq!(queue.revision(), Some(4));
    }
}
