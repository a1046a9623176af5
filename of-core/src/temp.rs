//! Temperature source hub
//!
//! Hosts push readings for named temperature entities; fan controllers
//! subscribe by entity id. The hub also keeps each entity's last numeric
//! value so a controller can bootstrap a sample without waiting for the
//! next push.

use std::collections::HashMap;

use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::trace;

/// Buffered readings per subscriber before old ones are dropped
const CHANNEL_CAPACITY: usize = 64;

/// One reading of a temperature entity
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum TempReading {
    Celsius(f64),
    Unavailable,
}

impl TempReading {
    /// Interpret a host state string
    ///
    /// `unknown`, `unavailable`, blank and anything that is not a finite
    /// number are all unavailable.
    pub fn parse(state: &str) -> Self {
        let state = state.trim();
        if state.is_empty()
            || state.eq_ignore_ascii_case("unknown")
            || state.eq_ignore_ascii_case("unavailable")
        {
            return Self::Unavailable;
        }
        match state.parse::<f64>() {
            Ok(value) if value.is_finite() => Self::Celsius(value),
            _ => Self::Unavailable,
        }
    }

    pub fn value(&self) -> Option<f64> {
        match self {
            Self::Celsius(v) => Some(*v),
            Self::Unavailable => None,
        }
    }
}

struct EntityChannel {
    last: Option<f64>,
    tx: broadcast::Sender<TempReading>,
}

impl EntityChannel {
    fn new() -> Self {
        let (tx, _) = broadcast::channel(CHANNEL_CAPACITY);
        Self { last: None, tx }
    }
}

/// Fan-out of temperature readings keyed by entity id
#[derive(Default)]
pub struct TempHub {
    entities: RwLock<HashMap<String, EntityChannel>>,
}

impl std::fmt::Debug for TempHub {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let entities = self.entities.read();
        f.debug_struct("TempHub")
            .field("entities", &entities.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl TempHub {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record and broadcast a reading
    pub fn publish(&self, entity: &str, reading: TempReading) {
        let mut entities = self.entities.write();
        let channel = entities
            .entry(entity.to_string())
            .or_insert_with(EntityChannel::new);
        channel.last = reading.value();
        // No receivers is fine; the last value is still kept
        let receivers = channel.tx.send(reading).unwrap_or(0);
        trace!("temp {} -> {:?} ({} subscribers)", entity, reading, receivers);
    }

    /// Publish a raw host state string
    pub fn publish_state(&self, entity: &str, state: &str) {
        self.publish(entity, TempReading::parse(state));
    }

    /// Last numeric value of an entity, if it currently has one
    pub fn current(&self, entity: &str) -> Option<f64> {
        self.entities.read().get(entity).and_then(|c| c.last)
    }

    pub fn subscribe(&self, entity: &str) -> broadcast::Receiver<TempReading> {
        let mut entities = self.entities.write();
        entities
            .entry(entity.to_string())
            .or_insert_with(EntityChannel::new)
            .tx
            .subscribe()
    }
}
