//! In-flight loads, one per key.
//!
//! A second request for a key that is already loading attaches to the
//! running flight and receives the same result.

use std::collections::HashMap;
use std::sync::Arc;

use image::RgbaImage;
use tokio::sync::oneshot;
use tokio_util::sync::CancellationToken;

use crate::error::PreviewError;
use crate::state::data::CacheKey;

pub(crate) type Delivery = Result<Arc<RgbaImage>, PreviewError>;

/// Identifies one waiter of one flight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Ticket {
    pub flight_id: u64,
    pub waiter_id: u64,
}

struct Flight {
    id: u64,
    token: CancellationToken,
    waiters: Vec<(u64, oneshot::Sender<Delivery>)>,
}

#[derive(Default)]
pub(crate) struct FlightMap {
    flights: HashMap<CacheKey, Flight>,
    next_id: u64,
}

impl FlightMap {
    fn next_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Join the flight already loading `key`, if there is one
    pub fn attach(&mut self, key: &CacheKey) -> Option<(Ticket, oneshot::Receiver<Delivery>)> {
        let waiter_id = self.next_id();
        let flight = self.flights.get_mut(key)?;
        let (tx, rx) = oneshot::channel();
        flight.waiters.push((waiter_id, tx));
        Some((
            Ticket {
                flight_id: flight.id,
                waiter_id,
            },
            rx,
        ))
    }

    /// Register a new flight for `key` with a single waiter
    pub fn start(
        &mut self,
        key: CacheKey,
    ) -> (Ticket, oneshot::Receiver<Delivery>, CancellationToken) {
        let flight_id = self.next_id();
        let waiter_id = self.next_id();
        let token = CancellationToken::new();
        let (tx, rx) = oneshot::channel();

        self.flights.insert(
            key,
            Flight {
                id: flight_id,
                token: token.clone(),
                waiters: vec![(waiter_id, tx)],
            },
        );

        (
            Ticket {
                flight_id,
                waiter_id,
            },
            rx,
            token,
        )
    }

    /// Remove one waiter. The last waiter leaving cancels the flight and
    /// forgets it, so the next request for the key starts over.
    /// Returns true when the flight was cancelled.
    pub fn detach(&mut self, key: &CacheKey, ticket: Ticket) -> bool {
        let Some(flight) = self.flights.get_mut(key) else {
            return false;
        };
        if flight.id != ticket.flight_id {
            return false;
        }

        flight.waiters.retain(|(id, _)| *id != ticket.waiter_id);
        if !flight.waiters.is_empty() {
            return false;
        }

        flight.token.cancel();
        self.flights.remove(key);
        true
    }

    /// Take the waiters of a finished flight. A flight that was cancelled
    /// and replaced by a newer one for the same key is left alone.
    pub fn finish(&mut self, key: &CacheKey, flight_id: u64) -> Vec<oneshot::Sender<Delivery>> {
        match self.flights.get(key) {
            Some(flight) if flight.id == flight_id => {}
            _ => return Vec::new(),
        }

        self.flights
            .remove(key)
            .map(|flight| flight.waiters.into_iter().map(|(_, tx)| tx).collect())
            .unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.flights.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::state::data::{ComponentName, PreviewSize, UserId};

    fn key() -> CacheKey {
        CacheKey::new(
            ComponentName::new("p", "p.W"),
            UserId::OWNER,
            PreviewSize::new(2, 2),
        )
    }

    #[test]
    fn test_attach_joins_running_flight() {
        let mut map = FlightMap::default();
        assert!(map.attach(&key()).is_none());

        let (first, _rx1, _token) = map.start(key());
        let (second, _rx2) = map.attach(&key()).unwrap();

        assert_eq!(first.flight_id, second.flight_id);
        assert_ne!(first.waiter_id, second.waiter_id);
        assert_eq!(map.finish(&key(), first.flight_id).len(), 2);
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn test_last_detach_cancels() {
        let mut map = FlightMap::default();
        let (first, _rx1, token) = map.start(key());
        let (second, _rx2) = map.attach(&key()).unwrap();

        assert!(!map.detach(&key(), first));
        assert!(!token.is_cancelled());

        assert!(map.detach(&key(), second));
        assert!(token.is_cancelled());
        assert_eq!(map.len(), 0);
    }

    #[test]
    fn test_stale_flight_does_not_finish_newer_one() {
        let mut map = FlightMap::default();
        let (old, _rx1, _t1) = map.start(key());
        map.detach(&key(), old);
        let (new, _rx2, _t2) = map.start(key());

        assert!(map.finish(&key(), old.flight_id).is_empty());
        assert_eq!(map.len(), 1);
        assert_eq!(map.finish(&key(), new.flight_id).len(), 1);
    }

    #[test]
    fn test_detach_from_stale_ticket_is_noop() {
        let mut map = FlightMap::default();
        let (old, _rx1, _t1) = map.start(key());
        map.finish(&key(), old.flight_id);
        let (_new, _rx2, token) = map.start(key());

        assert!(!map.detach(&key(), old));
        assert!(!token.is_cancelled());
    }
}
