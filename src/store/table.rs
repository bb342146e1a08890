use std::collections::{BTreeSet, HashMap};

use ulid::Ulid;

use crate::limits::MAX_SPAN_DURATION_MS;
use crate::model::*;

use super::{ConflictKind, StoreError};

/// Bookings of one tenant scope plus the indexes that carry its uniqueness
/// constraints. Ids and tokens are unique store-wide; the store checks those.
///
/// `slots` only holds live (non-cancelled) rows, so cancelling a booking frees
/// its `(tenant, startAt, serviceId)` key for a new one.
#[derive(Default)]
pub(super) struct Table {
    rows: HashMap<Ulid, Booking>,
    by_start: BTreeSet<(Ms, Ulid)>,
    slots: HashMap<SlotKey, Ulid>,
    confirmation_tokens: HashMap<String, Ulid>,
    cancellation_tokens: HashMap<String, Ulid>,
}

impl Table {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn get(&self, id: &Ulid) -> Option<&Booking> {
        self.rows.get(id)
    }

    pub fn by_confirmation_token(&self, token: &str) -> Option<&Booking> {
        self.confirmation_tokens.get(token).and_then(|id| self.rows.get(id))
    }

    pub fn by_cancellation_token(&self, token: &str) -> Option<&Booking> {
        self.cancellation_tokens.get(token).and_then(|id| self.rows.get(id))
    }

    /// All rows ordered by `start_at`, ties in creation order.
    pub fn ordered(&self) -> impl Iterator<Item = &Booking> {
        self.by_start.iter().filter_map(|(_, id)| self.rows.get(id))
    }

    /// Rows starting inside `[start, end)`, ordered by `start_at`.
    pub fn starting_within(&self, start: Ms, end: Ms) -> impl Iterator<Item = &Booking> {
        self.by_start
            .range((start, Ulid::nil())..(end, Ulid::nil()))
            .filter_map(|(_, id)| self.rows.get(id))
    }

    /// Rows whose occupied interval could touch `span`. Ends are bounded by
    /// `MAX_SPAN_DURATION_MS`, so only that much look-behind is needed.
    pub fn near(&self, span: &Span) -> impl Iterator<Item = &Booking> {
        self.starting_within(span.start - MAX_SPAN_DURATION_MS, span.end)
    }

    /// Slot uniqueness and shape checks run before an insert is logged.
    pub fn check_insert(&self, booking: &Booking) -> Result<(), StoreError> {
        booking.check_shape().map_err(StoreError::Invalid)?;
        if let Some(end) = booking.end_at
            && end - booking.start_at > MAX_SPAN_DURATION_MS
        {
            return Err(StoreError::LimitExceeded("booking longer than a day"));
        }
        if booking.status != BookingStatus::Cancelled
            && let Some(holder) = self.slots.get(&booking.slot_key())
        {
            return Err(StoreError::Conflict(ConflictKind::SlotTaken(*holder)));
        }
        Ok(())
    }

    pub fn apply(&mut self, event: &Event) {
        match event {
            Event::BookingCreated(booking) => {
                if booking.status != BookingStatus::Cancelled {
                    self.slots.insert(booking.slot_key(), booking.id);
                }
                self.confirmation_tokens
                    .insert(booking.confirmation_token.clone(), booking.id);
                self.cancellation_tokens
                    .insert(booking.cancellation_token.clone(), booking.id);
                self.by_start.insert((booking.start_at, booking.id));
                self.rows.insert(booking.id, booking.clone());
            }
            Event::StatusChanged {
                id,
                status,
                expires_at,
                updated_at,
            } => {
                let Some(row) = self.rows.get_mut(id) else {
                    return;
                };
                row.status = *status;
                row.expires_at = *expires_at;
                row.updated_at = *updated_at;
                if *status == BookingStatus::Cancelled {
                    let key = row.slot_key();
                    if self.slots.get(&key) == Some(id) {
                        self.slots.remove(&key);
                    }
                }
            }
            Event::BookingDeleted { id } => {
                let Some(row) = self.rows.remove(id) else {
                    return;
                };
                let key = row.slot_key();
                if self.slots.get(&key) == Some(id) {
                    self.slots.remove(&key);
                }
                self.confirmation_tokens.remove(&row.confirmation_token);
                self.cancellation_tokens.remove(&row.cancellation_token);
                self.by_start.remove(&(row.start_at, row.id));
            }
        }
    }

    /// Events that recreate the current table from an empty log.
    pub fn snapshot(&self) -> Vec<Event> {
        self.ordered().cloned().map(Event::BookingCreated).collect()
    }
}
