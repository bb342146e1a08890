use ulid::Ulid;

use crate::model::*;

use super::{BookingStore, ConflictKind, StoreError};

/// Which row a conditional update targets.
#[derive(Debug, Clone, Copy)]
pub enum Selector<'a> {
    /// By id; with a scope, rows of other tenants are invisible.
    Id {
        id: Ulid,
        scope: Option<&'a TenantScope>,
    },
    ConfirmationToken(&'a str),
    CancellationToken(&'a str),
    /// The tenant and `{email, startAt, serviceId}` carried in a signed confirmation token.
    Identity {
        scope: &'a TenantScope,
        email: &'a str,
        start_at: Ms,
        service_id: &'a str,
    },
}

/// A guarded status change: applies only if the row's current status is in `from`.
#[derive(Debug, Clone, Copy)]
pub struct Transition<'a> {
    pub from: &'a [BookingStatus],
    pub to: BookingStatus,
    /// Also require `expires_at > now` (unconfirmed holds only).
    pub require_unexpired: bool,
}

impl Transition<'_> {
    pub const fn new(from: &[BookingStatus], to: BookingStatus) -> Transition<'_> {
        Transition {
            from,
            to,
            require_unexpired: false,
        }
    }

    pub const fn unexpired(mut self) -> Self {
        self.require_unexpired = true;
        self
    }

    fn admits(&self, b: &Booking, now: Ms) -> bool {
        self.from.contains(&b.status)
            && (!self.require_unexpired || b.expires_at.is_some_and(|exp| exp > now))
    }
}

/// Capacity a new booking must still fit in when it is written.
#[derive(Debug, Clone, Copy)]
pub struct CapacityGuard<'a> {
    pub span: Span,
    /// Statuses that count against `limit`.
    pub counted: &'a [BookingStatus],
    pub limit: u32,
    pub now: Ms,
}

impl BookingStore {
    /// Persist a new booking. Fails with `Conflict` if the slot, id, or either token is taken.
    pub async fn insert(&self, booking: Booking) -> Result<Booking, StoreError> {
        let _gate = self.gate.read().await;
        let scope = booking.scope();
        let shard = self.shard_or_create(&scope);
        let mut table = shard.write().await;
        self.check_unique(&booking)?;
        table.check_insert(&booking)?;
        self.persist_and_apply(&scope, &mut table, Event::BookingCreated(booking.clone()))
            .await?;
        Ok(booking)
    }

    /// Insert only if the booking's scope still has room over `guard.span`.
    /// The count and the write share one lock, so concurrent creations for
    /// different services cannot overfill a slot.
    pub async fn insert_within(
        &self,
        booking: Booking,
        guard: CapacityGuard<'_>,
    ) -> Result<Booking, StoreError> {
        let _gate = self.gate.read().await;
        let scope = booking.scope();
        let shard = self.shard_or_create(&scope);
        let mut table = shard.write().await;
        let booked = table
            .near(&guard.span)
            .filter(|b| {
                guard.counted.contains(&b.status)
                    && b.is_live(guard.now)
                    && b.occupies(&guard.span)
            })
            .count() as u32;
        if booked >= guard.limit {
            return Err(StoreError::Conflict(ConflictKind::SlotFull {
                booked,
                capacity: guard.limit,
            }));
        }
        self.check_unique(&booking)?;
        table.check_insert(&booking)?;
        self.persist_and_apply(&scope, &mut table, Event::BookingCreated(booking.clone()))
            .await?;
        Ok(booking)
    }

    /// Compare-and-set on status. Match, guard and write happen under one lock;
    /// `Ok(None)` means no row matched or the guard refused (already resolved).
    ///
    /// Leaving `AwaitingEmailConfirmation` clears `expires_at`.
    pub async fn update_status(
        &self,
        selector: Selector<'_>,
        transition: Transition<'_>,
        now: Ms,
    ) -> Result<Option<Booking>, StoreError> {
        if transition.to == BookingStatus::AwaitingEmailConfirmation {
            return Err(StoreError::Invalid("cannot move a booking back to unconfirmed"));
        }
        let _gate = self.gate.read().await;

        let home = match selector {
            Selector::Id { id, scope } => self
                .home_of(&id)
                .filter(|home| scope.is_none_or(|s| s == home)),
            Selector::ConfirmationToken(token) | Selector::CancellationToken(token) => {
                self.token_home(token)
            }
            Selector::Identity { scope, .. } => Some(scope.clone()),
        };
        let Some((home, shard)) = home.and_then(|h| self.shard(&h).map(|s| (h, s))) else {
            return Ok(None);
        };
        let mut table = shard.write().await;

        let target = match selector {
            Selector::Id { id, .. } => table.get(&id),
            Selector::ConfirmationToken(token) => table.by_confirmation_token(token),
            Selector::CancellationToken(token) => table.by_cancellation_token(token),
            Selector::Identity {
                email,
                start_at,
                service_id,
                ..
            } => table.starting_within(start_at, start_at + 1).find(|b| {
                b.service_id == service_id
                    && b.customer.email == email
                    && transition.admits(b, now)
            }),
        };
        let Some(current) = target.filter(|b| transition.admits(b, now)) else {
            return Ok(None);
        };

        let id = current.id;
        let event = Event::StatusChanged {
            id,
            status: transition.to,
            expires_at: None,
            updated_at: now,
        };
        self.persist_and_apply(&home, &mut table, event).await?;
        Ok(table.get(&id).cloned())
    }

    /// Hard delete, restricted to `scope`. `Ok(None)` if no such booking in that scope.
    pub async fn delete(&self, id: Ulid, scope: &TenantScope) -> Result<Option<Booking>, StoreError> {
        let _gate = self.gate.read().await;
        if self.home_of(&id).as_ref() != Some(scope) {
            return Ok(None);
        }
        let Some(shard) = self.shard(scope) else {
            return Ok(None);
        };
        let mut table = shard.write().await;
        let Some(existing) = table.get(&id).cloned() else {
            return Ok(None);
        };
        self.persist_and_apply(scope, &mut table, Event::BookingDeleted { id })
            .await?;
        Ok(Some(existing))
    }
}
