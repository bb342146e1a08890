use ulid::Ulid;

use crate::model::*;

use super::BookingStore;

#[derive(Debug, Clone, Copy)]
pub enum TokenRef<'a> {
    Confirmation(&'a str),
    Cancellation(&'a str),
}

impl BookingStore {
    pub async fn len(&self) -> usize {
        self.homes.len()
    }

    pub async fn find_by_id(&self, id: &Ulid) -> Option<Booking> {
        let shard = self.shard(&self.home_of(id)?)?;
        let table = shard.read().await;
        table.get(id).cloned()
    }

    pub async fn find_by_token(&self, token: TokenRef<'_>) -> Option<Booking> {
        let raw = match token {
            TokenRef::Confirmation(t) | TokenRef::Cancellation(t) => t,
        };
        let shard = self.shard(&self.token_home(raw)?)?;
        let table = shard.read().await;
        match token {
            TokenRef::Confirmation(t) => table.by_confirmation_token(t).cloned(),
            TokenRef::Cancellation(t) => table.by_cancellation_token(t).cloned(),
        }
    }

    /// Bookings matching `filter`, sorted by `start_at` ascending.
    pub async fn find_many(&self, filter: &BookingFilter) -> Vec<Booking> {
        let Some(shard) = self.shard(&filter.scope) else {
            return Vec::new();
        };
        let table = shard.read().await;
        match filter.window {
            Some(w) => table
                .starting_within(w.start, w.end)
                .filter(|b| filter.matches(b))
                .cloned()
                .collect(),
            None => table.ordered().filter(|b| filter.matches(b)).cloned().collect(),
        }
    }

    /// Bookings in `scope` with a status in `statuses` that may occupy part of `span`.
    /// Callers still apply their own overlap test.
    pub async fn find_near(
        &self,
        scope: &TenantScope,
        statuses: &[BookingStatus],
        span: &Span,
    ) -> Vec<Booking> {
        let Some(shard) = self.shard(scope) else {
            return Vec::new();
        };
        let table = shard.read().await;
        table
            .near(span)
            .filter(|b| statuses.contains(&b.status))
            .cloned()
            .collect()
    }

    /// Ids of unconfirmed bookings whose hold ran out strictly before `now`,
    /// across every scope.
    pub async fn collect_expired(&self, now: Ms) -> Vec<Ulid> {
        let mut expired = Vec::new();
        for shard in self.all_shards() {
            let table = shard.read().await;
            expired.extend(
                table
                    .ordered()
                    .filter(|b| {
                        b.status == BookingStatus::AwaitingEmailConfirmation
                            && b.expires_at.is_some_and(|exp| exp < now)
                    })
                    .map(|b| b.id),
            );
        }
        expired
    }
}
