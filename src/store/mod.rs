mod error;
mod mutations;
mod queries;
mod table;

pub use error::{ConflictKind, StoreError};
pub use mutations::{CapacityGuard, Selector, Transition};
pub use queries::TokenRef;

use std::collections::HashMap;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;

use dashmap::DashMap;
use tokio::sync::{RwLock, mpsc, oneshot};
use tracing::info;
use ulid::Ulid;

use crate::limits::MAX_BOOKINGS;
use crate::model::*;
use crate::wal::Wal;

use table::Table;

pub fn now_ms() -> Ms {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as Ms)
        .unwrap_or_default()
}

// ── Group-commit WAL channel ─────────────────────────────

enum WalCommand {
    Append {
        event: Event,
        response: oneshot::Sender<io::Result<()>>,
    },
    Compact {
        events: Vec<Event>,
        response: oneshot::Sender<io::Result<()>>,
    },
    AppendsSinceCompact {
        response: oneshot::Sender<u64>,
    },
}

type PendingAppend = (Event, oneshot::Sender<io::Result<()>>);

/// Owns the WAL. Appends that queue up while a flush is in progress are
/// written together and share one fsync.
async fn wal_writer_loop(mut wal: Wal, mut rx: mpsc::Receiver<WalCommand>) {
    while let Some(cmd) = rx.recv().await {
        let (event, response) = match cmd {
            WalCommand::Append { event, response } => (event, response),
            other => {
                handle_non_append(&mut wal, other);
                continue;
            }
        };
        let mut batch: Vec<PendingAppend> = vec![(event, response)];
        let mut deferred = None;
        while deferred.is_none() {
            match rx.try_recv() {
                Ok(WalCommand::Append { event, response }) => batch.push((event, response)),
                Ok(other) => deferred = Some(other),
                Err(_) => break,
            }
        }
        commit_batch(&mut wal, batch);
        if let Some(other) = deferred {
            handle_non_append(&mut wal, other);
        }
    }
}

fn commit_batch(wal: &mut Wal, batch: Vec<PendingAppend>) {
    metrics::histogram!(crate::observability::WAL_FLUSH_BATCH_SIZE).record(batch.len() as f64);
    let started = std::time::Instant::now();

    let (events, responders): (Vec<Event>, Vec<_>) = batch.into_iter().unzip();
    let result = wal.append_batch(&events);

    metrics::histogram!(crate::observability::WAL_FLUSH_DURATION_SECONDS)
        .record(started.elapsed().as_secs_f64());
    for tx in responders {
        let reply = match &result {
            Ok(()) => Ok(()),
            Err(e) => Err(io::Error::new(e.kind(), e.to_string())),
        };
        let _ = tx.send(reply);
    }
}

fn handle_non_append(wal: &mut Wal, cmd: WalCommand) {
    match cmd {
        WalCommand::Compact { events, response } => {
            let result =
                Wal::write_snapshot(wal.path(), &events).and_then(|()| wal.install_snapshot());
            let _ = response.send(result);
        }
        WalCommand::AppendsSinceCompact { response } => {
            let _ = response.send(wal.appends_since_compact());
        }
        WalCommand::Append { response, .. } => {
            let _ = response.send(Err(io::Error::other("append routed outside a batch")));
        }
    }
}

// ── Store ────────────────────────────────────────────────

type Shard = Arc<RwLock<Table>>;

/// Durable record of bookings. Owns the uniqueness constraints and the
/// conditional status updates that arbitrate confirm/cancel/expire races.
///
/// Bookings are sharded by tenant scope, matching how slot uniqueness and
/// capacity are scoped. Every mutation takes its shard's write lock, logs its
/// event, then applies it, so a check and the write it guards can never be
/// split by another writer. Writers in different scopes wait on the WAL
/// together and share a flush.
pub struct BookingStore {
    shards: DashMap<TenantScope, Shard>,
    /// Booking id → owning scope.
    homes: DashMap<Ulid, TenantScope>,
    /// Confirmation or cancellation token → owning scope.
    token_homes: DashMap<String, TenantScope>,
    /// Writers hold it shared; compaction takes it exclusively so the
    /// snapshot sees no half-applied mutation.
    gate: RwLock<()>,
    wal_tx: mpsc::Sender<WalCommand>,
}

impl BookingStore {
    /// Replay the log at `wal_path` and start its writer task. Needs a Tokio runtime.
    pub fn open(wal_path: PathBuf) -> io::Result<Self> {
        let (wal, events) = Wal::recover(&wal_path)?;
        let (wal_tx, wal_rx) = mpsc::channel(4096);
        tokio::spawn(wal_writer_loop(wal, wal_rx));

        let store = Self {
            shards: DashMap::new(),
            homes: DashMap::new(),
            token_homes: DashMap::new(),
            gate: RwLock::new(()),
            wal_tx,
        };
        let mut tables: HashMap<TenantScope, Table> = HashMap::new();
        for event in &events {
            let scope = match event {
                Event::BookingCreated(b) => b.scope(),
                Event::StatusChanged { id, .. } | Event::BookingDeleted { id } => {
                    match store.home_of(id) {
                        Some(scope) => scope,
                        None => continue,
                    }
                }
            };
            store.apply(&scope, tables.entry(scope.clone()).or_default(), event);
        }
        for (scope, table) in tables {
            store.shards.insert(scope, Arc::new(RwLock::new(table)));
        }
        info!(
            "booking store opened: {} bookings in {} scopes from {} events in {}",
            store.homes.len(),
            store.shards.len(),
            events.len(),
            wal_path.display()
        );
        Ok(store)
    }

    fn home_of(&self, id: &Ulid) -> Option<TenantScope> {
        self.homes.get(id).map(|s| s.value().clone())
    }

    fn token_home(&self, token: &str) -> Option<TenantScope> {
        self.token_homes.get(token).map(|s| s.value().clone())
    }

    /// The shard for `scope`, if it holds anything yet.
    fn shard(&self, scope: &TenantScope) -> Option<Shard> {
        self.shards.get(scope).map(|s| s.value().clone())
    }

    fn shard_or_create(&self, scope: &TenantScope) -> Shard {
        self.shards.entry(scope.clone()).or_default().value().clone()
    }

    fn all_shards(&self) -> Vec<Shard> {
        self.shards.iter().map(|s| s.value().clone()).collect()
    }

    /// Store-wide constraints a new row must meet on top of its shard's.
    fn check_unique(&self, booking: &Booking) -> Result<(), StoreError> {
        if self.homes.len() >= MAX_BOOKINGS {
            return Err(StoreError::LimitExceeded("too many bookings"));
        }
        if self.homes.contains_key(&booking.id) {
            return Err(StoreError::Conflict(ConflictKind::DuplicateId(booking.id)));
        }
        if self.token_homes.contains_key(&booking.confirmation_token) {
            return Err(StoreError::Conflict(ConflictKind::ConfirmationToken));
        }
        if self.token_homes.contains_key(&booking.cancellation_token) {
            return Err(StoreError::Conflict(ConflictKind::CancellationToken));
        }
        Ok(())
    }

    /// Apply an event to `table` and keep the store-wide indexes in step.
    fn apply(&self, scope: &TenantScope, table: &mut Table, event: &Event) {
        match event {
            Event::BookingCreated(b) => {
                self.homes.insert(b.id, scope.clone());
                self.token_homes.insert(b.confirmation_token.clone(), scope.clone());
                self.token_homes.insert(b.cancellation_token.clone(), scope.clone());
            }
            Event::BookingDeleted { id } => {
                if let Some(row) = table.get(id) {
                    self.token_homes.remove(&row.confirmation_token);
                    self.token_homes.remove(&row.cancellation_token);
                    self.homes.remove(id);
                }
            }
            Event::StatusChanged { .. } => {}
        }
        table.apply(event);
    }

    async fn wal_append(&self, event: &Event) -> Result<(), StoreError> {
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Append {
                event: event.clone(),
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    /// Log the event, then apply it. The caller holds the gate and the
    /// write lock of `scope`'s shard.
    async fn persist_and_apply(
        &self,
        scope: &TenantScope,
        table: &mut Table,
        event: Event,
    ) -> Result<(), StoreError> {
        self.wal_append(&event).await?;
        self.apply(scope, table, &event);
        Ok(())
    }

    /// Rewrite the log as one creation event per stored row.
    pub async fn compact_wal(&self) -> Result<(), StoreError> {
        // With the gate held no mutation is in flight, so the snapshot is
        // queued ahead of any later append.
        let gate = self.gate.write().await;
        let mut events = Vec::new();
        for shard in self.all_shards() {
            events.extend(shard.read().await.snapshot());
        }
        let (tx, rx) = oneshot::channel();
        self.wal_tx
            .send(WalCommand::Compact {
                events,
                response: tx,
            })
            .await
            .map_err(|_| StoreError::Wal("WAL writer shut down".into()))?;
        drop(gate);
        rx.await
            .map_err(|_| StoreError::Wal("WAL writer dropped response".into()))?
            .map_err(|e| StoreError::Wal(e.to_string()))
    }

    pub async fn wal_appends_since_compact(&self) -> u64 {
        let (tx, rx) = oneshot::channel();
        if self
            .wal_tx
            .send(WalCommand::AppendsSinceCompact { response: tx })
            .await
            .is_err()
        {
            return 0;
        }
        rx.await.unwrap_or(0)
    }
}
