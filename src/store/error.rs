use std::fmt;

use ulid::Ulid;

/// Which uniqueness constraint an insert ran into.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConflictKind {
    DuplicateId(Ulid),
    /// Another live booking holds the same `(tenant, startAt, serviceId)`.
    SlotTaken(Ulid),
    /// Overlapping live bookings already fill the capacity.
    SlotFull { booked: u32, capacity: u32 },
    ConfirmationToken,
    CancellationToken,
}

impl fmt::Display for ConflictKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConflictKind::DuplicateId(id) => write!(f, "booking {id} already exists"),
            ConflictKind::SlotTaken(id) => write!(f, "slot already taken by booking {id}"),
            ConflictKind::SlotFull { booked, capacity } => {
                write!(f, "slot is full ({booked}/{capacity})")
            }
            ConflictKind::ConfirmationToken => f.write_str("confirmation token already in use"),
            ConflictKind::CancellationToken => f.write_str("cancellation token already in use"),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("conflict: {0}")]
    Conflict(ConflictKind),
    #[error("invalid booking: {0}")]
    Invalid(&'static str),
    #[error("limit exceeded: {0}")]
    LimitExceeded(&'static str),
    #[error("WAL error: {0}")]
    Wal(String),
}
