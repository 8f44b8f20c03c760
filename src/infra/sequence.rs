//! Sequence allocator
//!
//! Hands out human-readable, strictly increasing identifiers per sequence
//! name. The increment is delegated to the store's atomic upsert, so
//! concurrent callers never observe the same value.
//!
//! # Compensation
//!
//! Allocations made inside a workflow session roll back with the session.
//! Allocations made outside one go through a reservation:
//!
//! ```text
//! reserve() ──► Reserved ──► confirm() ──► Confirmed
//!                   │
//!                   └──────► release() ──► Released
//! ```
//!
//! Releasing rewinds the counter only while it still equals the reserved
//! value. If another caller allocated in between, the counter is left alone
//! and the released value stays a gap; it is never handed out twice.

use std::fmt;
use std::sync::Arc;

use tracing::{instrument, warn};

use crate::domain::{EntityKind, SequenceName};
use crate::infra::{DocumentStore, Result};

/// Reservation lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReservationState {
    /// Value allocated, owning write not yet settled
    Reserved,
    /// Owning write committed
    Confirmed,
    /// Owning write failed, value handed back
    Released,
}

impl fmt::Display for ReservationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReservationState::Reserved => write!(f, "reserved"),
            ReservationState::Confirmed => write!(f, "confirmed"),
            ReservationState::Released => write!(f, "released"),
        }
    }
}

/// Outcome of handing an allocated value back
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CompensationOutcome {
    /// Counter returned to its pre-allocation value
    Rewound,
    /// Counter had moved past the allocated value; it was left untouched and
    /// the allocated value is a permanent gap
    Drift { allocated: u64, head: u64 },
}

/// Tentatively allocated sequence value.
///
/// Must be settled through [`SequenceAllocator::confirm`] or
/// [`SequenceAllocator::release`]; dropping an unsettled reservation logs a
/// leaked id.
#[derive(Debug)]
#[must_use = "a reservation must be confirmed or released"]
pub struct SequenceReservation {
    name: SequenceName,
    value: u64,
    state: ReservationState,
}

impl SequenceReservation {
    pub fn name(&self) -> &SequenceName {
        &self.name
    }

    pub fn value(&self) -> u64 {
        self.value
    }

    pub fn state(&self) -> ReservationState {
        self.state
    }
}

impl Drop for SequenceReservation {
    fn drop(&mut self) {
        if self.state == ReservationState::Reserved {
            warn!(
                sequence = %self.name,
                value = self.value,
                "Sequence reservation dropped without confirm or release; value leaked"
            );
        }
    }
}

/// Issues identifiers from named sequences
pub struct SequenceAllocator<S: DocumentStore> {
    store: Arc<S>,
}

impl<S: DocumentStore> Clone for SequenceAllocator<S> {
    fn clone(&self) -> Self {
        Self {
            store: self.store.clone(),
        }
    }
}

impl<S: DocumentStore> SequenceAllocator<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self { store }
    }

    /// Allocate the next value of a sequence.
    ///
    /// With a session the increment joins that transaction and is undone if
    /// it aborts. The first value of a fresh sequence is 1.
    pub async fn next(&self, name: &SequenceName, session: Option<&mut S::Session>) -> Result<u64> {
        self.store.increment_sequence(name, session).await
    }

    /// Allocate the next id for an entity kind, formatted for display
    pub async fn next_entity_id(
        &self,
        kind: EntityKind,
        session: Option<&mut S::Session>,
    ) -> Result<(u64, String)> {
        let value = self.next(&kind.sequence_name(), session).await?;
        Ok((value, kind.format_id(value)))
    }

    /// Allocate outside any transaction, pending confirmation
    #[instrument(skip(self), fields(sequence = %name))]
    pub async fn reserve(&self, name: &SequenceName) -> Result<SequenceReservation> {
        let value = self.store.increment_sequence(name, None).await?;
        Ok(SequenceReservation {
            name: name.clone(),
            value,
            state: ReservationState::Reserved,
        })
    }

    /// Settle a reservation whose owning write committed
    pub fn confirm(&self, mut reservation: SequenceReservation) -> u64 {
        reservation.state = ReservationState::Confirmed;
        reservation.value
    }

    /// Settle a reservation whose owning write failed
    pub async fn release(&self, mut reservation: SequenceReservation) -> Result<CompensationOutcome> {
        let outcome = self.compensate(&reservation.name, reservation.value).await?;
        reservation.state = ReservationState::Released;
        Ok(outcome)
    }

    /// Hand back a value allocated outside a transaction.
    ///
    /// The counter is decremented only if it still sits at `allocated`.
    #[instrument(skip(self), fields(sequence = %name))]
    pub async fn compensate(&self, name: &SequenceName, allocated: u64) -> Result<CompensationOutcome> {
        if self.store.rewind_sequence(name, allocated).await? {
            return Ok(CompensationOutcome::Rewound);
        }

        let head = self.store.sequence_head(name).await?;
        warn!(
            sequence = %name,
            allocated,
            head,
            "Sequence moved past compensated value; leaving gap"
        );
        Ok(CompensationOutcome::Drift { allocated, head })
    }

    /// Current value of a sequence (0 when never allocated)
    pub async fn head(&self, name: &SequenceName) -> Result<u64> {
        self.store.sequence_head(name).await
    }
}
