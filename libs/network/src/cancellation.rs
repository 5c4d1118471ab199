//! Per-channel invocation cancellation
//!
//! Every outstanding invocation on a channel owns one [`CancellationFlag`],
//! registered under its correlation id. A cancel request flips the flag; the
//! worker checks it once before starting the bean and the bean may poll it
//! while running. Cancellation is advisory: a started invocation is never
//! interrupted, it only observes the request.

use crate::{RemotingError, Result};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;
use tracing::debug;

const WAITING: u8 = 0;
const CANCELLED: u8 = 1;
const STARTED: u8 = 2;
const STARTED_CANCEL_REQUESTED: u8 = 3;

/// Outcome of [`CancellationFlag::cancel`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The invocation had not started and never will
    Prevented,
    /// The invocation is running and has been asked to stop
    Requested,
    /// The invocation is running and interruption was not allowed
    AlreadyRunning,
    /// A cancel had already been recorded
    AlreadyCancelled,
}

/// Cancellation state of one invocation
#[derive(Debug, Default)]
pub struct CancellationFlag {
    state: AtomicU8,
}

impl CancellationFlag {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move from waiting to started; false if a cancel got there first
    pub fn run_if_not_cancelled(&self) -> bool {
        self.state
            .compare_exchange(WAITING, STARTED, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    /// Record a cancel request
    ///
    /// `may_interrupt` controls whether a running invocation gets to see the
    /// request at all.
    pub fn cancel(&self, may_interrupt: bool) -> CancelOutcome {
        let mut current = self.state.load(Ordering::Acquire);
        loop {
            let (next, outcome) = match current {
                WAITING => (CANCELLED, CancelOutcome::Prevented),
                STARTED if may_interrupt => (STARTED_CANCEL_REQUESTED, CancelOutcome::Requested),
                STARTED => return CancelOutcome::AlreadyRunning,
                _ => return CancelOutcome::AlreadyCancelled,
            };
            match self
                .state
                .compare_exchange(current, next, Ordering::AcqRel, Ordering::Acquire)
            {
                Ok(_) => return outcome,
                Err(actual) => current = actual,
            }
        }
    }

    /// True once any cancel that affects this invocation has been recorded
    pub fn is_cancel_requested(&self) -> bool {
        matches!(
            self.state.load(Ordering::Acquire),
            CANCELLED | STARTED_CANCEL_REQUESTED
        )
    }

    pub fn is_started(&self) -> bool {
        matches!(
            self.state.load(Ordering::Acquire),
            STARTED | STARTED_CANCEL_REQUESTED
        )
    }
}

/// Outstanding invocations of one channel, keyed by correlation id
#[derive(Debug, Default)]
pub struct CancellationRegistry {
    entries: DashMap<u16, Arc<CancellationFlag>>,
}

impl CancellationRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Register a new invocation
    ///
    /// The returned guard removes the entry when dropped. A correlation id
    /// that is still outstanding cannot be registered twice.
    pub fn register(self: &Arc<Self>, id: u16) -> Result<Registration> {
        let flag = Arc::new(CancellationFlag::new());
        match self.entries.entry(id) {
            Entry::Occupied(_) => return Err(RemotingError::DuplicateCorrelationId { id }),
            Entry::Vacant(slot) => {
                slot.insert(flag.clone());
            }
        }
        Ok(Registration {
            registry: self.clone(),
            id,
            flag,
        })
    }

    /// Cancel the invocation registered under `id`, if any
    pub fn cancel(&self, id: u16, may_interrupt: bool) -> Option<CancelOutcome> {
        let flag = self.entries.get(&id).map(|entry| entry.value().clone())?;
        let outcome = flag.cancel(may_interrupt);
        debug!(correlation_id = id, may_interrupt, ?outcome, "Cancel request applied");
        Some(outcome)
    }

    /// Cancel everything outstanding; used when the channel goes away
    pub fn cancel_all(&self) -> usize {
        let flags: Vec<_> = self.entries.iter().map(|e| e.value().clone()).collect();
        for flag in &flags {
            flag.cancel(true);
        }
        flags.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn contains(&self, id: u16) -> bool {
        self.entries.contains_key(&id)
    }
}

/// Registry entry guard of one invocation
#[derive(Debug)]
pub struct Registration {
    registry: Arc<CancellationRegistry>,
    id: u16,
    flag: Arc<CancellationFlag>,
}

impl Registration {
    pub fn id(&self) -> u16 {
        self.id
    }

    pub fn flag(&self) -> &Arc<CancellationFlag> {
        &self.flag
    }
}

impl Drop for Registration {
    fn drop(&mut self) {
        // Only our own entry; the id may already belong to a newer invocation
        self.registry
            .entries
            .remove_if(&self.id, |_, flag| Arc::ptr_eq(flag, &self.flag));
    }
}
