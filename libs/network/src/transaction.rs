//! Transaction recovery collaborator
//!
//! A recovering coordinator asks each participant node for its in-doubt
//! transaction branches. Scans follow the XA convention: a scan opens with
//! `TMSTARTRSCAN`, which returns every in-doubt branch, and later calls in
//! the same scan return nothing more.

use crate::deployment::InvocationError;
use crate::model::Xid;
use codec::recovery_flags::{TMENDRSCAN, TMNOFLAGS, TMSTARTRSCAN};
use parking_lot::RwLock;
use std::collections::HashMap;
use tracing::debug;

/// Source of in-doubt transaction branches
pub trait TransactionRecoveryService: Send + Sync {
    /// List in-doubt branches owned by `parent_node`; may block
    fn recover(&self, parent_node: &str, flags: i32) -> Result<Vec<Xid>, InvocationError>;
}

/// In-memory log of prepared branches keyed by parent node
#[derive(Debug, Default)]
pub struct InMemoryTransactionLog {
    prepared: RwLock<HashMap<String, Vec<Xid>>>,
}

impl InMemoryTransactionLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a prepared branch
    pub fn prepare(&self, parent_node: impl Into<String>, xid: Xid) {
        let mut prepared = self.prepared.write();
        let branches = prepared.entry(parent_node.into()).or_default();
        if !branches.contains(&xid) {
            branches.push(xid);
        }
    }

    /// Drop a branch once it has been committed or rolled back
    pub fn complete(&self, xid: &Xid) -> bool {
        let mut prepared = self.prepared.write();
        let mut removed = false;
        for branches in prepared.values_mut() {
            let before = branches.len();
            branches.retain(|x| x != xid);
            removed |= branches.len() != before;
        }
        prepared.retain(|_, branches| !branches.is_empty());
        removed
    }

    pub fn in_doubt(&self) -> usize {
        self.prepared.read().values().map(Vec::len).sum()
    }
}

impl TransactionRecoveryService for InMemoryTransactionLog {
    fn recover(&self, parent_node: &str, flags: i32) -> Result<Vec<Xid>, InvocationError> {
        if flags & !(TMSTARTRSCAN | TMENDRSCAN) != TMNOFLAGS {
            return Err(InvocationError::application(
                "javax.transaction.xa.XAException",
                format!("XAER_INVAL: unsupported recovery flags {:#010x}", flags),
            ));
        }

        if flags & TMSTARTRSCAN == 0 {
            return Ok(Vec::new());
        }

        let branches = self
            .prepared
            .read()
            .get(parent_node)
            .cloned()
            .unwrap_or_default();
        debug!(parent_node, flags, branches = branches.len(), "Recovery scan");
        Ok(branches)
    }
}
