use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Instant;

use chrono::Utc;

use crate::types::{TransferDescriptor, TransferId, TransferStatus};

/// Concurrent registry of transfers seen by one node.
///
/// Each transfer sits behind its own lock, so updates to one never wait on
/// another; the outer map lock is only held to look up or insert entries.
/// Descriptors stay in the registry after they reach a terminal state until
/// [`remove`](Self::remove) is called.
#[derive(Debug, Default)]
pub struct ProgressStore {
    entries: RwLock<HashMap<TransferId, Arc<Mutex<TransferDescriptor>>>>,
}

impl ProgressStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a new in-progress transfer, replacing any entry with the
    /// same id.
    pub fn start(
        &self,
        id: &TransferId,
        source: impl Into<String>,
        destination: impl Into<String>,
        total_size: u64,
    ) -> TransferDescriptor {
        let now = Utc::now();
        let descriptor = TransferDescriptor {
            id: id.clone(),
            source: source.into(),
            destination: destination.into(),
            total_size,
            bytes_transferred: 0,
            created_at: now,
            updated_at: now,
            status: TransferStatus::InProgress,
            error: None,
            started: Instant::now(),
        };
        self.entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(id.clone(), Arc::new(Mutex::new(descriptor.clone())));
        descriptor
    }

    /// Records bytes transferred so far.
    ///
    /// Progress never moves backwards and never exceeds the declared size.
    /// Updates to unknown or finished transfers are ignored.
    pub fn update(&self, id: &TransferId, bytes_transferred: u64) {
        self.with_entry(id, |d| {
            if d.status.is_terminal() {
                return;
            }
            let clamped = bytes_transferred.min(d.total_size);
            if clamped > d.bytes_transferred {
                d.bytes_transferred = clamped;
            }
            d.updated_at = Utc::now();
        });
    }

    /// Marks a transfer completed. No effect once it is terminal.
    pub fn complete(&self, id: &TransferId) {
        self.with_entry(id, |d| {
            if d.status.is_terminal() {
                return;
            }
            d.status = TransferStatus::Completed;
            d.updated_at = Utc::now();
        });
    }

    /// Marks a transfer failed with `message`. No effect once it is terminal.
    pub fn fail(&self, id: &TransferId, message: impl Into<String>) {
        let message = message.into();
        self.with_entry(id, |d| {
            if d.status.is_terminal() {
                return;
            }
            d.status = TransferStatus::Error;
            d.error = Some(message);
            d.updated_at = Utc::now();
        });
    }

    /// Snapshot of one transfer.
    pub fn get(&self, id: &TransferId) -> Option<TransferDescriptor> {
        let entry = self.entry(id)?;
        let guard = entry.lock().unwrap_or_else(PoisonError::into_inner);
        Some(guard.clone())
    }

    /// Snapshots of every registered transfer, oldest first.
    pub fn list(&self) -> Vec<TransferDescriptor> {
        let entries: Vec<_> = self
            .entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .cloned()
            .collect();
        let mut out: Vec<TransferDescriptor> = entries
            .iter()
            .map(|e| e.lock().unwrap_or_else(PoisonError::into_inner).clone())
            .collect();
        out.sort_by_key(|d| d.created_at);
        out
    }

    pub fn remove(&self, id: &TransferId) -> Option<TransferDescriptor> {
        let entry = self
            .entries
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id)?;
        let guard = entry.lock().unwrap_or_else(PoisonError::into_inner);
        Some(guard.clone())
    }

    pub fn len(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn entry(&self, id: &TransferId) -> Option<Arc<Mutex<TransferDescriptor>>> {
        self.entries
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(id)
            .cloned()
    }

    fn with_entry(&self, id: &TransferId, f: impl FnOnce(&mut TransferDescriptor)) {
        match self.entry(id) {
            Some(entry) => f(&mut entry.lock().unwrap_or_else(PoisonError::into_inner)),
            None => tracing::debug!(transfer_id = %id, "progress update for unknown transfer"),
        }
    }
}
