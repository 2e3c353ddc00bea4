//! In-memory ledger for tests.
//!
//! [`MemoryLedger`] implements both [`LedgerReader`] and [`LedgerWriter`].
//! Submitted pay calls become committed user transactions that a
//! [`PaymentVerifier`](crate::verifier::PaymentVerifier) can read back, so a
//! full pay, call and verify round trip runs without a network. Clones share
//! state.
//!
//! Reads can be held with [`MemoryLedger::pause_reads`] to simulate a stalled
//! node or to open a window in the middle of a sync.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde_json::Value;
use tokio::sync::watch;

use crate::ledger::{
    EntryFunctionCall, LedgerError, LedgerReader, LedgerWriter, TransactionKind,
    TransactionRecord, normalize_address,
};
use crate::timestamp::LedgerTimestamp;

#[derive(Debug, Default)]
struct State {
    resources: HashMap<(String, String), Value>,
    transactions: HashMap<String, TransactionRecord>,
    submissions: Vec<EntryFunctionCall>,
    unavailable: bool,
    reject_submissions: bool,
}

#[derive(Debug)]
struct ReadGate {
    paused: watch::Sender<bool>,
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
}

impl Default for ReadGate {
    fn default() -> Self {
        Self {
            paused: watch::channel(false).0,
            in_flight: AtomicUsize::new(0),
            max_in_flight: AtomicUsize::new(0),
        }
    }
}

struct InFlight<'a>(&'a ReadGate);

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.in_flight.fetch_sub(1, Ordering::SeqCst);
    }
}

/// A shared, in-memory ledger.
#[derive(Debug, Clone)]
pub struct MemoryLedger {
    sender: String,
    state: Arc<Mutex<State>>,
    reads: Arc<AtomicU64>,
    gate: Arc<ReadGate>,
}

impl Default for MemoryLedger {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryLedger {
    /// An empty ledger whose writer signs as `0xc0ffee`.
    #[must_use]
    pub fn new() -> Self {
        Self::with_sender("0xc0ffee")
    }

    /// An empty ledger whose writer signs as `sender`.
    #[must_use]
    pub fn with_sender(sender: &str) -> Self {
        Self {
            sender: normalize_address(sender),
            state: Arc::default(),
            reads: Arc::default(),
            gate: Arc::default(),
        }
    }

    fn state(&self) -> MutexGuard<'_, State> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Stores a resource under `address`.
    pub fn insert_resource(&self, address: &str, resource_type: &str, data: Value) {
        self.state()
            .resources
            .insert((normalize_address(address), resource_type.to_owned()), data);
    }

    /// Removes a resource from `address`.
    pub fn remove_resource(&self, address: &str, resource_type: &str) {
        self.state()
            .resources
            .remove(&(normalize_address(address), resource_type.to_owned()));
    }

    /// Stores a transaction under its hash.
    pub fn insert_transaction(&self, record: TransactionRecord) {
        self.state()
            .transactions
            .insert(record.hash.clone(), record);
    }

    /// Simulates an outage: every read and write fails with [`LedgerError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state().unavailable = unavailable;
    }

    /// Makes every submission fail with [`LedgerError::Rejected`].
    pub fn set_reject_submissions(&self, reject: bool) {
        self.state().reject_submissions = reject;
    }

    /// Calls passed to [`LedgerWriter::submit_and_wait`], including rejected ones.
    #[must_use]
    pub fn submissions(&self) -> Vec<EntryFunctionCall> {
        self.state().submissions.clone()
    }

    /// Number of reads served or refused.
    #[must_use]
    pub fn read_count(&self) -> u64 {
        self.reads.load(Ordering::Relaxed)
    }

    /// Holds every read until [`MemoryLedger::resume_reads`].
    pub fn pause_reads(&self) {
        self.gate.paused.send_replace(true);
    }

    /// Releases held reads.
    pub fn resume_reads(&self) {
        self.gate.paused.send_replace(false);
    }

    /// Reads started but not yet answered, held ones included.
    #[must_use]
    pub fn reads_in_flight(&self) -> usize {
        self.gate.in_flight.load(Ordering::SeqCst)
    }

    /// The most reads ever in flight at once.
    #[must_use]
    pub fn max_reads_in_flight(&self) -> usize {
        self.gate.max_in_flight.load(Ordering::SeqCst)
    }

    async fn enter_read(&self) -> InFlight<'_> {
        self.reads.fetch_add(1, Ordering::Relaxed);
        let now = self.gate.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.gate.max_in_flight.fetch_max(now, Ordering::SeqCst);
        let guard = InFlight(&self.gate);
        let mut paused = self.gate.paused.subscribe();
        // The sender lives as long as `self`.
        let _ = paused.wait_for(|paused| !*paused).await;
        guard
    }

    fn check_available(&self) -> Result<(), LedgerError> {
        if self.state().unavailable {
            Err(LedgerError::Unavailable("memory ledger offline".into()))
        } else {
            Ok(())
        }
    }
}

#[async_trait::async_trait]
impl LedgerReader for MemoryLedger {
    async fn get_account_resource(
        &self,
        address: &str,
        resource_type: &str,
    ) -> Result<Value, LedgerError> {
        let _in_flight = self.enter_read().await;
        self.check_available()?;
        self.state()
            .resources
            .get(&(normalize_address(address), resource_type.to_owned()))
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("{resource_type} at {address}")))
    }

    async fn get_transaction(&self, tx_id: &str) -> Result<TransactionRecord, LedgerError> {
        let _in_flight = self.enter_read().await;
        self.check_available()?;
        self.state()
            .transactions
            .get(tx_id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("transaction {tx_id}")))
    }
}

#[async_trait::async_trait]
impl LedgerWriter for MemoryLedger {
    fn sender(&self) -> &str {
        &self.sender
    }

    async fn submit_and_wait(&self, call: EntryFunctionCall) -> Result<String, LedgerError> {
        let mut state = self.state();
        state.submissions.push(call.clone());
        if state.unavailable {
            return Err(LedgerError::Unavailable("memory ledger offline".into()));
        }
        if state.reject_submissions {
            return Err(LedgerError::Rejected("submission rejected".into()));
        }
        let hash = format!("0x{:064x}", state.submissions.len());
        let record = TransactionRecord {
            hash: hash.clone(),
            kind: TransactionKind::User,
            success: true,
            sender: Some(self.sender.clone()),
            function: Some(call.function),
            arguments: call.arguments,
            timestamp: LedgerTimestamp::now(),
        };
        state.transactions.insert(hash.clone(), record);
        drop(state);
        Ok(hash)
    }
}
