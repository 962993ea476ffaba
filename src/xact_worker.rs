use std::mem;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};

use log::{info, warn};

use crate::transaction::Transaction;

/// Runs a batch of transactions on a single thread. Concurrency comes from
/// running several workers at once; each worker executes its own transactions
/// strictly in order.
pub struct TransactionWorker {
    /// Transactions to be executed.
    transactions: Mutex<Vec<Transaction>>,

    /// Per-transaction outcomes, in submission order.
    stats: Arc<Mutex<Vec<bool>>>,

    /// Number of transactions that committed.
    committed: Arc<AtomicUsize>,

    /// Thread handle for join.
    handle: Mutex<Option<JoinHandle<()>>>,
}

impl TransactionWorker {
    pub fn new() -> Self {
        TransactionWorker {
            transactions: Mutex::new(Vec::new()),
            stats: Arc::new(Mutex::new(Vec::new())),
            committed: Arc::new(AtomicUsize::new(0)),
            handle: Mutex::new(None),
        }
    }

    pub fn add_transaction(&self, transaction: Transaction) {
        self.transactions.lock().unwrap().push(transaction);
    }

    /// Start the worker thread. Calling `run` twice without a `join` in
    /// between is a no-op.
    pub fn run(&self) {
        let mut handle = self.handle.lock().unwrap();
        if handle.is_some() {
            warn!("transaction worker already running");
            return;
        }

        let transactions = mem::take(&mut *self.transactions.lock().unwrap());
        let stats = self.stats.clone();
        let committed = self.committed.clone();

        *handle = Some(thread::spawn(move || {
            for mut transaction in transactions {
                let ok = transaction.run();
                if ok {
                    committed.fetch_add(1, Ordering::SeqCst);
                }
                stats.lock().unwrap().push(ok);
            }
        }));
    }

    /// Wait for the worker thread to finish, returning the number of
    /// committed transactions.
    pub fn join(&self) -> usize {
        let handle = self.handle.lock().unwrap().take();
        if let Some(handle) = handle {
            if handle.join().is_err() {
                warn!("transaction worker thread panicked");
            }
        }

        let committed = self.committed.load(Ordering::SeqCst);
        info!("transaction worker finished with {committed} commits");
        committed
    }

    pub fn committed_count(&self) -> usize {
        self.committed.load(Ordering::SeqCst)
    }

    /// Outcomes of the executed transactions, in submission order.
    pub fn stats(&self) -> Vec<bool> {
        self.stats.lock().unwrap().clone()
    }
}

impl Default for TransactionWorker {
    fn default() -> Self {
        TransactionWorker::new()
    }
}
