use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Weak};
use std::thread::{self, JoinHandle};

use log::{debug, warn};

use crate::table::Table;

/// Messages understood by a table's merge worker.
enum MergeMessage {
    /// Consolidate this page range.
    Range(usize),

    /// Exit the worker loop.
    Shutdown,
}

/// Handle to a table's background merge worker: a request channel plus the
/// join handle for a clean shutdown.
pub(crate) struct MergeHandle {
    sender: Sender<MergeMessage>,
    thread: JoinHandle<()>,
}

impl MergeHandle {
    /// Ask the worker to consolidate a page range. Requests after shutdown
    /// are silently dropped.
    pub fn request(&self, range: usize) {
        let _ = self.sender.send(MergeMessage::Range(range));
    }

    /// Stop the worker and wait for it to exit.
    pub fn shutdown(self) {
        let _ = self.sender.send(MergeMessage::Shutdown);
        if self.thread.join().is_err() {
            warn!("merge worker panicked during shutdown");
        }
    }
}

/// Spawn the merge worker for a table. The worker holds only a weak
/// reference, so dropping the table (or its handle's sender) ends the loop.
pub(crate) fn spawn(table: &Arc<Table>) -> MergeHandle {
    let weak: Weak<Table> = Arc::downgrade(table);
    let name = table.name.clone();
    let (sender, receiver) = mpsc::channel::<MergeMessage>();

    let thread = thread::spawn(move || {
        while let Ok(message) = receiver.recv() {
            match message {
                MergeMessage::Range(range) => {
                    let Some(table) = weak.upgrade() else {
                        break;
                    };

                    debug!("merge worker for table {name}: consolidating range {range}");
                    if let Err(error) = table.merge_range(range) {
                        warn!("merge of range {range} on table {name} failed: {error}");
                    }
                }

                MergeMessage::Shutdown => break,
            }
        }
    });

    MergeHandle { sender, thread }
}
