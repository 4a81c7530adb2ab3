//! Commit and rollback notifications.
//!
//! The chain queues events on a channel drained by a dedicated thread, so a
//! slow or panicking listener never holds up a commit. Events are delivered
//! in the order they were queued, after the chain lock has been released.

use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use crossbeam_channel::{unbounded, Sender};
use spvd_primitives::block::BlockHeader;
use spvd_primitives::hash::hash256_to_hex;
use spvd_primitives::transaction::Transaction;

use crate::records::Proof;

/// Receives chain notifications on the notifier thread.
pub trait ChainListener: Send + Sync + 'static {
    fn on_tx_committed(&self, _tx: &Transaction) {}
    fn on_block_committed(&self, _header: &BlockHeader, _proof: &Proof, _txns: &[Transaction]) {}
    fn on_rollback(&self, _height: u32) {}
}

pub struct NoopListener;

impl ChainListener for NoopListener {}

#[derive(Clone, Debug)]
pub enum ChainEvent {
    TxCommitted(Transaction),
    BlockCommitted {
        header: BlockHeader,
        proof: Proof,
        txns: Vec<Transaction>,
    },
    RolledBack(u32),
}

impl ChainEvent {
    fn describe(&self) -> String {
        match self {
            ChainEvent::TxCommitted(tx) => format!("tx {}", hash256_to_hex(&tx.txid())),
            ChainEvent::BlockCommitted { header, .. } => {
                format!("block {} at height {}", hash256_to_hex(&header.hash()), header.height)
            }
            ChainEvent::RolledBack(height) => format!("rollback of height {height}"),
        }
    }
}

pub struct Notifier {
    sender: Option<Sender<ChainEvent>>,
    handle: Option<JoinHandle<()>>,
}

impl Notifier {
    pub fn spawn(listener: Arc<dyn ChainListener>) -> std::io::Result<Self> {
        let (sender, receiver) = unbounded::<ChainEvent>();
        let handle = thread::Builder::new()
            .name("chain-notify".to_string())
            .spawn(move || {
                for event in receiver.iter() {
                    let outcome =
                        panic::catch_unwind(AssertUnwindSafe(|| dispatch(&*listener, &event)));
                    if outcome.is_err() {
                        spvd_log::log_error!(
                            "chain listener panicked handling {}",
                            event.describe()
                        );
                    }
                }
            })?;
        Ok(Self {
            sender: Some(sender),
            handle: Some(handle),
        })
    }

    /// Queues an event; never blocks.
    pub fn notify(&self, event: ChainEvent) {
        if let Some(sender) = &self.sender {
            if sender.send(event).is_err() {
                spvd_log::log_warn!("chain notifier stopped; dropping event");
            }
        }
    }
}

impl Drop for Notifier {
    fn drop(&mut self) {
        // Closing the channel lets the thread drain what is queued and exit.
        self.sender.take();
        if let Some(handle) = self.handle.take() {
            if handle.thread().id() != thread::current().id() {
                let _ = handle.join();
            }
        }
    }
}

fn dispatch(listener: &dyn ChainListener, event: &ChainEvent) {
    match event {
        ChainEvent::TxCommitted(tx) => listener.on_tx_committed(tx),
        ChainEvent::BlockCommitted {
            header,
            proof,
            txns,
        } => listener.on_block_committed(header, proof, txns),
        ChainEvent::RolledBack(height) => listener.on_rollback(*height),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crossbeam_channel::Receiver;
    use std::time::Duration;

    struct Recorder {
        heights: Sender<u32>,
    }

    impl ChainListener for Recorder {
        fn on_rollback(&self, height: u32) {
            if height == 13 {
                panic!("listener failure");
            }
            let _ = self.heights.send(height);
        }
    }

    fn recorder() -> (Arc<dyn ChainListener>, Receiver<u32>) {
        let (heights, rx) = unbounded();
        (Arc::new(Recorder { heights }), rx)
    }

    #[test]
    fn panicking_listener_does_not_stop_delivery() {
        let (listener, rx) = recorder();
        let notifier = Notifier::spawn(listener).expect("spawn");
        notifier.notify(ChainEvent::RolledBack(12));
        notifier.notify(ChainEvent::RolledBack(13));
        notifier.notify(ChainEvent::RolledBack(14));

        let timeout = Duration::from_secs(5);
        assert_eq!(rx.recv_timeout(timeout), Ok(12));
        assert_eq!(rx.recv_timeout(timeout), Ok(14));
    }

    #[test]
    fn drop_drains_queued_events() {
        let (listener, rx) = recorder();
        let notifier = Notifier::spawn(listener).expect("spawn");
        for height in 1..=5 {
            notifier.notify(ChainEvent::RolledBack(height));
        }
        drop(notifier);
        let delivered: Vec<u32> = rx.try_iter().collect();
        assert_eq!(delivered, vec![1, 2, 3, 4, 5]);
    }
}
