//! Distribution Emitter
//!
//! Single-slot handoff between the scanner task and the notifier task.
//! `emit` does not return until the consumer has taken the record, so the
//! scanner never runs more than one record ahead of the notifier.

use thiserror::Error;
use tokio::sync::mpsc;

use crate::types::DistributionRecord;

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Distribution consumer has gone away")]
pub struct EmitterClosed;

/// Create a connected emitter / stream pair
pub fn channel() -> (Emitter, DistributionStream) {
    let (tx, rx) = mpsc::channel(1);
    (Emitter { tx }, DistributionStream { rx })
}

/// Producer half, owned by the scanner
#[derive(Debug)]
pub struct Emitter {
    tx: mpsc::Sender<DistributionRecord>,
}

impl Emitter {
    /// Hand a record to the consumer and wait until it has been accepted
    ///
    /// # Returns
    /// `Err(EmitterClosed)` if the consumer dropped its stream; the record is
    /// lost in that case and the scanner should stop.
    pub async fn emit(&self, record: DistributionRecord) -> Result<(), EmitterClosed> {
        self.tx.send(record).await.map_err(|_| EmitterClosed)?;
        // The slot frees only once the receiver has taken the record.
        let permit = self.tx.reserve().await.map_err(|_| EmitterClosed)?;
        drop(permit);
        Ok(())
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }

    /// Resolves once the consumer is gone
    pub async fn closed(&self) {
        self.tx.closed().await
    }
}

/// Consumer half, owned by the notifier
#[derive(Debug)]
pub struct DistributionStream {
    rx: mpsc::Receiver<DistributionRecord>,
}

impl DistributionStream {
    /// Next record in discovery order, `None` once the scanner has stopped
    pub async fn next(&mut self) -> Option<DistributionRecord> {
        self.rx.recv().await
    }

    /// Stop accepting records; a pending `emit` fails with `EmitterClosed`
    pub fn close(&mut self) {
        self.rx.close()
    }
}
