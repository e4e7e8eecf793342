//! Scanner service
//!
//! Owns one scanner and one notifier and runs them as two tasks joined by
//! the single-slot distribution channel. Whichever task ends first trips the
//! shared shutdown signal so the other follows.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinError;
use tracing::{info, warn};

use crate::emitter;
use crate::notifier::{run_notifier, DeliverySummary, Notifier};
use crate::rpc::LedgerClient;
use crate::scanner::{BlockScanner, ScanError};
use crate::status::StatusHandle;
use crate::types::BlockHeight;

#[derive(Error, Debug)]
pub enum ServiceError {
    #[error("Scanner failed: {0}")]
    Scan(#[from] ScanError),

    #[error("Service task aborted: {0}")]
    Task(#[from] JoinError),
}

/// Cloneable trigger for stopping a running service
#[derive(Debug, Clone)]
pub struct ShutdownHandle {
    tx: Arc<watch::Sender<bool>>,
}

impl ShutdownHandle {
    pub fn trigger(&self) {
        self.tx.send_replace(true);
    }

    pub fn is_triggered(&self) -> bool {
        *self.tx.borrow()
    }
}

/// Final counters once both tasks have stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServiceReport {
    pub last_processed_block: Option<BlockHeight>,
    pub deliveries: DeliverySummary,
}

pub struct ScannerService<C> {
    scanner: BlockScanner<C>,
    notifier: Box<dyn Notifier>,
    shutdown: ShutdownHandle,
}

impl<C: LedgerClient + 'static> ScannerService<C> {
    pub fn new(scanner: BlockScanner<C>, notifier: Box<dyn Notifier>) -> Self {
        let (tx, _) = watch::channel(false);
        Self {
            scanner,
            notifier,
            shutdown: ShutdownHandle { tx: Arc::new(tx) },
        }
    }

    pub fn status(&self) -> StatusHandle<C> {
        self.scanner.status_handle()
    }

    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.shutdown.clone()
    }

    /// Run until shutdown is triggered or either task stops on its own
    pub async fn run(self) -> Result<ServiceReport, ServiceError> {
        let Self {
            scanner,
            notifier,
            shutdown,
        } = self;

        let status = scanner.status_handle();
        let (emitter, stream) = emitter::channel();

        let scanner_task = tokio::spawn({
            let signal = shutdown.tx.subscribe();
            let shutdown = shutdown.clone();
            async move {
                let result = scanner.run(emitter, signal).await;
                shutdown.trigger();
                result
            }
        });

        let notifier_task = tokio::spawn({
            let signal = shutdown.tx.subscribe();
            let shutdown = shutdown.clone();
            async move {
                let summary = run_notifier(stream, notifier.as_ref(), signal).await;
                shutdown.trigger();
                summary
            }
        });

        let (scanned, deliveries) = tokio::join!(scanner_task, notifier_task);
        let deliveries = deliveries?;

        match scanned? {
            Ok(()) => {}
            // The notifier only closes its end once shutdown was requested.
            Err(ScanError::EmitterClosed(_)) => {}
            Err(e) => {
                warn!(error = %e, "Scanner stopped with error");
                return Err(e.into());
            }
        }

        let report = ServiceReport {
            last_processed_block: status.last_processed_block(),
            deliveries,
        };
        info!(
            last_processed_block = ?report.last_processed_block,
            delivered = deliveries.delivered,
            failed = deliveries.failed,
            "Service stopped"
        );
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    // ==================== ShutdownHandle tests ====================

    #[test]
    fn test_shutdown_handle_clones_share_state() {
        let (tx, mut rx) = watch::channel(false);
        let handle = ShutdownHandle { tx: Arc::new(tx) };
        let clone = handle.clone();
        assert!(!handle.is_triggered());

        clone.trigger();
        assert!(handle.is_triggered());
        assert!(*rx.borrow_and_update());

        // Triggering twice is harmless
        handle.trigger();
        assert!(clone.is_triggered());
    }
}
