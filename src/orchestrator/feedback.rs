//! Two-channel completion protocol between a purchase and its helper task.
//!
//! `finished` is a one-shot signal and errors sit in a single-slot buffer.
//! The producer fills the slot before signalling, so a consumer that waits
//! for `finished` first always sees the error.

use crate::error::PurchaseError;
use tokio::sync::{mpsc, oneshot};

pub fn completion() -> (FeedbackSender, CompletionFeedback) {
    let (errors_tx, errors_rx) = mpsc::channel(1);
    let (finished_tx, finished_rx) = oneshot::channel();
    (
        FeedbackSender {
            errors: errors_tx,
            finished: Some(finished_tx),
        },
        CompletionFeedback {
            finished: finished_rx,
            errors: errors_rx,
        },
    )
}

/// Producer side, owned by the helper task.
pub struct FeedbackSender {
    errors: mpsc::Sender<PurchaseError>,
    finished: Option<oneshot::Sender<()>>,
}

impl FeedbackSender {
    pub fn finish(mut self) {
        self.close(None);
    }

    pub fn fail(mut self, error: PurchaseError) {
        self.close(Some(error));
    }

    fn close(&mut self, error: Option<PurchaseError>) {
        let Some(finished) = self.finished.take() else {
            return;
        };
        if let Some(error) = error {
            let _ = self.errors.try_send(error);
        }
        let _ = finished.send(());
    }
}

impl Drop for FeedbackSender {
    fn drop(&mut self) {
        // Only reached without a verdict if the task was torn down.
        self.close(Some(PurchaseError::HelperReported(
            "purchase helper task ended without reporting".into(),
        )));
    }
}

/// Consumer side, owned by the purchase call.
pub struct CompletionFeedback {
    finished: oneshot::Receiver<()>,
    errors: mpsc::Receiver<PurchaseError>,
}

impl CompletionFeedback {
    /// Wait for `finished`, then report whatever is in the error slot.
    pub async fn outcome(mut self) -> Result<(), PurchaseError> {
        let _ = (&mut self.finished).await;
        match self.errors.try_recv() {
            Ok(error) => Err(error),
            Err(_) => Ok(()),
        }
    }
}
