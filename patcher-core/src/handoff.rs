//! One-shot publication of a slot's rom name from its worker to the
//! finalization stage.

use std::sync::mpsc::{self, Receiver, SyncSender};
use thiserror::Error;

use crate::header::RomName;

#[derive(Debug, Clone, Eq, PartialEq, Error)]
pub enum HandoffError {
    #[error("slot failed before its rom name was available: {0}")]
    Failed(String),
    #[error("slot worker exited without publishing a rom name")]
    Abandoned,
}

type Message = std::result::Result<RomName, String>;

pub fn channel() -> (RomNameSender, RomNameReceiver) {
    let (tx, rx) = mpsc::sync_channel(1);
    (RomNameSender { tx }, RomNameReceiver { rx })
}

/// Consumed by `publish` or `fail`, so a name can be set at most once.
/// Dropping it unused reads as `Abandoned` on the other side.
#[derive(Debug)]
pub struct RomNameSender {
    tx: SyncSender<Message>,
}

impl RomNameSender {
    pub fn publish(self, name: RomName) {
        // The receiver may already be gone; nothing left to tell then.
        let _ = self.tx.send(Ok(name));
    }

    pub fn fail(self, reason: impl Into<String>) {
        let _ = self.tx.send(Err(reason.into()));
    }
}

#[derive(Debug)]
pub struct RomNameReceiver {
    rx: Receiver<Message>,
}

impl RomNameReceiver {
    /// Blocks until the worker publishes, fails, or goes away.
    pub fn wait(self) -> std::result::Result<RomName, HandoffError> {
        match self.rx.recv() {
            Ok(Ok(name)) => Ok(name),
            Ok(Err(reason)) => Err(HandoffError::Failed(reason)),
            Err(_) => Err(HandoffError::Abandoned),
        }
    }
}
