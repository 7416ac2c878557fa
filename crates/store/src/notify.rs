//! Change notification port.
//!
//! A thin in-process signal: writers announce which table changed,
//! consumers (projection runtime, publisher) schedule a processing pass.
//! Delivery may be lossy; a dropped signal is recovered by the next one,
//! since consumers always read from their persisted cursor.

use tokio::sync::broadcast;

/// Tables a consumer can watch.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum StoreTable {
    Events,
    Snapshots,
    ProjectionCache,
    IndexArtifacts,
    ProjectionMeta,
}

#[derive(Debug, Clone)]
pub struct ChangeNotifier {
    tx: broadcast::Sender<StoreTable>,
}

impl ChangeNotifier {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(256);
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<StoreTable> {
        self.tx.subscribe()
    }

    /// Announce a table change. No-op when nobody listens.
    pub fn notify(&self, table: StoreTable) {
        let _ = self.tx.send(table);
    }
}

impl Default for ChangeNotifier {
    fn default() -> Self {
        Self::new()
    }
}
