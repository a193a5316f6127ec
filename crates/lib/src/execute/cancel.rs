//! Run cancellation signal.

use std::sync::Arc;

use tokio::sync::watch;

/// Cooperative cancellation shared by everything in one run.
///
/// Cancelling stops new tasks from starting; tasks already inside a backend
/// call are left to finish it, and readiness waits stop instead of sleeping
/// again.
#[derive(Debug, Clone)]
pub struct CancelToken {
  tx: Arc<watch::Sender<bool>>,
}

impl Default for CancelToken {
  fn default() -> Self {
    Self::new()
  }
}

impl CancelToken {
  pub fn new() -> Self {
    let (tx, _rx) = watch::channel(false);
    Self { tx: Arc::new(tx) }
  }

  pub fn cancel(&self) {
    self.tx.send_replace(true);
  }

  pub fn is_cancelled(&self) -> bool {
    *self.tx.borrow()
  }

  /// Resolves once the token is cancelled.
  pub async fn cancelled(&self) {
    let mut rx = self.tx.subscribe();
    // The sender lives as long as `self`, so this only errors on drop.
    let _ = rx.wait_for(|cancelled| *cancelled).await;
  }
}
