//! Engine events and worker control messages.

use tokio::sync::mpsc;

/// Events the engine emits for the UI host to react to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EngineEvent {
  /// A newer deployment is live; show the update banner, do not auto-reload
  UpdateAvailable { local: String, server: String },
  /// A full reset finished and the host should reload the app
  ReloadRequested,
  /// Best-effort connectivity changed
  ConnectivityChanged { online: bool },
}

/// Control messages from the UI to the worker side of the engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerCommand {
  /// Take control immediately instead of waiting for open pages to close
  SkipWaiting,
  /// Delete every cache generation, then drop the registration
  ClearCachesAndDeregister,
}

/// Receiver half of the engine event stream.
pub struct EngineEvents {
  rx: mpsc::UnboundedReceiver<EngineEvent>,
}

impl EngineEvents {
  /// Create the event stream, returning the sender handed to engine components.
  pub fn channel() -> (mpsc::UnboundedSender<EngineEvent>, Self) {
    let (tx, rx) = mpsc::unbounded_channel();
    (tx, Self { rx })
  }

  /// Receive the next event.
  pub async fn next(&mut self) -> Option<EngineEvent> {
    self.rx.recv().await
  }

  /// Non-blocking poll, for hosts that pump events on a tick.
  #[allow(dead_code)]
  pub fn try_next(&mut self) -> Option<EngineEvent> {
    self.rx.try_recv().ok()
  }
}
