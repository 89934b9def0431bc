//! Session lifecycle handle
//!
//! Owns the event worker spawned by [`SessionBuilder::start`]. Keep it alive
//! for the duration of the session and call [`SessionConnection::shutdown`]
//! when done.
//!
//! [`SessionBuilder::start`]: super::SessionBuilder::start

use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{error, warn};

use super::controller::SessionController;
use super::error::SessionError;
use crate::transport::Transport;

/// Handle for graceful session shutdown
pub struct SessionConnection<T: Transport> {
	controller: SessionController<T>,
	shutdown_tx: Option<oneshot::Sender<()>>,
	worker_handle: Option<JoinHandle<()>>,
}

impl<T: Transport> SessionConnection<T> {
	pub(crate) fn new(
		controller: SessionController<T>,
		shutdown_tx: oneshot::Sender<()>,
		worker_handle: JoinHandle<()>,
	) -> Self {
		Self {
			controller,
			shutdown_tx: Some(shutdown_tx),
			worker_handle: Some(worker_handle),
		}
	}

	/// Gracefully shuts the session down by:
	/// 1. Disconnecting from the broker (offline status first, if configured)
	/// 2. Stopping the event worker
	/// 3. Waiting for the worker to finish the event it is processing
	pub async fn shutdown(mut self) -> Result<(), SessionError> {
		let result = self.controller.disconnect().await;
		if let Err(e) = &result {
			warn!(error = %e, "Failed to disconnect from broker");
		}

		if let Some(shutdown_tx) = self.shutdown_tx.take() {
			// Worker may already have exited on a closed event stream
			let _ = shutdown_tx.send(());
		}

		if let Some(handle) = self.worker_handle.take() {
			if let Err(e) = handle.await {
				warn!(error = %e, "Session worker task failed");
			}
		}

		result
	}
}

impl<T: Transport> Drop for SessionConnection<T> {
	fn drop(&mut self) {
		if self.worker_handle.is_some() {
			error!(
				"SessionConnection dropped without calling shutdown(). Please \
				 call shutdown() and await its completion before dropping."
			);
		}
	}
}
