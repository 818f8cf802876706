// src/engine/cancellation.rs

//! Where a "the user wants to stop" signal comes from.
//!
//! Each run owns its source; nothing is installed globally. A source that
//! can no longer fire (signal listener failed, sender dropped) simply never
//! resolves.

use std::fmt;
use std::future::Future;
use std::pin::Pin;

use tokio::sync::oneshot;
use tracing::{debug, warn};

pub struct CancellationSource {
    fut: Pin<Box<dyn Future<Output = ()> + Send>>,
}

impl fmt::Debug for CancellationSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CancellationSource").finish_non_exhaustive()
    }
}

impl CancellationSource {
    /// Fires on Ctrl-C.
    pub fn ctrl_c() -> Self {
        Self::from_future(async {
            match tokio::signal::ctrl_c().await {
                Ok(()) => debug!("received Ctrl+C"),
                Err(e) => {
                    warn!(error = %e, "failed to listen for Ctrl+C; interruption disabled");
                    std::future::pending::<()>().await;
                }
            }
        })
    }

    /// Fires when `rx` receives a value. Dropping the sender disarms it.
    pub fn from_receiver(rx: oneshot::Receiver<()>) -> Self {
        Self::from_future(async move {
            if rx.await.is_err() {
                std::future::pending::<()>().await;
            }
        })
    }

    pub fn never() -> Self {
        Self::from_future(std::future::pending())
    }

    pub fn from_future<F>(fut: F) -> Self
    where
        F: Future<Output = ()> + Send + 'static,
    {
        Self { fut: Box::pin(fut) }
    }

    /// Resolves once the interruption has been requested.
    pub(crate) async fn cancelled(&mut self) {
        self.fut.as_mut().await
    }
}
