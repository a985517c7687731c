//! Shutdown coordination.

use crate::error::Result;
use crate::types::Event;

use super::Engine;

impl Engine {
    /// Gracefully shut down the engine
    ///
    /// This method performs a graceful shutdown sequence:
    /// 1. Stops both services from accepting new jobs
    /// 2. Cancels the backup workers and waits for them to exit
    /// 3. Cancels active retrievals and waits up to `retrieval.shutdown_timeout`
    ///    for them to settle
    /// 4. Stops the registry sweeper
    /// 5. Emits [`Event::Shutdown`]
    ///
    /// Retrievals still running when the timeout expires are left to finish on
    /// their own; the next start marks any that never settled as failed.
    pub async fn shutdown(&self) -> Result<()> {
        tracing::info!("Initiating graceful shutdown");

        // 1-3. Both services flip their accepting flag before awaiting anything
        let timeout = self.config.retrieval.shutdown_timeout;
        let ((), drained) = tokio::join!(self.backups.stop(), self.retrievals.shutdown(timeout));
        tracing::info!("Backup workers stopped");
        if drained {
            tracing::info!("All retrieval jobs settled");
        }

        // 4. Stop the registry sweeper
        self.sweeper_token.cancel();
        if let Some(handle) = self.sweeper.lock().await.take()
            && let Err(e) = handle.await
        {
            tracing::warn!(error = %e, "Registry sweeper task ended abnormally");
        }

        // 5. Emit shutdown event
        self.event_tx.send(Event::Shutdown).ok();

        tracing::info!("Graceful shutdown complete");
        Ok(())
    }

    /// Whether either service still accepts new jobs
    pub fn is_accepting(&self) -> bool {
        self.backups.is_accepting() || self.retrievals.is_accepting()
    }
}
