//! Discovery of runs to resume after a restart.

use std::sync::Arc;

use tracing::{debug, info};

use crate::error::StoreError;
use crate::run::{Run, RunStatus};
use crate::store::RunStore;

/// Finds runs a previous process left in flight.
pub struct RecoveryManager {
    store: Arc<dyn RunStore>,
}

impl RecoveryManager {
    pub fn new(store: Arc<dyn RunStore>) -> Self {
        Self { store }
    }

    /// RUNNING and WAITING runs, oldest submission first.
    pub async fn list_recoverable(&self) -> Result<Vec<Run>, StoreError> {
        let mut runs = self.store.list_runs_by_status(&RunStatus::IN_FLIGHT).await?;
        runs.sort_by(|a, b| a.submitted_at.cmp(&b.submitted_at));

        for run in &runs {
            debug!(
                run_id = %run.id,
                flight_type = %run.flight_type,
                status = %run.status,
                direction = ?run.direction,
                step_index = run.step_index,
                "Recoverable flight"
            );
        }
        if !runs.is_empty() {
            info!("Found {} recoverable runs", runs.len());
        }
        Ok(runs)
    }
}
