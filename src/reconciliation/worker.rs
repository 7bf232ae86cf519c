use std::sync::Arc;

use anyhow::{anyhow, Result};
use tokio::sync::mpsc::{channel, Sender};
use tracing::{error, info, warn};

use super::{MembershipEvent, ReconciliationError, ReconciliationOutcome, ReconciliationWorkflow};

/// key: reconciliation-handle -> enqueue interface
#[derive(Clone)]
pub struct ReconciliationHandle {
    sender: Sender<MembershipEvent>,
}

impl ReconciliationHandle {
    pub async fn dispatch(&self, event: MembershipEvent) -> Result<()> {
        self.sender
            .send(event)
            .await
            .map_err(|err| anyhow!("failed to enqueue leave reconciliation: {err}"))
    }
}

/// Each event runs in its own task so a slow or failing restore never holds up the next one.
pub fn start_reconciliation_worker(workflow: Arc<ReconciliationWorkflow>) -> ReconciliationHandle {
    let (tx, mut rx) = channel(64);
    tokio::spawn(async move {
        while let Some(event) = rx.recv().await {
            let workflow = workflow.clone();
            tokio::spawn(async move {
                let MembershipEvent {
                    group_id, identity, ..
                } = event;
                match workflow.handle(event).await {
                    Ok(ReconciliationOutcome::Completed { binding, .. }) => info!(
                        %group_id,
                        %identity,
                        account_id = %binding.account_id,
                        "leave event reconciled"
                    ),
                    Ok(_) => {}
                    Err(err @ ReconciliationError::RestoreFailed { .. }) => error!(
                        ?err,
                        %group_id,
                        %identity,
                        manual_reconciliation_required = true,
                        "leave event left website account unrestored"
                    ),
                    Err(err) => warn!(
                        ?err,
                        %group_id,
                        %identity,
                        "leave event failed before any change, binding untouched"
                    ),
                }
            });
        }
    });

    ReconciliationHandle { sender: tx }
}
