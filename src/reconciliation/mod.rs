//! Membership-leave reconciliation: drop the binding, restore the website group, announce.

pub mod retry;
pub mod worker;

use std::sync::Arc;

use thiserror::Error;
use tracing::{debug, error, info, warn};

use crate::bindings::BindingService;
use crate::config::BotConfig;
use crate::error::AppError;
use crate::gateway::ChatGateway;
use crate::models::{AccountId, Binding, Identity};
use crate::templates::render;
use crate::website::AccountClient;

pub use retry::{BackoffPolicy, RetryExhausted, RetryPolicy};
pub use worker::{start_reconciliation_worker, ReconciliationHandle};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LeaveKind {
    Left,
    Kicked { operator: Option<i64> },
}

/// A member left (or was removed from) a group.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct MembershipEvent {
    pub group_id: i64,
    pub identity: Identity,
    pub kind: LeaveKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RestoreReport {
    pub attempts: u32,
    /// `false` when the account already sat in the restore group.
    pub group_changed: bool,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ReconciliationOutcome {
    /// The group is not monitored.
    Ignored,
    /// The member had no binding.
    NotBound,
    Completed {
        binding: Binding,
        restore: RestoreReport,
        notified: bool,
    },
}

#[derive(Debug, Error)]
pub enum ReconciliationError {
    /// Nothing changed.
    #[error("binding lookup failed: {0}")]
    Lookup(#[source] AppError),
    /// Nothing changed.
    #[error("binding delete failed: {0}")]
    Delete(#[source] AppError),
    /// The binding is gone but the website account still holds its bound group.
    #[error(
        "binding of account {} removed but website group not restored after {attempts} attempt(s): {source}",
        .binding.account_id
    )]
    RestoreFailed {
        binding: Binding,
        attempts: u32,
        #[source]
        source: AppError,
    },
}

impl ReconciliationError {
    pub fn binding_removed(&self) -> bool {
        matches!(self, ReconciliationError::RestoreFailed { .. })
    }
}

/// Resets `account_id` to `group`, retrying transient failures under `policy`.
pub async fn restore_account(
    accounts: &dyn AccountClient,
    account_id: AccountId,
    group: &str,
    policy: &RetryPolicy,
) -> Result<RestoreReport, RetryExhausted> {
    let (group_changed, attempts) = policy
        .run("restore_group", move || accounts.reset_group(account_id, group))
        .await?;
    Ok(RestoreReport {
        attempts,
        group_changed,
    })
}

/// key: reconciliation-workflow -> Received, Lookup, Deleting, Restoring, Notified
pub struct ReconciliationWorkflow {
    config: Arc<BotConfig>,
    bindings: BindingService,
    accounts: Arc<dyn AccountClient>,
    gateway: Arc<dyn ChatGateway>,
}

impl ReconciliationWorkflow {
    pub fn new(
        config: Arc<BotConfig>,
        bindings: BindingService,
        accounts: Arc<dyn AccountClient>,
        gateway: Arc<dyn ChatGateway>,
    ) -> Self {
        Self {
            config,
            bindings,
            accounts,
            gateway,
        }
    }

    pub async fn handle(
        &self,
        event: MembershipEvent,
    ) -> Result<ReconciliationOutcome, ReconciliationError> {
        let MembershipEvent {
            group_id,
            identity,
            kind,
        } = event;

        if !self.config.is_monitored_group(group_id) {
            debug!(%group_id, %identity, "leave event from unmonitored group ignored");
            return Ok(ReconciliationOutcome::Ignored);
        }

        let Some(binding) = self
            .bindings
            .find_by_identity(identity)
            .await
            .map_err(ReconciliationError::Lookup)?
        else {
            info!(%group_id, %identity, "member left without a binding, nothing to reconcile");
            return Ok(ReconciliationOutcome::NotBound);
        };

        let binding = match self.bindings.unbind(binding.account_id).await {
            Ok(binding) => binding,
            // Another handler removed it between lookup and delete.
            Err(AppError::NotFound) => return Ok(ReconciliationOutcome::NotBound),
            Err(err) => return Err(ReconciliationError::Delete(err)),
        };

        let group_leave = &self.config.group_leave;
        let restore = match restore_account(
            self.accounts.as_ref(),
            binding.account_id,
            &group_leave.restore_group,
            &group_leave.retry,
        )
        .await
        {
            Ok(report) => report,
            Err(RetryExhausted {
                attempts,
                last_error,
            }) => {
                error!(
                    err = ?last_error,
                    %identity,
                    account_id = %binding.account_id,
                    attempts,
                    manual_reconciliation_required = true,
                    "binding removed but website group restore failed",
                );
                return Err(ReconciliationError::RestoreFailed {
                    binding,
                    attempts,
                    source: last_error,
                });
            }
        };

        let notified = self.announce(group_id, &binding, kind).await;
        info!(
            %group_id,
            %identity,
            account_id = %binding.account_id,
            restore_attempts = restore.attempts,
            group_changed = restore.group_changed,
            notified,
            "leave reconciliation completed"
        );

        Ok(ReconciliationOutcome::Completed {
            binding,
            restore,
            notified,
        })
    }

    async fn announce(&self, group_id: i64, binding: &Binding, kind: LeaveKind) -> bool {
        let settings = &self.config.group_leave;
        let mut values = vec![
            ("identity", binding.identity.to_string()),
            ("account_id", binding.account_id.to_string()),
            ("group", settings.restore_group.clone()),
        ];
        let template = match kind {
            LeaveKind::Left => &settings.leave_announcement_template,
            LeaveKind::Kicked { operator } => {
                let operator = operator
                    .map(|id| id.to_string())
                    .unwrap_or_else(|| "an administrator".to_string());
                values.push(("operator", operator));
                &settings.kick_announcement_template
            }
        };

        match self
            .gateway
            .send_group_message(group_id, &render(template, &values))
            .await
        {
            Ok(()) => true,
            Err(err) => {
                warn!(?err, %group_id, identity = %binding.identity, "leave announcement failed");
                false
            }
        }
    }
}
