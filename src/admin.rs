use std::sync::Arc;

use tracing::{error, info};

use crate::bindings::{BindingService, LookupKey, ResolvedBinding};
use crate::config::BotConfig;
use crate::error::AppResult;
use crate::ledger::QuotaLedger;
use crate::models::{AccountId, Binding};
use crate::reconciliation::{restore_account, RestoreReport, RetryExhausted};

#[derive(Clone, Debug, PartialEq)]
pub struct Adjustment {
    pub account_id: AccountId,
    pub delta: i64,
    pub balance: i64,
}

/// Result of an admin unbind. The binding is always gone; the restore may not have landed.
#[derive(Debug)]
pub struct UnbindReport {
    pub binding: Binding,
    pub restore: Result<RestoreReport, RetryExhausted>,
}

/// key: admin-handlers -> smart query, unbind, balance adjustment
#[derive(Clone)]
pub struct AdminService {
    config: Arc<BotConfig>,
    bindings: BindingService,
    ledger: QuotaLedger,
}

impl AdminService {
    pub fn new(config: Arc<BotConfig>, bindings: BindingService, ledger: QuotaLedger) -> Self {
        Self {
            config,
            bindings,
            ledger,
        }
    }

    pub async fn query(&self, key: i64) -> AppResult<ResolvedBinding> {
        self.bindings.lookup(LookupKey::Either(key)).await
    }

    /// Resolves `key` as an account id or identity and applies `delta` raw quota units.
    pub async fn adjust_balance(&self, key: i64, delta: i64) -> AppResult<Adjustment> {
        let resolved = self.bindings.lookup(LookupKey::Either(key)).await?;
        let account_id = resolved.binding.account_id;
        let balance = self.ledger.adjust(account_id, delta).await?;
        info!(%account_id, key, delta, balance, "admin balance adjustment applied");
        Ok(Adjustment {
            account_id,
            delta,
            balance,
        })
    }

    /// Deletes the binding for `account_id`, then restores the website group the same way
    /// leave reconciliation does.
    pub async fn unbind(&self, account_id: AccountId) -> AppResult<UnbindReport> {
        let binding = self.bindings.unbind(account_id).await?;
        let group_leave = &self.config.group_leave;
        let restore = restore_account(
            self.ledger.accounts().as_ref(),
            account_id,
            &group_leave.restore_group,
            &group_leave.retry,
        )
        .await;
        if let Err(exhausted) = &restore {
            error!(
                err = ?exhausted.last_error,
                %account_id,
                attempts = exhausted.attempts,
                manual_reconciliation_required = true,
                "admin unbind removed binding but website group restore failed",
            );
        }
        Ok(UnbindReport { binding, restore })
    }
}
