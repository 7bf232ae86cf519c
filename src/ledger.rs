use std::sync::Arc;

use chrono::Utc;
use tracing::{error, info, warn};

use crate::error::AppResult;
use crate::models::{AccountId, HeistLogEntry, HeistOutcome, Identity, NewHeistLogEntry};
use crate::store::HeistLogStore;
use crate::website::AccountClient;

/// key: quota-ledger -> remote balance mutations + heist log
///
/// Balances live on the website; nothing is cached here. The only local state is the
/// append-only heist log.
#[derive(Clone)]
pub struct QuotaLedger {
    accounts: Arc<dyn AccountClient>,
    log: Arc<dyn HeistLogStore>,
}

impl QuotaLedger {
    pub fn new(accounts: Arc<dyn AccountClient>, log: Arc<dyn HeistLogStore>) -> Self {
        Self { accounts, log }
    }

    pub fn accounts(&self) -> &Arc<dyn AccountClient> {
        &self.accounts
    }

    pub async fn balance(&self, account_id: AccountId) -> AppResult<i64> {
        self.accounts.get_balance(account_id).await
    }

    pub async fn adjust(&self, account_id: AccountId, delta: i64) -> AppResult<i64> {
        let change = self.accounts.adjust_balance(account_id, delta).await?;
        info!(%account_id, delta, applied = change.applied, balance = change.balance, "quota adjusted");
        Ok(change.balance)
    }

    /// Moves up to `amount` raw units from `from` to `to` and returns what actually moved.
    /// Only the debited amount is credited, so a debit clamped at zero never mints quota.
    /// The debit is undone when the credit fails.
    pub async fn transfer(&self, from: AccountId, to: AccountId, amount: i64) -> AppResult<i64> {
        if amount <= 0 {
            return Ok(0);
        }
        let debit = self.accounts.adjust_balance(from, -amount).await?;
        let moved = -debit.applied;
        if moved <= 0 {
            info!(%from, %to, amount, "nothing to transfer, source balance empty");
            return Ok(0);
        }
        if moved < amount {
            warn!(%from, %to, requested = amount, moved, "source balance short, transferring remainder");
        }
        if let Err(err) = self.accounts.adjust_balance(to, moved).await {
            warn!(?err, %from, %to, moved, "credit failed, rolling back debit");
            if let Err(rollback_err) = self.accounts.adjust_balance(from, moved).await {
                error!(
                    ?rollback_err,
                    %from,
                    amount = moved,
                    manual_reconciliation_required = true,
                    "rollback of debit failed, quota lost in transit",
                );
            }
            return Err(err);
        }
        info!(%from, %to, amount = moved, "quota transferred");
        Ok(moved)
    }

    pub async fn record_heist(
        &self,
        actor: Identity,
        target: AccountId,
        outcome: HeistOutcome,
        amount: i64,
    ) -> AppResult<HeistLogEntry> {
        self.log
            .append_heist(NewHeistLogEntry {
                actor_identity: actor,
                target_account_id: target,
                occurred_at: Utc::now(),
                outcome,
                amount,
            })
            .await
    }

    pub fn heist_log(&self) -> &Arc<dyn HeistLogStore> {
        &self.log
    }
}
