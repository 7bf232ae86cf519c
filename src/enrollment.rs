use std::sync::Arc;

use tracing::{error, info, warn};

use crate::bindings::BindingService;
use crate::config::BotConfig;
use crate::error::{AppError, AppResult};
use crate::gateway::ChatGateway;
use crate::models::{AccountId, Binding, Identity};
use crate::templates::render;
use crate::website::AccountClient;

#[derive(Clone, Debug, PartialEq)]
pub enum EnrollResult {
    SenderAlreadyBound { account_id: AccountId },
    AccountMissing,
    AccountTaken,
    Enrolled { binding: Binding, group: String },
    /// The website promotion failed and the binding was removed again.
    RolledBack,
}

/// key: enrollment -> `/bind` flow with promotion and rollback
#[derive(Clone)]
pub struct EnrollmentService {
    config: Arc<BotConfig>,
    bindings: BindingService,
    accounts: Arc<dyn AccountClient>,
    gateway: Arc<dyn ChatGateway>,
}

impl EnrollmentService {
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

    pub async fn enroll(&self, identity: Identity, account_id: AccountId) -> AppResult<EnrollResult> {
        if let Some(existing) = self.bindings.find_by_identity(identity).await? {
            return Ok(EnrollResult::SenderAlreadyBound {
                account_id: existing.account_id,
            });
        }

        let user = match self.accounts.get_user(account_id).await {
            Ok(user) => user,
            Err(AppError::NotFound) => return Ok(EnrollResult::AccountMissing),
            Err(err) => return Err(err),
        };

        let binding = match self.bindings.bind(identity, account_id).await {
            Ok(binding) => binding,
            Err(AppError::AlreadyBound) => return Ok(EnrollResult::AccountTaken),
            Err(err) => return Err(err),
        };

        let group = self.config.binding.binding_group.clone();
        if let Err(err) = self.accounts.set_group(account_id, &group).await {
            error!(?err, %identity, %account_id, %group, "website promotion failed, undoing bind");
            if let Err(undo_err) = self.bindings.discard(identity).await {
                error!(
                    ?undo_err,
                    %identity,
                    %account_id,
                    manual_reconciliation_required = true,
                    "failed to undo binding after promotion failure",
                );
            }
            return Ok(EnrollResult::RolledBack);
        }

        info!(%identity, %account_id, %group, username = %user.username, "account enrolled");
        self.send_welcome(identity, account_id, &group).await;
        Ok(EnrollResult::Enrolled { binding, group })
    }

    async fn send_welcome(&self, identity: Identity, account_id: AccountId, group: &str) {
        let settings = &self.config.private_message;
        if !settings.enabled {
            return;
        }
        let message = render(
            &settings.bind_success_template,
            &[
                ("identity", identity.to_string()),
                ("account_id", account_id.to_string()),
                ("group", group.to_string()),
            ],
        );
        if let Err(err) = self.gateway.send_private_message(identity, &message).await {
            warn!(?err, %identity, "bind confirmation private message failed");
        }
    }
}
