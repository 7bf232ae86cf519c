#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use serde_json::Map;

use bindbot::app::Services;
use bindbot::config::BotConfig;
use bindbot::error::{AppError, AppResult};
use bindbot::gateway::ChatGateway;
use bindbot::models::{AccountId, Identity};
use bindbot::reconciliation::RetryPolicy;
use bindbot::store::{BindingStore, MemoryStore};
use bindbot::website::{AccountClient, BalanceChange, WebsiteUser};

pub const MONITORED_GROUP: i64 = 42;
pub const ADMIN: i64 = 9000;

/// Ratio 1 so display units equal raw quota; zero backoff keeps retries instant.
pub fn test_config() -> BotConfig {
    let mut config = BotConfig::default();
    config.admin_identities = vec![ADMIN];
    config.binding.quota_display_ratio = 1;
    config.binding.binding_group = "vip".to_string();
    config.group_leave.monitored_groups = vec![MONITORED_GROUP];
    config.group_leave.restore_group = "default".to_string();
    config.group_leave.retry = RetryPolicy {
        max_attempts: 3,
        base_backoff_ms: 0,
        max_backoff_ms: 0,
    };
    config.heist.enabled = true;
    config.heist.max_gain = None;
    config.check_in.enabled = true;
    config
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum AccountCall {
    GetUser(i64),
    Adjust(i64, i64),
    SetGroup(i64, String),
    ResetGroup(i64, String),
}

/// Records every call; failures are injected per operation.
#[derive(Default)]
pub struct FakeAccounts {
    users: Mutex<HashMap<AccountId, WebsiteUser>>,
    calls: Mutex<Vec<AccountCall>>,
    reset_failures: Mutex<u32>,
    fail_set_group: Mutex<bool>,
    fail_credit_to: Mutex<Option<AccountId>>,
    bindings: Mutex<Option<Arc<MemoryStore>>>,
    bound_at_reset: Mutex<Vec<bool>>,
}

impl FakeAccounts {
    pub fn with_users(users: &[(i64, i64, &str)]) -> Self {
        let fake = Self::default();
        {
            let mut map = fake.users.lock().unwrap();
            for (id, quota, group) in users {
                map.insert(
                    AccountId(*id),
                    WebsiteUser {
                        id: *id,
                        username: format!("user{id}"),
                        quota: *quota,
                        group: group.to_string(),
                        extra: Map::new(),
                    },
                );
            }
        }
        fake
    }

    pub fn calls(&self) -> Vec<AccountCall> {
        self.calls.lock().unwrap().clone()
    }

    pub fn adjust_calls(&self) -> Vec<(i64, i64)> {
        self.calls()
            .into_iter()
            .filter_map(|call| match call {
                AccountCall::Adjust(id, delta) => Some((id, delta)),
                _ => None,
            })
            .collect()
    }

    pub fn reset_calls(&self) -> usize {
        self.calls()
            .iter()
            .filter(|call| matches!(call, AccountCall::ResetGroup(..)))
            .count()
    }

    pub fn quota(&self, id: i64) -> i64 {
        self.users.lock().unwrap()[&AccountId(id)].quota
    }

    pub fn group(&self, id: i64) -> String {
        self.users.lock().unwrap()[&AccountId(id)].group.clone()
    }

    pub fn fail_next_resets(&self, count: u32) {
        *self.reset_failures.lock().unwrap() = count;
    }

    pub fn fail_set_group(&self) {
        *self.fail_set_group.lock().unwrap() = true;
    }

    pub fn fail_credit_to(&self, id: i64) {
        *self.fail_credit_to.lock().unwrap() = Some(AccountId(id));
    }

    /// Lets `reset_group` note whether the account was still bound when it ran.
    pub fn observe_bindings(&self, store: Arc<MemoryStore>) {
        *self.bindings.lock().unwrap() = Some(store);
    }

    /// One entry per `reset_group` call: `true` if a binding still existed for the account.
    pub fn bound_at_reset(&self) -> Vec<bool> {
        self.bound_at_reset.lock().unwrap().clone()
    }

    pub fn clear_credit_failure(&self) {
        *self.fail_credit_to.lock().unwrap() = None;
    }

    fn record(&self, call: AccountCall) {
        self.calls.lock().unwrap().push(call);
    }
}

#[async_trait]
impl AccountClient for FakeAccounts {
    async fn get_user(&self, account_id: AccountId) -> AppResult<WebsiteUser> {
        self.record(AccountCall::GetUser(account_id.0));
        self.users
            .lock()
            .unwrap()
            .get(&account_id)
            .cloned()
            .ok_or(AppError::NotFound)
    }

    async fn adjust_balance(&self, account_id: AccountId, delta: i64) -> AppResult<BalanceChange> {
        self.record(AccountCall::Adjust(account_id.0, delta));
        if delta > 0 && *self.fail_credit_to.lock().unwrap() == Some(account_id) {
            return Err(AppError::RemoteAccountApi("credit refused".into()));
        }
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(&account_id).ok_or(AppError::NotFound)?;
        let before = user.quota;
        user.quota = (before + delta).max(0);
        Ok(BalanceChange {
            applied: user.quota - before,
            balance: user.quota,
        })
    }

    async fn set_group(&self, account_id: AccountId, group: &str) -> AppResult<()> {
        self.record(AccountCall::SetGroup(account_id.0, group.to_string()));
        if *self.fail_set_group.lock().unwrap() {
            return Err(AppError::RemoteAccountApi("group update refused".into()));
        }
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(&account_id).ok_or(AppError::NotFound)?;
        user.group = group.to_string();
        Ok(())
    }

    async fn reset_group(&self, account_id: AccountId, group: &str) -> AppResult<bool> {
        self.record(AccountCall::ResetGroup(account_id.0, group.to_string()));
        let store = self.bindings.lock().unwrap().clone();
        if let Some(store) = store {
            let bound = store.find_by_account(account_id).await?.is_some();
            self.bound_at_reset.lock().unwrap().push(bound);
        }
        {
            let mut remaining = self.reset_failures.lock().unwrap();
            if *remaining > 0 {
                *remaining -= 1;
                return Err(AppError::RemoteAccountApi("website unavailable".into()));
            }
        }
        let mut users = self.users.lock().unwrap();
        let user = users.get_mut(&account_id).ok_or(AppError::NotFound)?;
        if user.group == group {
            return Ok(false);
        }
        user.group = group.to_string();
        Ok(true)
    }
}

#[derive(Default)]
pub struct FakeGateway {
    pub group_messages: Mutex<Vec<(i64, String)>>,
    pub private_messages: Mutex<Vec<(Identity, String)>>,
    fail: Mutex<bool>,
}

impl FakeGateway {
    pub fn fail_sends(&self) {
        *self.fail.lock().unwrap() = true;
    }

    pub fn group_messages(&self) -> Vec<(i64, String)> {
        self.group_messages.lock().unwrap().clone()
    }

    pub fn private_messages(&self) -> Vec<(Identity, String)> {
        self.private_messages.lock().unwrap().clone()
    }
}

#[async_trait]
impl ChatGateway for FakeGateway {
    async fn send_group_message(&self, group_id: i64, message: &str) -> AppResult<()> {
        if *self.fail.lock().unwrap() {
            return Err(AppError::Message("gateway offline".into()));
        }
        self.group_messages
            .lock()
            .unwrap()
            .push((group_id, message.to_string()));
        Ok(())
    }

    async fn send_private_message(&self, identity: Identity, message: &str) -> AppResult<()> {
        if *self.fail.lock().unwrap() {
            return Err(AppError::Message("gateway offline".into()));
        }
        self.private_messages
            .lock()
            .unwrap()
            .push((identity, message.to_string()));
        Ok(())
    }
}

pub struct Harness {
    pub config: Arc<BotConfig>,
    pub store: Arc<MemoryStore>,
    pub accounts: Arc<FakeAccounts>,
    pub gateway: Arc<FakeGateway>,
    pub services: Arc<Services>,
}

impl Harness {
    pub fn new(config: BotConfig, accounts: FakeAccounts) -> Self {
        let config = Arc::new(config);
        let store = Arc::new(MemoryStore::new());
        accounts.observe_bindings(store.clone());
        let accounts = Arc::new(accounts);
        let gateway = Arc::new(FakeGateway::default());
        let services = Arc::new(Services::build(
            config.clone(),
            store.clone(),
            store.clone(),
            accounts.clone(),
            gateway.clone(),
        ));
        Self {
            config,
            store,
            accounts,
            gateway,
            services,
        }
    }

    /// Binds directly through the binding service, skipping website promotion.
    pub async fn bind(&self, identity: i64, account_id: i64) {
        self.services
            .bindings
            .bind(Identity(identity), AccountId(account_id))
            .await
            .unwrap();
    }
}
