use async_trait::async_trait;
use reqwest::{Client, Method, StatusCode};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::AccountApiSettings;
use crate::error::{AppError, AppResult};
use crate::models::AccountId;

/// Website user profile. Fields the bot does not touch are carried through `extra` so a
/// read-modify-write never drops them.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct WebsiteUser {
    pub id: i64,
    #[serde(default)]
    pub username: String,
    #[serde(default)]
    pub quota: i64,
    #[serde(default)]
    pub group: String,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// What an adjustment actually did. `applied` differs from the requested delta when the
/// balance was clamped at zero.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BalanceChange {
    pub applied: i64,
    pub balance: i64,
}

/// key: account-client -> website admin API
#[async_trait]
pub trait AccountClient: Send + Sync {
    /// `AppError::NotFound` when the website has no such user.
    async fn get_user(&self, account_id: AccountId) -> AppResult<WebsiteUser>;

    /// Applies `delta` raw quota units. The balance never goes below zero.
    async fn adjust_balance(&self, account_id: AccountId, delta: i64) -> AppResult<BalanceChange>;

    async fn set_group(&self, account_id: AccountId, group: &str) -> AppResult<()>;

    /// Idempotent: returns `false` without writing when the account is already in `group`.
    async fn reset_group(&self, account_id: AccountId, group: &str) -> AppResult<bool>;

    async fn get_balance(&self, account_id: AccountId) -> AppResult<i64> {
        Ok(self.get_user(account_id).await?.quota)
    }
}

#[derive(Debug, Deserialize)]
struct ApiEnvelope {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: String,
    #[serde(default)]
    data: Option<Value>,
}

/// key: account-client-newapi -> reqwest implementation
pub struct NewApiClient {
    base: String,
    access_token: String,
    admin_user_id: String,
    client: Client,
}

impl NewApiClient {
    pub fn new(settings: AccountApiSettings) -> AppResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(10))
            .build()?;
        Ok(Self {
            base: settings.base_url.trim_end_matches('/').to_string(),
            access_token: settings.access_token,
            admin_user_id: settings.admin_user_id,
            client,
        })
    }

    async fn request(
        &self,
        method: Method,
        path: &str,
        body: Option<&WebsiteUser>,
    ) -> AppResult<ApiEnvelope> {
        let url = format!("{}{}", self.base, path);
        let mut req = self
            .client
            .request(method, &url)
            .header("Authorization", &self.access_token)
            .header("New-Api-User", &self.admin_user_id);
        if let Some(b) = body {
            req = req.json(b);
        }
        let resp = req.send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Err(AppError::NotFound);
        }
        let resp = resp.error_for_status()?;
        Ok(resp.json().await?)
    }

    async fn update_user(&self, user: &WebsiteUser) -> AppResult<()> {
        let envelope = self.request(Method::PUT, "/api/user/", Some(user)).await?;
        if !envelope.success {
            return Err(AppError::RemoteAccountApi(format!(
                "update of user {} rejected: {}",
                user.id, envelope.message
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl AccountClient for NewApiClient {
    async fn get_user(&self, account_id: AccountId) -> AppResult<WebsiteUser> {
        let envelope = self
            .request(Method::GET, &format!("/api/user/{account_id}"), None)
            .await?;
        if !envelope.success {
            debug!(%account_id, message = %envelope.message, "website reported no such user");
            return Err(AppError::NotFound);
        }
        let data = envelope.data.ok_or_else(|| {
            AppError::RemoteAccountApi(format!("user {account_id} response carried no data"))
        })?;
        serde_json::from_value(data).map_err(|err| {
            AppError::RemoteAccountApi(format!("user {account_id} payload malformed: {err}"))
        })
    }

    async fn adjust_balance(&self, account_id: AccountId, delta: i64) -> AppResult<BalanceChange> {
        let mut user = self.get_user(account_id).await?;
        let before = user.quota;
        let mut next = before.saturating_add(delta);
        if next < 0 {
            warn!(%account_id, current = before, delta, "adjustment would go negative, clamping to zero");
            next = 0;
        }
        user.quota = next;
        self.update_user(&user).await?;
        Ok(BalanceChange {
            applied: next - before,
            balance: next,
        })
    }

    async fn set_group(&self, account_id: AccountId, group: &str) -> AppResult<()> {
        let mut user = self.get_user(account_id).await?;
        if user.group == group {
            return Ok(());
        }
        user.group = group.to_string();
        self.update_user(&user).await
    }

    async fn reset_group(&self, account_id: AccountId, group: &str) -> AppResult<bool> {
        let mut user = self.get_user(account_id).await?;
        if user.group == group {
            info!(%account_id, %group, "website account already in restore group");
            return Ok(false);
        }
        user.group = group.to_string();
        self.update_user(&user).await?;
        info!(%account_id, %group, "website account group restored");
        Ok(true)
    }
}
