use async_trait::async_trait;
use reqwest::Client;
use serde::Deserialize;
use serde_json::{json, Value};
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::models::Identity;

/// key: chat-gateway -> outgoing chat messages
#[async_trait]
pub trait ChatGateway: Send + Sync {
    async fn send_group_message(&self, group_id: i64, message: &str) -> AppResult<()>;
    async fn send_private_message(&self, identity: Identity, message: &str) -> AppResult<()>;
}

#[derive(Debug, Deserialize)]
struct ActionResponse {
    #[serde(default)]
    status: String,
    #[serde(default)]
    retcode: i64,
}

/// key: chat-gateway-onebot -> OneBot v11 HTTP API
pub struct OneBotClient {
    base: String,
    token: Option<String>,
    client: Client,
}

impl OneBotClient {
    pub fn new(base: impl Into<String>, token: Option<String>) -> AppResult<Self> {
        Ok(Self {
            base: base.into().trim_end_matches('/').to_string(),
            token,
            client: Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .map_err(|err| AppError::Message(format!("gateway client build failed: {err}")))?,
        })
    }

    async fn call(&self, action: &str, params: Value) -> AppResult<()> {
        let url = format!("{}/{}", self.base, action);
        let mut req = self.client.post(&url).json(&params);
        if let Some(token) = &self.token {
            req = req.bearer_auth(token);
        }
        let resp = req
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|err| AppError::Message(format!("gateway {action} failed: {err}")))?;
        let body: ActionResponse = resp
            .json()
            .await
            .map_err(|err| AppError::Message(format!("gateway {action} reply malformed: {err}")))?;
        if body.status == "failed" || body.retcode != 0 {
            return Err(AppError::Message(format!(
                "gateway {action} rejected with retcode {}",
                body.retcode
            )));
        }
        Ok(())
    }
}

#[async_trait]
impl ChatGateway for OneBotClient {
    async fn send_group_message(&self, group_id: i64, message: &str) -> AppResult<()> {
        self.call(
            "send_group_msg",
            json!({ "group_id": group_id, "message": message }),
        )
        .await
    }

    async fn send_private_message(&self, identity: Identity, message: &str) -> AppResult<()> {
        self.call(
            "send_private_msg",
            json!({ "user_id": identity.0, "message": message }),
        )
        .await
    }
}
