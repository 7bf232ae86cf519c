use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::Extension,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use serde_json::{json, Value};
use sha1::Sha1;
use sha2::Sha256;
use tracing::{debug, error, warn};

use crate::commands::{CommandContext, CommandDispatcher};
use crate::error::{AppError, AppResult};
use crate::models::Identity;
use crate::reconciliation::{LeaveKind, MembershipEvent, ReconciliationHandle};

pub const SIGNATURE_HEADER: &str = "x-signature";

/// Shared secret for inbound event signatures. `None` accepts unsigned events.
#[derive(Clone, Debug, Default)]
pub struct EventSecret(pub Option<String>);

/// key: onebot-event -> subset of the OneBot v11 event envelope the bot reacts to
#[derive(Debug, Deserialize)]
pub struct OneBotEvent {
    pub post_type: String,
    #[serde(default)]
    pub message_type: Option<String>,
    #[serde(default)]
    pub notice_type: Option<String>,
    #[serde(default)]
    pub sub_type: Option<String>,
    #[serde(default)]
    pub self_id: Option<i64>,
    #[serde(default)]
    pub user_id: Option<i64>,
    #[serde(default)]
    pub group_id: Option<i64>,
    #[serde(default)]
    pub operator_id: Option<i64>,
    #[serde(default)]
    pub raw_message: Option<String>,
    #[serde(default)]
    pub message: Option<Value>,
}

impl OneBotEvent {
    /// Prefers `raw_message`, then a string-form `message`.
    pub fn text(&self) -> Option<&str> {
        self.raw_message
            .as_deref()
            .or_else(|| self.message.as_ref().and_then(Value::as_str))
    }

    /// Maps a `group_decrease` notice to a membership event. `kick_me` and other sub types
    /// are not reconciled.
    pub fn membership_event(&self) -> Option<MembershipEvent> {
        if self.post_type != "notice" || self.notice_type.as_deref() != Some("group_decrease") {
            return None;
        }
        let kind = match self.sub_type.as_deref() {
            Some("leave") => LeaveKind::Left,
            Some("kick") => LeaveKind::Kicked {
                operator: self.operator_id.filter(|id| *id != 0),
            },
            _ => return None,
        };
        Some(MembershipEvent {
            group_id: self.group_id?,
            identity: Identity(self.user_id?),
            kind,
        })
    }
}

/// Signs `body` the way OneBot v11 gateways do: `sha1=<hex HMAC-SHA1>`.
pub fn sign_body(secret: &str, body: &[u8]) -> AppResult<String> {
    let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes())
        .map_err(|err| AppError::Message(format!("invalid signing key: {err}")))?;
    mac.update(body);
    Ok(format!("sha1={}", hex::encode(mac.finalize().into_bytes())))
}

/// Accepts `sha1=<hex>` and `sha256=<hex>`. Digests are compared in constant time.
fn verify_signature(secret: &EventSecret, headers: &HeaderMap, body: &[u8]) -> AppResult<()> {
    let Some(secret) = secret.0.as_deref() else {
        return Ok(());
    };
    let provided = headers
        .get(SIGNATURE_HEADER)
        .ok_or(AppError::Unauthorized)?
        .to_str()
        .map_err(|_| AppError::BadRequest("Bad signature".into()))?;
    let (algorithm, digest) = provided.split_once('=').ok_or(AppError::Unauthorized)?;
    let digest = hex::decode(digest.trim()).map_err(|_| AppError::Unauthorized)?;

    let verified = match algorithm.trim().to_ascii_lowercase().as_str() {
        "sha1" => {
            let mut mac = Hmac::<Sha1>::new_from_slice(secret.as_bytes())
                .map_err(|err| AppError::Message(format!("invalid signing key: {err}")))?;
            mac.update(body);
            mac.verify_slice(&digest).is_ok()
        }
        "sha256" => {
            let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes())
                .map_err(|err| AppError::Message(format!("invalid signing key: {err}")))?;
            mac.update(body);
            mac.verify_slice(&digest).is_ok()
        }
        other => {
            warn!(algorithm = other, "unsupported event signature algorithm");
            false
        }
    };
    if !verified {
        return Err(AppError::Unauthorized);
    }
    Ok(())
}

/// key: onebot-events -> commands reply inline, leave notices go to the reconciliation queue
pub async fn onebot_events(
    Extension(dispatcher): Extension<Arc<CommandDispatcher>>,
    Extension(reconciliation): Extension<ReconciliationHandle>,
    Extension(secret): Extension<EventSecret>,
    headers: HeaderMap,
    body: Bytes,
) -> AppResult<Response> {
    verify_signature(&secret, &headers, &body)?;
    let event: OneBotEvent = serde_json::from_slice(&body)
        .map_err(|err| AppError::BadRequest(format!("malformed event: {err}")))?;

    match event.post_type.as_str() {
        "message" => {
            let (Some(user_id), Some(text)) = (event.user_id, event.text()) else {
                return Ok(StatusCode::NO_CONTENT.into_response());
            };
            let ctx = CommandContext {
                sender: Identity(user_id),
                group_id: event.group_id,
                self_id: event.self_id,
            };
            match dispatcher.dispatch(&ctx, text).await {
                Some(reply) => {
                    debug!(sender = user_id, message_type = ?event.message_type, "command answered");
                    Ok(Json(json!({ "reply": reply })).into_response())
                }
                None => Ok(StatusCode::NO_CONTENT.into_response()),
            }
        }
        "notice" => match event.membership_event() {
            Some(membership) => {
                reconciliation.dispatch(membership).await.map_err(|err| {
                    error!(?err, group_id = membership.group_id, "leave event dropped");
                    AppError::Message(err.to_string())
                })?;
                Ok(StatusCode::ACCEPTED.into_response())
            }
            None => Ok(StatusCode::NO_CONTENT.into_response()),
        },
        other => {
            if other != "meta_event" {
                warn!(post_type = other, "unhandled event type");
            }
            Ok(StatusCode::NO_CONTENT.into_response())
        }
    }
}
