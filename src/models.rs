use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::error::AppError;

/// key: identity -> chat-platform user id
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct Identity(pub i64);

/// key: account-id -> website user id
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize, sqlx::Type)]
#[sqlx(transparent)]
#[serde(transparent)]
pub struct AccountId(pub i64);

impl fmt::Display for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for AccountId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// key: bindings-model -> one identity, one account
#[derive(Clone, Debug, PartialEq, Eq, FromRow, Serialize, Deserialize)]
pub struct Binding {
    pub id: i64,
    pub identity: Identity,
    pub account_id: AccountId,
    pub created_at: DateTime<Utc>,
    pub last_check_in_at: Option<DateTime<Utc>>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HeistOutcome {
    Success,
    Critical,
    Failure,
}

impl HeistOutcome {
    pub fn as_str(&self) -> &'static str {
        match self {
            HeistOutcome::Success => "SUCCESS",
            HeistOutcome::Critical => "CRITICAL",
            HeistOutcome::Failure => "FAILURE",
        }
    }

    /// Outcomes that count against the target's daily defenses.
    pub fn is_gain(&self) -> bool {
        !matches!(self, HeistOutcome::Failure)
    }
}

impl FromStr for HeistOutcome {
    type Err = AppError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "SUCCESS" => Ok(Self::Success),
            "CRITICAL" => Ok(Self::Critical),
            "FAILURE" => Ok(Self::Failure),
            other => Err(AppError::Message(format!("unknown heist outcome `{other}`"))),
        }
    }
}

/// key: heist-log-model -> append-only
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct HeistLogEntry {
    pub id: i64,
    pub actor_identity: Identity,
    pub target_account_id: AccountId,
    pub occurred_at: DateTime<Utc>,
    pub outcome: HeistOutcome,
    /// Raw quota moved to the actor; negative when the actor paid a penalty.
    pub amount: i64,
}

#[derive(Clone, Debug)]
pub struct NewHeistLogEntry {
    pub actor_identity: Identity,
    pub target_account_id: AccountId,
    pub occurred_at: DateTime<Utc>,
    pub outcome: HeistOutcome,
    pub amount: i64,
}
