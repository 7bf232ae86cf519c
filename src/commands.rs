use std::sync::Arc;

use once_cell::sync::Lazy;
use regex::Regex;
use thiserror::Error;
use tracing::{error, info};

use crate::app::Services;
use crate::bindings::{KeyKind, LookupKey};
use crate::checkin::CheckInResult;
use crate::enrollment::EnrollResult;
use crate::error::AppError;
use crate::heist::HeistResult;
use crate::models::{AccountId, HeistOutcome, Identity};
use crate::templates::{display_amount, render};

static MENTION: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\[CQ:at,qq=(\d+)[^\]]*\]").expect("invalid mention regex"));

const NOT_BOUND_REPLY: &str =
    "You have not bound a website account yet. Use /bind <accountId> first.";
const ADMIN_ONLY_REPLY: &str = "This command is restricted to administrators.";

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum HeistTarget {
    Mention(Identity),
    Key(i64),
}

#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    Ping,
    Bind { account_id: AccountId },
    Balance,
    CheckIn,
    Heist { targets: Vec<HeistTarget> },
    Unbind { account_id: AccountId },
    Query { key: i64 },
    Adjust { key: i64, delta: f64 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParseError {
    #[error("usage: {0}")]
    Usage(&'static str),
    #[error("unknown command `/{0}`")]
    Unknown(String),
}

impl Command {
    /// `Ok(None)` for ordinary chat text. Mentions of `self_id` are dropped from heist targets.
    pub fn parse(text: &str, self_id: Option<i64>) -> Result<Option<Command>, ParseError> {
        let Some(body) = text.trim().strip_prefix('/') else {
            return Ok(None);
        };
        let name_len = body
            .find(|c: char| c.is_whitespace() || c == '[')
            .unwrap_or(body.len());
        let (name, rest) = body.split_at(name_len);
        let args: Vec<&str> = rest.split_whitespace().collect();

        let command = match name.to_ascii_lowercase().as_str() {
            "ping" => Command::Ping,
            "balance" => Command::Balance,
            "checkin" => Command::CheckIn,
            "bind" => Command::Bind {
                account_id: AccountId(single_id(&args, "/bind <accountId>")?),
            },
            "unbind" => Command::Unbind {
                account_id: AccountId(single_id(&args, "/unbind <accountId>")?),
            },
            "query" => Command::Query {
                key: single_id(&args, "/query <accountId|identity>")?,
            },
            "adjust" => {
                const USAGE: &str = "/adjust <accountId|identity> <delta>";
                let [key, delta] = args.as_slice() else {
                    return Err(ParseError::Usage(USAGE));
                };
                let key = key.parse().map_err(|_| ParseError::Usage(USAGE))?;
                let delta: f64 = delta.parse().map_err(|_| ParseError::Usage(USAGE))?;
                if !delta.is_finite() {
                    return Err(ParseError::Usage(USAGE));
                }
                Command::Adjust { key, delta }
            }
            "heist" => Command::Heist {
                targets: heist_targets(rest, self_id)?,
            },
            other => return Err(ParseError::Unknown(other.to_string())),
        };
        Ok(Some(command))
    }

    pub fn requires_admin(&self) -> bool {
        matches!(
            self,
            Command::Unbind { .. } | Command::Query { .. } | Command::Adjust { .. }
        )
    }
}

fn single_id(args: &[&str], usage: &'static str) -> Result<i64, ParseError> {
    match args {
        [raw] => raw.parse().map_err(|_| ParseError::Usage(usage)),
        _ => Err(ParseError::Usage(usage)),
    }
}

fn heist_targets(rest: &str, self_id: Option<i64>) -> Result<Vec<HeistTarget>, ParseError> {
    const USAGE: &str = "/heist <@member|accountId>";
    let mut targets = Vec::new();
    for capture in MENTION.captures_iter(rest) {
        let id: i64 = capture[1].parse().map_err(|_| ParseError::Usage(USAGE))?;
        if Some(id) != self_id {
            targets.push(HeistTarget::Mention(Identity(id)));
        }
    }
    for token in MENTION.replace_all(rest, " ").split_whitespace() {
        let key = token.parse().map_err(|_| ParseError::Usage(USAGE))?;
        targets.push(HeistTarget::Key(key));
    }
    Ok(targets)
}

/// Where a command came from.
#[derive(Clone, Copy, Debug)]
pub struct CommandContext {
    pub sender: Identity,
    pub group_id: Option<i64>,
    /// The bot's own chat id, when known.
    pub self_id: Option<i64>,
}

/// key: command-dispatcher -> text command to user-visible reply
pub struct CommandDispatcher {
    services: Arc<Services>,
}

impl CommandDispatcher {
    pub fn new(services: Arc<Services>) -> Self {
        Self { services }
    }

    /// `None` when `text` is not a command.
    pub async fn dispatch(&self, ctx: &CommandContext, text: &str) -> Option<String> {
        let command = match Command::parse(text, ctx.self_id) {
            Ok(Some(command)) => command,
            Ok(None) => return None,
            Err(err) => return Some(err.to_string()),
        };

        if command.requires_admin() && !self.services.config.is_admin(ctx.sender.0) {
            info!(sender = %ctx.sender, ?command, "admin command refused");
            return Some(ADMIN_ONLY_REPLY.to_string());
        }

        let reply = match command {
            Command::Ping => Ok("Pong! The quota bot is running.".to_string()),
            Command::Bind { account_id } => self.bind(ctx.sender, account_id).await,
            Command::Balance => self.balance(ctx.sender).await,
            Command::CheckIn => self.check_in(ctx.sender).await,
            Command::Heist { targets } => self.heist(ctx.sender, targets).await,
            Command::Unbind { account_id } => self.unbind(account_id).await,
            Command::Query { key } => self.query(key).await,
            Command::Adjust { key, delta } => self.adjust(key, delta).await,
        };

        Some(reply.unwrap_or_else(|err| error_reply(&err)))
    }

    fn display(&self, raw: i64) -> String {
        display_amount(self.services.config.to_display_quota(raw))
    }

    async fn bind(&self, sender: Identity, account_id: AccountId) -> Result<String, AppError> {
        let reply = match self.services.enrollment.enroll(sender, account_id).await? {
            EnrollResult::SenderAlreadyBound { account_id } => format!(
                "You are already bound to website account {account_id}; no need to bind again."
            ),
            EnrollResult::AccountMissing => {
                format!("Website account {account_id} does not exist. Please check the id.")
            }
            EnrollResult::AccountTaken => {
                format!("Website account {account_id} is already bound to another member.")
            }
            EnrollResult::Enrolled { group, .. } => format!(
                "Bind succeeded! You are now linked to website account {account_id} and were promoted to `{group}`."
            ),
            EnrollResult::RolledBack => {
                "Binding failed while updating the website; it has been undone. Please contact an administrator."
                    .to_string()
            }
        };
        Ok(reply)
    }

    async fn balance(&self, sender: Identity) -> Result<String, AppError> {
        let Some(binding) = self.services.bindings.find_by_identity(sender).await? else {
            return Ok(NOT_BOUND_REPLY.to_string());
        };
        let balance = self.services.ledger.balance(binding.account_id).await?;
        Ok(format!(
            "Website account: {}\nRemaining quota: {}",
            binding.account_id,
            self.display(balance)
        ))
    }

    async fn check_in(&self, sender: Identity) -> Result<String, AppError> {
        let settings = &self.services.config.check_in;
        let reply = match self.services.check_in.check_in(sender).await? {
            CheckInResult::Disabled => "Daily check-in is currently disabled.".to_string(),
            CheckInResult::NotBound => NOT_BOUND_REPLY.to_string(),
            CheckInResult::AlreadyCheckedIn => {
                "You have already checked in today. Come back tomorrow!".to_string()
            }
            CheckInResult::Rewarded(reward) => {
                let template = if reward.is_first && settings.first_bonus_enabled {
                    &settings.first_template
                } else if reward.is_doubled {
                    &settings.doubled_template
                } else {
                    &settings.success_template
                };
                render(
                    template,
                    &[
                        ("display_added", self.display(reward.added)),
                        ("display_total", self.display(reward.balance)),
                        ("identity", sender.to_string()),
                        ("account_id", reward.account_id.to_string()),
                    ],
                )
            }
        };
        Ok(reply)
    }

    async fn heist(&self, sender: Identity, targets: Vec<HeistTarget>) -> Result<String, AppError> {
        let target = match targets.as_slice() {
            [] => return Ok("Who are you robbing? Mention your target.".to_string()),
            [target] => *target,
            _ => return Ok("Don't be greedy, one target at a time!".to_string()),
        };
        let key = match target {
            HeistTarget::Mention(identity) => LookupKey::Identity(identity),
            HeistTarget::Key(raw) => LookupKey::Either(raw),
        };

        let settings = &self.services.config.heist;
        let reply = match self.services.heist.execute(sender, key).await? {
            HeistResult::Disabled => "Heists are not open right now.".to_string(),
            HeistResult::ActorNotBound => NOT_BOUND_REPLY.to_string(),
            HeistResult::TargetNotFound => "Your target has no bound account.".to_string(),
            HeistResult::SelfTarget => "You cannot rob yourself.".to_string(),
            HeistResult::AttemptsExceeded => {
                "You are out of heist attempts for today.".to_string()
            }
            HeistResult::DefensesExceeded { target } => {
                format!("Account {target} is on guard for the rest of the day.")
            }
            HeistResult::Executed(report) => match report.outcome {
                HeistOutcome::Success => render(
                    &settings.success_template,
                    &[("gain", self.display(report.amount))],
                ),
                HeistOutcome::Critical => render(
                    &settings.critical_template,
                    &[("gain", self.display(report.amount))],
                ),
                HeistOutcome::Failure if report.amount < 0 => render(
                    &settings.penalty_template,
                    &[("penalty", self.display(-report.amount))],
                ),
                HeistOutcome::Failure => settings.failure_template.clone(),
            },
        };
        Ok(reply)
    }

    async fn unbind(&self, account_id: AccountId) -> Result<String, AppError> {
        let report = match self.services.admin.unbind(account_id).await {
            Ok(report) => report,
            Err(AppError::NotFound) => {
                return Ok(format!("No binding found for website account {account_id}."))
            }
            Err(err) => return Err(err),
        };
        let identity = report.binding.identity;
        let reply = match report.restore {
            Ok(_) => format!(
                "Website account {account_id} was unbound from {identity} and its group reset to `{}`.",
                self.services.config.group_leave.restore_group
            ),
            Err(exhausted) => format!(
                "Website account {account_id} was unbound from {identity}, but resetting its group failed after {} attempt(s). Manual follow-up required.",
                exhausted.attempts
            ),
        };
        Ok(reply)
    }

    async fn query(&self, key: i64) -> Result<String, AppError> {
        let resolved = match self.services.admin.query(key).await {
            Ok(resolved) => resolved,
            Err(AppError::NotFound) => return Ok(format!("No binding matches {key}.")),
            Err(err) => return Err(err),
        };
        let binding = resolved.binding;
        let matched = match resolved.matched {
            KeyKind::Account => "website account id",
            KeyKind::Identity => "member identity",
        };
        Ok(format!(
            "{key} matched as {matched}\nMember: {}\nWebsite account: {}\nBound since: {}",
            binding.identity,
            binding.account_id,
            binding.created_at.format("%Y-%m-%d %H:%M:%S")
        ))
    }

    async fn adjust(&self, key: i64, delta: f64) -> Result<String, AppError> {
        let raw = self.services.config.to_raw_quota(delta);
        let adjustment = match self.services.admin.adjust_balance(key, raw).await {
            Ok(adjustment) => adjustment,
            Err(AppError::NotFound) => return Ok(format!("No binding matches {key}.")),
            Err(err) => return Err(err),
        };
        let action = if delta >= 0.0 { "Added" } else { "Removed" };
        Ok(format!(
            "{action} {} quota on website account {}.\nNew balance: {}",
            display_amount(delta.abs()),
            adjustment.account_id,
            self.display(adjustment.balance)
        ))
    }
}

fn error_reply(err: &AppError) -> String {
    match err {
        AppError::AlreadyBound => "That identity or account is already bound.".to_string(),
        AppError::NotFound => "Nothing was found for that request.".to_string(),
        AppError::RemoteAccountApi(_) => {
            "The website could not be reached. Please try again later.".to_string()
        }
        other => {
            error!(err = ?other, "command failed");
            "Something went wrong. Please contact an administrator.".to_string()
        }
    }
}
