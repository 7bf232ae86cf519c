use std::sync::Arc;

use chrono::{DateTime, SubsecRound, Utc};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Mutex;
use tracing::{debug, error, info};

use crate::bindings::BindingService;
use crate::config::{BotConfig, CheckInSettings};
use crate::error::AppResult;
use crate::ledger::QuotaLedger;
use crate::models::{AccountId, Binding, Identity};
use crate::window::{local_date, local_day_start};

#[derive(Clone, Debug, PartialEq)]
pub enum CheckInResult {
    Disabled,
    NotBound,
    AlreadyCheckedIn,
    Rewarded(CheckInReward),
}

#[derive(Clone, Debug, PartialEq)]
pub struct CheckInReward {
    pub account_id: AccountId,
    pub is_first: bool,
    pub is_doubled: bool,
    /// Raw quota credited.
    pub added: i64,
    /// Raw balance after the credit.
    pub balance: i64,
}

/// Whether `last` falls on the same local day as `now`.
pub fn checked_in_today(
    last: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
    offset_hours: i64,
) -> bool {
    last.map_or(false, |last| {
        local_date(last, offset_hours) == local_date(now, offset_hours)
    })
}

/// Rolls the reward for one check-in. Returns `(raw amount, doubled)`.
pub fn roll_reward<R: Rng + ?Sized>(
    config: &BotConfig,
    is_first: bool,
    rng: &mut R,
) -> (i64, bool) {
    let settings: &CheckInSettings = &config.check_in;
    let first_bonus = is_first && settings.first_bonus_enabled;
    let doubled = !first_bonus && rng.gen::<f64>() < settings.double_chance;

    let base_display = if settings.max_reward > settings.min_reward {
        rng.gen_range(settings.min_reward..=settings.max_reward)
    } else {
        settings.min_reward
    };
    let base = config.to_raw_quota(base_display);
    let regular = if doubled { base * 2 } else { base };
    let bonus = if first_bonus {
        config.to_raw_quota(settings.first_bonus)
    } else {
        0
    };
    (regular + bonus, doubled)
}

/// key: check-in -> daily quota reward
pub struct CheckInService {
    config: Arc<BotConfig>,
    bindings: BindingService,
    ledger: QuotaLedger,
    rng: Mutex<StdRng>,
}

impl CheckInService {
    pub fn new(config: Arc<BotConfig>, bindings: BindingService, ledger: QuotaLedger) -> Self {
        Self::with_rng(config, bindings, ledger, StdRng::from_entropy())
    }

    pub fn with_rng(
        config: Arc<BotConfig>,
        bindings: BindingService,
        ledger: QuotaLedger,
        rng: StdRng,
    ) -> Self {
        Self {
            config,
            bindings,
            ledger,
            rng: Mutex::new(rng),
        }
    }

    pub async fn check_in(&self, identity: Identity) -> AppResult<CheckInResult> {
        if !self.config.check_in.enabled {
            return Ok(CheckInResult::Disabled);
        }
        let Some(binding) = self.bindings.find_by_identity(identity).await? else {
            return Ok(CheckInResult::NotBound);
        };
        self.check_in_binding(&binding).await
    }

    async fn check_in_binding(&self, binding: &Binding) -> AppResult<CheckInResult> {
        // Postgres keeps microseconds; the release below compares the stamp exactly.
        let now = Utc::now().trunc_subsecs(6);
        let offset = self.config.timezone_offset_hours;
        if checked_in_today(binding.last_check_in_at, now, offset) {
            return Ok(CheckInResult::AlreadyCheckedIn);
        }
        let claimed = self
            .bindings
            .claim_check_in(binding.identity, local_day_start(now, offset), now)
            .await?;
        if !claimed {
            debug!(identity = %binding.identity, "check-in already claimed concurrently");
            return Ok(CheckInResult::AlreadyCheckedIn);
        }

        let is_first = binding.last_check_in_at.is_none();
        let (added, is_doubled) = {
            let mut rng = self.rng.lock().await;
            roll_reward(&self.config, is_first, &mut *rng)
        };

        let balance = match self.ledger.adjust(binding.account_id, added).await {
            Ok(balance) => balance,
            Err(err) => {
                // Hand the day back so the member can retry.
                if let Err(release_err) = self
                    .bindings
                    .release_check_in(binding.identity, now, binding.last_check_in_at)
                    .await
                {
                    error!(
                        ?release_err,
                        identity = %binding.identity,
                        "failed to release check-in claim after credit failure",
                    );
                }
                return Err(err);
            }
        };
        info!(
            identity = %binding.identity,
            account_id = %binding.account_id,
            added,
            is_first,
            is_doubled,
            "check-in rewarded"
        );

        Ok(CheckInResult::Rewarded(CheckInReward {
            account_id: binding.account_id,
            is_first,
            is_doubled,
            added,
            balance,
        }))
    }
}
