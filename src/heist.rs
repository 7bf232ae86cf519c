use std::sync::Arc;

use chrono::Utc;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::bindings::{BindingService, LookupKey};
use crate::config::{BotConfig, HeistSettings};
use crate::error::{AppError, AppResult};
use crate::ledger::QuotaLedger;
use crate::models::{AccountId, HeistLogEntry, HeistOutcome, Identity};
use crate::window::local_day_start;

/// Why a heist did not run, or what happened when it did.
#[derive(Clone, Debug, PartialEq)]
pub enum HeistResult {
    Disabled,
    ActorNotBound,
    TargetNotFound,
    SelfTarget,
    AttemptsExceeded,
    DefensesExceeded { target: AccountId },
    Executed(HeistReport),
}

#[derive(Clone, Debug, PartialEq)]
pub struct HeistReport {
    pub outcome: HeistOutcome,
    /// Raw quota gained by the actor; negative for a paid penalty.
    pub amount: i64,
    pub entry: HeistLogEntry,
}

/// Maps one uniform roll onto the configured FAILURE | SUCCESS | CRITICAL bands.
pub fn draw_outcome<R: Rng + ?Sized>(settings: &HeistSettings, rng: &mut R) -> HeistOutcome {
    let roll: f64 = rng.gen();
    if roll < settings.failure_probability {
        HeistOutcome::Failure
    } else if roll < settings.failure_probability + settings.success_probability {
        HeistOutcome::Success
    } else {
        HeistOutcome::Critical
    }
}

/// Raw quota taken from a target holding `target_balance`.
pub fn gain_for(config: &BotConfig, outcome: HeistOutcome, target_balance: i64) -> i64 {
    let settings = &config.heist;
    let fraction = match outcome {
        HeistOutcome::Failure => return 0,
        HeistOutcome::Success => settings.success_fraction,
        HeistOutcome::Critical => settings.success_fraction * settings.critical_multiplier,
    }
    .min(1.0);

    let gain = (target_balance.max(0) as f64 * fraction).floor() as i64;
    match settings.max_gain {
        Some(max) => gain.min(config.to_raw_quota(max)),
        None => gain,
    }
}

/// key: heist-service -> gated, randomized transfer between two bound accounts
pub struct HeistService {
    config: Arc<BotConfig>,
    bindings: BindingService,
    ledger: QuotaLedger,
    rng: Mutex<StdRng>,
}

impl HeistService {
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

    pub async fn execute(&self, actor: Identity, target: LookupKey) -> AppResult<HeistResult> {
        let settings = &self.config.heist;
        if !settings.enabled {
            return Ok(HeistResult::Disabled);
        }

        let Some(actor_binding) = self.bindings.find_by_identity(actor).await? else {
            return Ok(HeistResult::ActorNotBound);
        };
        let target_binding = match self.bindings.lookup(target).await {
            Ok(resolved) => resolved.binding,
            Err(AppError::NotFound) => return Ok(HeistResult::TargetNotFound),
            Err(err) => return Err(err),
        };
        let actor_account = actor_binding.account_id;
        let target_account = target_binding.account_id;
        if actor_account == target_account {
            return Ok(HeistResult::SelfTarget);
        }

        let since = local_day_start(Utc::now(), self.config.timezone_offset_hours);
        let log = self.ledger.heist_log();
        if log.count_attempts_since(actor, since).await? >= settings.max_attempts_per_day {
            return Ok(HeistResult::AttemptsExceeded);
        }
        if log.count_losses_since(target_account, since).await? >= settings.max_defenses_per_day {
            return Ok(HeistResult::DefensesExceeded {
                target: target_account,
            });
        }

        let outcome = {
            let mut rng = self.rng.lock().await;
            draw_outcome(settings, &mut *rng)
        };
        debug!(%actor, %target_account, ?outcome, "heist outcome drawn");

        let amount = match outcome {
            HeistOutcome::Success | HeistOutcome::Critical => {
                let balance = self.ledger.balance(target_account).await?;
                let gain = gain_for(&self.config, outcome, balance);
                self.ledger
                    .transfer(target_account, actor_account, gain)
                    .await?
            }
            HeistOutcome::Failure => {
                let penalty = self.config.to_raw_quota(settings.failure_penalty);
                if penalty > 0 {
                    let available = self.ledger.balance(actor_account).await?;
                    -self
                        .ledger
                        .transfer(actor_account, target_account, penalty.min(available))
                        .await?
                } else {
                    0
                }
            }
        };

        let entry = self
            .ledger
            .record_heist(actor, target_account, outcome, amount)
            .await?;
        info!(
            %actor,
            %target_account,
            outcome = outcome.as_str(),
            amount,
            "heist executed"
        );

        Ok(HeistResult::Executed(HeistReport {
            outcome,
            amount,
            entry,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(failure: f64, success: f64, critical: f64) -> HeistSettings {
        HeistSettings {
            failure_probability: failure,
            success_probability: success,
            critical_probability: critical,
            ..HeistSettings::default()
        }
    }

    #[test]
    fn outcome_frequencies_follow_configuration() {
        let settings = settings(0.5, 0.3, 0.2);
        let mut rng = StdRng::seed_from_u64(7);
        let trials = 20_000;
        let mut counts = [0usize; 3];
        for _ in 0..trials {
            match draw_outcome(&settings, &mut rng) {
                HeistOutcome::Failure => counts[0] += 1,
                HeistOutcome::Success => counts[1] += 1,
                HeistOutcome::Critical => counts[2] += 1,
            }
        }
        for (count, expected) in counts.iter().zip([0.5, 0.3, 0.2]) {
            let observed = *count as f64 / trials as f64;
            assert!(
                (observed - expected).abs() < 0.02,
                "observed {observed} expected {expected}"
            );
        }
    }

    #[test]
    fn degenerate_distribution_always_fails() {
        let settings = settings(1.0, 0.0, 0.0);
        let mut rng = StdRng::seed_from_u64(1);
        assert!((0..500).all(|_| draw_outcome(&settings, &mut rng) == HeistOutcome::Failure));
    }

    #[test]
    fn critical_gain_is_amplified_and_capped() {
        let mut config = BotConfig::default();
        config.binding.quota_display_ratio = 1;
        config.heist.success_fraction = 0.1;
        config.heist.critical_multiplier = 3.0;
        config.heist.max_gain = None;

        assert_eq!(gain_for(&config, HeistOutcome::Success, 1_000), 100);
        assert_eq!(gain_for(&config, HeistOutcome::Critical, 1_000), 300);
        assert_eq!(gain_for(&config, HeistOutcome::Failure, 1_000), 0);

        config.heist.max_gain = Some(250.0);
        assert_eq!(gain_for(&config, HeistOutcome::Critical, 1_000), 250);

        config.heist.critical_multiplier = 50.0;
        config.heist.max_gain = None;
        assert_eq!(gain_for(&config, HeistOutcome::Critical, 1_000), 1_000);
    }
}
