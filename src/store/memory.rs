use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;

use super::{BindingStore, HeistLogStore};
use crate::error::{AppError, AppResult};
use crate::models::{AccountId, Binding, HeistLogEntry, Identity, NewHeistLogEntry};

/// key: store-memory -> in-process backend for local runs and tests
#[derive(Default)]
pub struct MemoryStore {
    state: Mutex<MemoryState>,
}

#[derive(Default)]
struct MemoryState {
    next_binding_id: i64,
    bindings: HashMap<Identity, Binding>,
    heists: Vec<HeistLogEntry>,
}

impl MemoryState {
    fn by_account(&self, account_id: AccountId) -> Option<&Binding> {
        self.bindings
            .values()
            .find(|binding| binding.account_id == account_id)
    }
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn heist_log(&self) -> Vec<HeistLogEntry> {
        self.state.lock().await.heists.clone()
    }

    pub async fn binding_count(&self) -> usize {
        self.state.lock().await.bindings.len()
    }
}

#[async_trait]
impl BindingStore for MemoryStore {
    async fn insert_binding(
        &self,
        identity: Identity,
        account_id: AccountId,
    ) -> AppResult<Binding> {
        let mut state = self.state.lock().await;
        if state.bindings.contains_key(&identity) || state.by_account(account_id).is_some() {
            return Err(AppError::AlreadyBound);
        }
        state.next_binding_id += 1;
        let binding = Binding {
            id: state.next_binding_id,
            identity,
            account_id,
            created_at: Utc::now(),
            last_check_in_at: None,
        };
        state.bindings.insert(identity, binding.clone());
        Ok(binding)
    }

    async fn find_by_identity(&self, identity: Identity) -> AppResult<Option<Binding>> {
        Ok(self.state.lock().await.bindings.get(&identity).cloned())
    }

    async fn find_by_account(&self, account_id: AccountId) -> AppResult<Option<Binding>> {
        Ok(self.state.lock().await.by_account(account_id).cloned())
    }

    async fn delete_by_account(&self, account_id: AccountId) -> AppResult<Option<Binding>> {
        let mut state = self.state.lock().await;
        let identity = state.by_account(account_id).map(|binding| binding.identity);
        Ok(identity.and_then(|identity| state.bindings.remove(&identity)))
    }

    async fn delete_by_identity(&self, identity: Identity) -> AppResult<Option<Binding>> {
        Ok(self.state.lock().await.bindings.remove(&identity))
    }

    async fn set_check_in(&self, identity: Identity, at: DateTime<Utc>) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        match state.bindings.get_mut(&identity) {
            Some(binding) => {
                binding.last_check_in_at = Some(at);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn claim_check_in(
        &self,
        identity: Identity,
        day_start: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> AppResult<bool> {
        let mut state = self.state.lock().await;
        let Some(binding) = state.bindings.get_mut(&identity) else {
            return Ok(false);
        };
        if binding.last_check_in_at.map_or(false, |last| last >= day_start) {
            return Ok(false);
        }
        binding.last_check_in_at = Some(at);
        Ok(true)
    }

    async fn release_check_in(
        &self,
        identity: Identity,
        claimed_at: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        let mut state = self.state.lock().await;
        if let Some(binding) = state.bindings.get_mut(&identity) {
            if binding.last_check_in_at == Some(claimed_at) {
                binding.last_check_in_at = previous;
            }
        }
        Ok(())
    }
}

#[async_trait]
impl HeistLogStore for MemoryStore {
    async fn append_heist(&self, entry: NewHeistLogEntry) -> AppResult<HeistLogEntry> {
        let mut state = self.state.lock().await;
        let record = HeistLogEntry {
            id: state.heists.len() as i64 + 1,
            actor_identity: entry.actor_identity,
            target_account_id: entry.target_account_id,
            occurred_at: entry.occurred_at,
            outcome: entry.outcome,
            amount: entry.amount,
        };
        state.heists.push(record.clone());
        Ok(record)
    }

    async fn count_attempts_since(&self, actor: Identity, since: DateTime<Utc>) -> AppResult<i64> {
        let state = self.state.lock().await;
        Ok(state
            .heists
            .iter()
            .filter(|entry| entry.actor_identity == actor && entry.occurred_at >= since)
            .count() as i64)
    }

    async fn count_losses_since(
        &self,
        target: AccountId,
        since: DateTime<Utc>,
    ) -> AppResult<i64> {
        let state = self.state.lock().await;
        Ok(state
            .heists
            .iter()
            .filter(|entry| {
                entry.target_account_id == target
                    && entry.occurred_at >= since
                    && entry.outcome.is_gain()
            })
            .count() as i64)
    }
}
