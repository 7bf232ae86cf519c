//! Storage contracts for bindings and the heist log, with Postgres and in-memory backends.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::error::AppResult;
use crate::models::{AccountId, Binding, HeistLogEntry, Identity, NewHeistLogEntry};

pub use memory::MemoryStore;
pub use postgres::PgStore;

/// key: binding-store -> persisted identity/account pairs
#[async_trait]
pub trait BindingStore: Send + Sync {
    /// Fails with `AppError::AlreadyBound` when either key is taken.
    async fn insert_binding(&self, identity: Identity, account_id: AccountId)
        -> AppResult<Binding>;
    async fn find_by_identity(&self, identity: Identity) -> AppResult<Option<Binding>>;
    async fn find_by_account(&self, account_id: AccountId) -> AppResult<Option<Binding>>;
    /// Returns the deleted row, if there was one.
    async fn delete_by_account(&self, account_id: AccountId) -> AppResult<Option<Binding>>;
    async fn delete_by_identity(&self, identity: Identity) -> AppResult<Option<Binding>>;
    async fn set_check_in(&self, identity: Identity, at: DateTime<Utc>) -> AppResult<bool>;
    /// Stamps `at` only when the last check-in is missing or older than `day_start`.
    /// `false` means the day was already claimed or the identity is unbound.
    async fn claim_check_in(
        &self,
        identity: Identity,
        day_start: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> AppResult<bool>;
    /// Puts `previous` back if the stamp is still the one written by the claim at `claimed_at`.
    async fn release_check_in(
        &self,
        identity: Identity,
        claimed_at: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
    ) -> AppResult<()>;
}

/// key: heist-log-store -> append-only outcome log
#[async_trait]
pub trait HeistLogStore: Send + Sync {
    async fn append_heist(&self, entry: NewHeistLogEntry) -> AppResult<HeistLogEntry>;
    async fn count_attempts_since(&self, actor: Identity, since: DateTime<Utc>) -> AppResult<i64>;
    /// Successful or critical heists suffered by `target` since `since`.
    async fn count_losses_since(&self, target: AccountId, since: DateTime<Utc>)
        -> AppResult<i64>;
}
