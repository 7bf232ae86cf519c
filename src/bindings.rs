use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{info, warn};

use crate::error::{AppError, AppResult};
use crate::models::{AccountId, Binding, Identity};
use crate::store::BindingStore;

/// Key accepted by [`BindingService::lookup`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LookupKey {
    Identity(Identity),
    Account(AccountId),
    /// Admin smart query: tried as an account id first, then as an identity.
    Either(i64),
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum KeyKind {
    Identity,
    Account,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ResolvedBinding {
    pub matched: KeyKind,
    pub binding: Binding,
}

/// key: binding-service -> bind/unbind/lookup/check-in stamp
#[derive(Clone)]
pub struct BindingService {
    store: Arc<dyn BindingStore>,
}

impl BindingService {
    pub fn new(store: Arc<dyn BindingStore>) -> Self {
        Self { store }
    }

    pub async fn bind(&self, identity: Identity, account_id: AccountId) -> AppResult<Binding> {
        match self.store.insert_binding(identity, account_id).await {
            Ok(binding) => {
                info!(%identity, %account_id, "binding created");
                Ok(binding)
            }
            Err(AppError::AlreadyBound) => {
                warn!(%identity, %account_id, "bind rejected, identity or account already bound");
                Err(AppError::AlreadyBound)
            }
            Err(err) => Err(err),
        }
    }

    pub async fn unbind(&self, account_id: AccountId) -> AppResult<Binding> {
        let binding = self
            .store
            .delete_by_account(account_id)
            .await?
            .ok_or(AppError::NotFound)?;
        info!(identity = %binding.identity, %account_id, "binding removed");
        Ok(binding)
    }

    /// Removes the binding of `identity` when it exists. Used to undo a bind whose
    /// website promotion failed.
    pub async fn discard(&self, identity: Identity) -> AppResult<Option<Binding>> {
        self.store.delete_by_identity(identity).await
    }

    pub async fn lookup(&self, key: LookupKey) -> AppResult<ResolvedBinding> {
        let resolved = match key {
            LookupKey::Identity(identity) => self
                .store
                .find_by_identity(identity)
                .await?
                .map(|binding| (KeyKind::Identity, binding)),
            LookupKey::Account(account_id) => self
                .store
                .find_by_account(account_id)
                .await?
                .map(|binding| (KeyKind::Account, binding)),
            LookupKey::Either(raw) => match self.store.find_by_account(AccountId(raw)).await? {
                Some(binding) => Some((KeyKind::Account, binding)),
                None => self
                    .store
                    .find_by_identity(Identity(raw))
                    .await?
                    .map(|binding| (KeyKind::Identity, binding)),
            },
        };

        resolved
            .map(|(matched, binding)| ResolvedBinding { matched, binding })
            .ok_or(AppError::NotFound)
    }

    pub async fn find_by_identity(&self, identity: Identity) -> AppResult<Option<Binding>> {
        self.store.find_by_identity(identity).await
    }

    /// Atomically takes today's check-in for `identity`. `false` when already taken.
    pub async fn claim_check_in(
        &self,
        identity: Identity,
        day_start: DateTime<Utc>,
        at: DateTime<Utc>,
    ) -> AppResult<bool> {
        self.store.claim_check_in(identity, day_start, at).await
    }

    pub async fn release_check_in(
        &self,
        identity: Identity,
        claimed_at: DateTime<Utc>,
        previous: Option<DateTime<Utc>>,
    ) -> AppResult<()> {
        self.store
            .release_check_in(identity, claimed_at, previous)
            .await
    }

    pub async fn touch_check_in(&self, identity: Identity) -> AppResult<()> {
        if self.store.set_check_in(identity, Utc::now()).await? {
            Ok(())
        } else {
            Err(AppError::NotFound)
        }
    }
}
