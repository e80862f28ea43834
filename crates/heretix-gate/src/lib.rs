//! External collaborator traits the pipeline honors before and after a run:
//! who's asking (`CurrentUserProvider`) and whether they're still within
//! quota (`UsageGate`). Quota/auth/billing themselves are out of scope for
//! this crate; it only defines the seam and ships a no-op default so the
//! pipeline runs standalone without an embedder wiring in a real backend.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum GateError {
    #[error("usage gate backend failed: {0}")]
    Backend(String),
}

/// An authenticated caller, as reported by a [`CurrentUserProvider`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct User {
    pub id: String,
    pub plan: String,
}

/// A caller's remaining quota, as reported by a [`UsageGate`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageState {
    pub checks_allowed: u32,
    pub checks_used: u32,
}

impl UsageState {
    pub fn remaining(&self) -> u32 {
        self.checks_allowed.saturating_sub(self.checks_used)
    }

    pub fn has_quota(&self) -> bool {
        self.checks_used < self.checks_allowed
    }
}

/// Resolves the caller behind a request. A real implementation looks up a
/// session token against an auth service; the default always reports an
/// anonymous caller.
#[async_trait]
pub trait CurrentUserProvider: Send + Sync {
    async fn get_current_user(&self, session_token: Option<&str>) -> Result<Option<User>, GateError>;
}

/// Tracks and enforces a caller's usage quota across runs. A real
/// implementation reads/writes a billing ledger; the default reports
/// unlimited quota and never persists usage.
#[async_trait]
pub trait UsageGate: Send + Sync {
    async fn get_usage_state(&self, session_token: Option<&str>, user: Option<&User>) -> Result<UsageState, GateError>;

    async fn increment_usage(&self, session_token: Option<&str>, user: Option<&User>, state: UsageState) -> Result<u32, GateError>;
}

/// Reports every caller as anonymous. Suitable for standalone operation
/// with no auth backend configured.
pub struct AnonymousUserProvider;

#[async_trait]
impl CurrentUserProvider for AnonymousUserProvider {
    async fn get_current_user(&self, _session_token: Option<&str>) -> Result<Option<User>, GateError> {
        Ok(None)
    }
}

/// Never enforces a quota. Suitable for standalone operation with no
/// billing backend configured.
pub struct UnlimitedUsageGate;

#[async_trait]
impl UsageGate for UnlimitedUsageGate {
    async fn get_usage_state(&self, _session_token: Option<&str>, _user: Option<&User>) -> Result<UsageState, GateError> {
        Ok(UsageState { checks_allowed: u32::MAX, checks_used: 0 })
    }

    async fn increment_usage(&self, _session_token: Option<&str>, _user: Option<&User>, state: UsageState) -> Result<u32, GateError> {
        Ok(state.checks_used.saturating_add(1))
    }
}
