use chrono::{DateTime, Utc};
use dashmap::DashMap;
use serde_json::json;
use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;

use crate::errors::ApiError;
use crate::services::credential::Credential;
use crate::services::logger::Logger;

#[derive(Clone, PartialEq, Eq)]
pub struct Token {
    value: String,
    scope: String,
    expires_at: DateTime<Utc>,
}

impl Token {
    pub fn new(value: impl Into<String>, scope: impl Into<String>, expires_at: DateTime<Utc>) -> Self {
        Self {
            value: value.into(),
            scope: scope.into(),
            expires_at,
        }
    }

    pub fn value(&self) -> &str {
        &self.value
    }

    pub fn scope(&self) -> &str {
        &self.scope
    }

    pub fn expires_at(&self) -> DateTime<Utc> {
        self.expires_at
    }

    pub fn is_fresh(&self, now: DateTime<Utc>, skew: chrono::Duration) -> bool {
        self.expires_at
            .checked_sub_signed(skew)
            .map_or(false, |edge| now < edge)
    }
}

impl fmt::Debug for Token {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Token")
            .field("value", &"[REDACTED]")
            .field("scope", &self.scope)
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

#[derive(Default)]
struct SlotState {
    token: Option<Token>,
    failure: Option<ApiError>,
}

/// `generation` advances after every completed mint. A caller that saw an
/// older generation before taking the lock queued behind that mint and takes
/// its outcome, failure included.
#[derive(Default)]
struct Slot {
    generation: AtomicU64,
    state: Mutex<SlotState>,
}

pub struct TokenCache {
    credential: Arc<dyn Credential>,
    skew: chrono::Duration,
    slots: DashMap<String, Arc<Slot>>,
    mints: AtomicU64,
    logger: Logger,
}

impl TokenCache {
    pub fn new(credential: Arc<dyn Credential>, skew: chrono::Duration, logger: Logger) -> Self {
        Self {
            credential,
            skew,
            slots: DashMap::new(),
            mints: AtomicU64::new(0),
            logger: logger.child("tokens"),
        }
    }

    fn slot(&self, scope: &str) -> Arc<Slot> {
        self.slots.entry(scope.to_string()).or_default().clone()
    }

    pub async fn get_token(&self, scope: &str) -> Result<Token, ApiError> {
        let slot = self.slot(scope);
        let seen = slot.generation.load(Ordering::Acquire);
        let mut state = slot.state.lock().await;
        if let Some(token) = state.token.as_ref() {
            if token.is_fresh(Utc::now(), self.skew) {
                return Ok(token.clone());
            }
        }
        if let Some(err) = shared_failure(&slot, seen, &state) {
            return Err(err);
        }
        self.mint_into(scope, &slot, &mut state).await
    }

    /// Replaces `stale` with a newly minted token. When another caller has
    /// already swapped it out, that replacement is returned instead.
    pub async fn refresh(&self, scope: &str, stale: &Token) -> Result<Token, ApiError> {
        let slot = self.slot(scope);
        let seen = slot.generation.load(Ordering::Acquire);
        let mut state = slot.state.lock().await;
        if let Some(current) = state.token.as_ref() {
            if current.value != stale.value && current.is_fresh(Utc::now(), self.skew) {
                return Ok(current.clone());
            }
        }
        if let Some(err) = shared_failure(&slot, seen, &state) {
            return Err(err);
        }
        self.mint_into(scope, &slot, &mut state).await
    }

    async fn mint_into(&self, scope: &str, slot: &Slot, state: &mut SlotState) -> Result<Token, ApiError> {
        let result = self.mint(scope).await;
        match &result {
            Ok(token) => {
                state.token = Some(token.clone());
                state.failure = None;
            }
            Err(err) => state.failure = Some(err.clone()),
        }
        slot.generation.fetch_add(1, Ordering::Release);
        result
    }

    pub fn mint_count(&self) -> u64 {
        self.mints.load(Ordering::Relaxed)
    }

    async fn mint(&self, scope: &str) -> Result<Token, ApiError> {
        self.mints.fetch_add(1, Ordering::Relaxed);
        self.logger.debug(
            "Minting token",
            Some(&json!({"scope": scope, "credential": self.credential.kind().as_str()})),
        );
        match self.credential.mint(scope).await {
            Ok(token) => {
                self.logger.debug(
                    "Token minted",
                    Some(&json!({"scope": scope, "expires_at": token.expires_at.to_rfc3339()})),
                );
                Ok(token)
            }
            Err(err) => {
                self.logger.warn(
                    "Token mint failed",
                    Some(&json!({"scope": scope, "error": err.to_string()})),
                );
                Err(err)
            }
        }
    }
}

fn shared_failure(slot: &Slot, seen: u64, state: &SlotState) -> Option<ApiError> {
    if slot.generation.load(Ordering::Acquire) == seen {
        return None;
    }
    state.failure.clone()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn freshness_honours_skew() {
        let now = Utc::now();
        let token = Token::new("t", "s", now + chrono::Duration::seconds(100));
        assert!(token.is_fresh(now, chrono::Duration::seconds(60)));
        assert!(!token.is_fresh(now, chrono::Duration::seconds(120)));
    }

    #[test]
    fn huge_skew_never_counts_as_fresh() {
        let token = Token::new("t", "s", Utc::now() + chrono::Duration::seconds(100));
        assert!(!token.is_fresh(Utc::now(), chrono::Duration::days(365 * 300_000)));
    }

    #[test]
    fn debug_hides_token_value() {
        let token = Token::new("eyJsecretvalue", "s", Utc::now());
        assert!(!format!("{:?}", token).contains("eyJsecretvalue"));
    }
}
