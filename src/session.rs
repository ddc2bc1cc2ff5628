//! Authentication attempts, brute-force lockout and session expiry.

use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::{ceil_secs, EngineError, Result};
use crate::remote::{Credential, VaultService};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct LockoutPolicy {
    pub threshold: u32,
    pub duration: Duration,
}

impl Default for LockoutPolicy {
    fn default() -> Self {
        Self {
            threshold: 5,
            duration: Duration::minutes(30),
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "state", rename_all = "kebab-case")]
pub enum AuthState {
    Unauthenticated,
    #[serde(rename_all = "camelCase")]
    Locked { until: DateTime<Utc> },
    #[serde(rename_all = "camelCase")]
    Authenticated { remaining_secs: u64 },
}

/// Why the guard left the authenticated state on its own.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SessionEnd {
    /// Countdown reached zero locally.
    Expired,
    /// The service reported the session as gone.
    RevokedRemotely,
}

/// Published view of the guard for the UI layer.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthSnapshot {
    pub state: AuthState,
    pub failed_attempts: u32,
    pub lockout_remaining_secs: Option<i64>,
}

impl Default for AuthSnapshot {
    fn default() -> Self {
        Self {
            state: AuthState::Unauthenticated,
            failed_attempts: 0,
            lockout_remaining_secs: None,
        }
    }
}

pub struct AuthSessionGuard<C: Clock> {
    clock: C,
    policy: LockoutPolicy,
    fallback_ttl: u64,
    failed_attempts: u32,
    last_failure: Option<DateTime<Utc>>,
    lockout_until: Option<DateTime<Utc>>,
    /// Local countdown while authenticated.
    remaining: Option<StdDuration>,
    last_remote_remaining: Option<u64>,
}

impl<C: Clock> AuthSessionGuard<C> {
    pub fn new(clock: C, policy: LockoutPolicy, fallback_ttl: u64) -> Self {
        Self {
            clock,
            policy,
            fallback_ttl,
            failed_attempts: 0,
            last_failure: None,
            lockout_until: None,
            remaining: None,
            last_remote_remaining: None,
        }
    }

    /// Current state, with an expired lockout reported as unauthenticated.
    pub fn state(&self) -> AuthState {
        if let Some(remaining) = self.remaining {
            return AuthState::Authenticated {
                remaining_secs: remaining_secs(remaining),
            };
        }
        match self.lockout_until {
            Some(until) if self.clock.now() < until => AuthState::Locked { until },
            _ => AuthState::Unauthenticated,
        }
    }

    pub fn is_authenticated(&self) -> bool {
        self.remaining.is_some()
    }

    pub fn failed_attempts(&self) -> u32 {
        self.failed_attempts
    }

    pub fn last_failure(&self) -> Option<DateTime<Utc>> {
        self.last_failure
    }

    pub fn lockout_remaining(&self) -> Option<Duration> {
        let until = self.lockout_until?;
        let left = until - self.clock.now();
        (left > Duration::zero()).then_some(left)
    }

    pub fn snapshot(&self) -> AuthSnapshot {
        AuthSnapshot {
            state: self.state(),
            failed_attempts: self.failed_attempts,
            lockout_remaining_secs: self.lockout_remaining().map(ceil_secs),
        }
    }

    pub async fn authenticate<R: VaultService>(
        &mut self,
        remote: &R,
        credential: &Credential,
    ) -> Result<AuthState> {
        if let Some(remaining) = self.lockout_remaining() {
            debug!(remaining_secs = remaining.num_seconds(), "attempt rejected during lockout");
            return Err(EngineError::AuthLocked { remaining });
        }
        if self.lockout_until.take().is_some() {
            info!("lockout window elapsed, attempt counter reset");
            self.failed_attempts = 0;
        }

        let already_authenticated = self.is_authenticated();
        let accepted = if credential.is_blank() {
            false
        } else {
            remote
                .authenticate(credential)
                .await
                .map_err(|err| EngineError::remote("authenticate", err))?
        };

        if accepted {
            self.failed_attempts = 0;
            self.last_failure = None;
            let ttl = match remote.remaining_session().await {
                Ok(secs) => {
                    self.last_remote_remaining = Some(secs);
                    secs
                }
                Err(err) => {
                    warn!("could not read session ttl after login, using default: {err}");
                    self.last_remote_remaining = None;
                    self.fallback_ttl
                }
            };
            if ttl == 0 {
                self.end_session();
                warn!("service granted an already expired session");
                return Ok(self.state());
            }
            self.remaining = Some(StdDuration::from_secs(ttl));
            info!(ttl, "authenticated");
            return Ok(self.state());
        }

        // A failed re-check leaves the live session and the counter alone.
        if already_authenticated {
            debug!("re-authentication rejected, session kept");
            return Err(EngineError::AuthRejected {
                attempts_remaining: self.policy.threshold.saturating_sub(self.failed_attempts),
            });
        }

        let now = self.clock.now();
        self.failed_attempts += 1;
        self.last_failure = Some(now);
        if self.failed_attempts >= self.policy.threshold {
            let until = now + self.policy.duration;
            self.lockout_until = Some(until);
            warn!(attempts = self.failed_attempts, %until, "too many failed attempts, locking");
        } else {
            debug!(attempts = self.failed_attempts, "authentication rejected");
        }
        Err(EngineError::AuthRejected {
            attempts_remaining: self.policy.threshold.saturating_sub(self.failed_attempts),
        })
    }

    /// Counts `elapsed` off the local countdown. Reaching zero forces a logout.
    pub fn tick(&mut self, elapsed: StdDuration) -> Option<SessionEnd> {
        let remaining = self.remaining.as_mut()?;
        *remaining = remaining.saturating_sub(elapsed);
        if remaining.is_zero() {
            self.end_session();
            info!("session expired");
            return Some(SessionEnd::Expired);
        }
        None
    }

    /// Pulls the authoritative remaining time. The merged value is never larger
    /// than what the service just reported, nor than the local countdown.
    pub async fn reconcile<R: VaultService>(&mut self, remote: &R) -> Result<Option<SessionEnd>> {
        if self.remaining.is_none() {
            return Ok(None);
        }
        let reported = remote
            .remaining_session()
            .await
            .map_err(|err| EngineError::remote("get-remaining-session", err))?;
        self.last_remote_remaining = Some(reported);

        // Logged out or expired while the request was in flight.
        let Some(local) = self.remaining else {
            return Ok(None);
        };
        let merged = local.min(StdDuration::from_secs(reported));
        if merged != local {
            debug!(
                local_ms = local.as_millis() as u64,
                reported,
                "session countdown shortened by reconciliation"
            );
        }
        if merged.is_zero() {
            self.end_session();
            info!("session ended by the vault service");
            return Ok(Some(SessionEnd::RevokedRemotely));
        }
        self.remaining = Some(merged);
        Ok(None)
    }

    pub fn last_remote_remaining(&self) -> Option<u64> {
        self.last_remote_remaining
    }

    /// Always ends the local session, whatever the service answers.
    pub async fn logout<R: VaultService>(&mut self, remote: &R) {
        if let Err(err) = remote.logout().await {
            warn!("remote logout failed, session cleared locally: {err}");
        }
        self.end_session();
        info!("logged out");
    }

    fn end_session(&mut self) {
        self.remaining = None;
        self.last_remote_remaining = None;
    }
}

/// Whole seconds left, rounded up so a live session never reads as zero.
fn remaining_secs(remaining: StdDuration) -> u64 {
    let secs = remaining.as_secs();
    if remaining.subsec_nanos() > 0 {
        secs + 1
    } else {
        secs
    }
}
