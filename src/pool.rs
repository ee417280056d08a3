use std::fmt;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use tracing::{debug, info, warn};

use crate::error::ConfigError;

/// Index of a credential inside its pool.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct CredentialId(pub usize);

/// One login in the pool plus its failure bookkeeping.
#[derive(Clone)]
pub struct Credential {
    pub identity: String,
    pub secret: String,
    /// Display handle used in logs.
    pub handle: String,
    pub consecutive_failures: u32,
    pub cooldown_until: Option<DateTime<Utc>>,
    pub last_used: Option<DateTime<Utc>>,
}

impl Credential {
    pub fn new(identity: impl Into<String>, secret: impl Into<String>, handle: impl Into<String>) -> Self {
        Self {
            identity: identity.into(),
            secret: secret.into(),
            handle: handle.into(),
            consecutive_failures: 0,
            cooldown_until: None,
            last_used: None,
        }
    }

    pub fn is_cooling(&self, now: DateTime<Utc>) -> bool {
        self.cooldown_until.is_some_and(|until| until > now)
    }
}

impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("handle", &self.handle)
            .field("identity", &self.identity)
            .field("secret", &"<redacted>")
            .field("consecutive_failures", &self.consecutive_failures)
            .field("cooldown_until", &self.cooldown_until)
            .field("last_used", &self.last_used)
            .finish()
    }
}

/// Exponential cooldown: `min(cap, base * 2^(failures - 1))`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CooldownPolicy {
    pub base: Duration,
    pub cap: Duration,
}

impl CooldownPolicy {
    pub fn cooldown_for(&self, failures: u32) -> Duration {
        if failures == 0 {
            return Duration::ZERO;
        }
        2u32.checked_pow(failures - 1)
            .and_then(|factor| self.base.checked_mul(factor))
            .map_or(self.cap, |d| d.min(self.cap))
    }
}

/// Rotating pool of credentials with failure-driven cooldowns.
///
/// Owned by a single scheduler; only one in-flight operation uses a credential.
pub struct AccountPool {
    credentials: Vec<Credential>,
    last: Option<usize>,
    policy: CooldownPolicy,
}

impl AccountPool {
    pub fn new(credentials: Vec<Credential>, policy: CooldownPolicy) -> Result<Self, ConfigError> {
        if credentials.is_empty() {
            return Err(ConfigError::NoCredentials);
        }
        info!(
            "Account pool ready with {} credential(s), cooldown base={:?} cap={:?}",
            credentials.len(),
            policy.base,
            policy.cap
        );
        Ok(Self {
            credentials,
            last: None,
            policy,
        })
    }

    pub fn len(&self) -> usize {
        self.credentials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.credentials.is_empty()
    }

    pub fn get(&self, id: CredentialId) -> &Credential {
        &self.credentials[id.0]
    }

    pub fn next(&mut self) -> Option<CredentialId> {
        self.next_at(Utc::now())
    }

    /// Next eligible credential in round-robin order, starting just after the
    /// last one returned. `None` when a full rotation finds all cooling.
    pub fn next_at(&mut self, now: DateTime<Utc>) -> Option<CredentialId> {
        let n = self.credentials.len();
        let start = self.last.map_or(0, |i| (i + 1) % n);
        for offset in 0..n {
            let idx = (start + offset) % n;
            let cred = &self.credentials[idx];
            if cred.is_cooling(now) {
                debug!(credential = %cred.handle, "Skipping cooling credential");
                continue;
            }
            self.last = Some(idx);
            return Some(CredentialId(idx));
        }
        None
    }

    pub fn report_failure(&mut self, id: CredentialId) -> Duration {
        self.report_failure_at(id, Utc::now())
    }

    /// Count a failure and start (or extend) the credential's cooldown.
    /// Returns the cooldown length applied.
    pub fn report_failure_at(&mut self, id: CredentialId, now: DateTime<Utc>) -> Duration {
        let cred = &mut self.credentials[id.0];
        cred.consecutive_failures = cred.consecutive_failures.saturating_add(1);
        let cooldown = self.policy.cooldown_for(cred.consecutive_failures);
        let until = TimeDelta::from_std(cooldown)
            .ok()
            .and_then(|delta| now.checked_add_signed(delta))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
        cred.cooldown_until = Some(cred.cooldown_until.map_or(until, |prev| prev.max(until)));
        warn!(
            credential = %cred.handle,
            failures = cred.consecutive_failures,
            "Credential in cooldown for {} minute(s)",
            cooldown.as_secs() / 60
        );
        cooldown
    }

    pub fn report_success(&mut self, id: CredentialId) {
        self.report_success_at(id, Utc::now());
    }

    /// Reset the failure streak. An unexpired cooldown is left in place.
    pub fn report_success_at(&mut self, id: CredentialId, now: DateTime<Utc>) {
        let cred = &mut self.credentials[id.0];
        cred.consecutive_failures = 0;
        cred.last_used = Some(now);
    }

    /// When the first cooling credential becomes eligible again.
    pub fn earliest_available(&self, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
        self.credentials
            .iter()
            .filter(|c| c.is_cooling(now))
            .filter_map(|c| c.cooldown_until)
            .min()
    }

    /// `(handle, remaining)` for every credential currently cooling.
    pub fn cooling(&self, now: DateTime<Utc>) -> Vec<(String, Duration)> {
        self.credentials
            .iter()
            .filter_map(|c| {
                let until = c.cooldown_until.filter(|u| *u > now)?;
                let remaining = (until - now).to_std().unwrap_or(Duration::ZERO);
                Some((c.handle.clone(), remaining))
            })
            .collect()
    }
}
