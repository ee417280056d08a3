use std::collections::HashSet;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::pool::{CooldownPolicy, Credential};
use crate::timing::DelayRange;

/// Default config file path.
pub const CONFIG_PATH: &str = "config.toml";

/// Environment prefix for extra credentials: `MONITOR_IDENTITY_1`, `MONITOR_SECRET_1`, ...
pub const ENV_CREDENTIAL_PREFIX: &str = "MONITOR_";

/// Comma-separated extra targets appended to the watch list.
pub const ENV_EXTRA_TARGETS: &str = "MONITOR_EXTRA_TARGETS";

/// Top-level application config deserialized from `config.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub accounts: Vec<AccountConfig>,
    #[serde(default)]
    pub targets: Vec<String>,
    #[serde(default)]
    pub keywords: Vec<String>,
    #[serde(default)]
    pub settings: SettingsConfig,
    #[serde(default)]
    pub gateway: GatewayConfig,
    #[serde(default)]
    pub publisher: PublisherConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// One login for the account pool.
#[derive(Clone, Serialize, Deserialize)]
pub struct AccountConfig {
    pub identity: String,
    pub secret: String,
    /// Display handle; defaults to the identity.
    #[serde(default)]
    pub handle: Option<String>,
}

impl std::fmt::Debug for AccountConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AccountConfig")
            .field("identity", &self.identity)
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Named bundles of timing settings observed in deployment.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "snake_case")]
pub enum Profile {
    /// Long cooldowns and slow cycles; suited to a large watch list.
    #[default]
    Conservative,
    /// Short cooldowns and fast cycles.
    Rapid,
}

/// Runtime settings. Anything left unset comes from the profile.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SettingsConfig {
    #[serde(default)]
    pub profile: Profile,
    pub cooldown_base_minutes: Option<u64>,
    pub cooldown_cap_minutes: Option<u64>,
    pub poll_interval: Option<DelayRange>,
    pub target_delay: Option<DelayRange>,
    pub reconnect_delay: Option<DelayRange>,
    /// Wait when every credential is cooling, in seconds.
    pub all_cooling_wait_secs: Option<u64>,
    /// Number of most recent items fetched per target.
    pub batch_size: Option<usize>,
    pub publish_timeout_secs: Option<u64>,
    /// Consecutive all-cooling cycles before a cooldown storm is reported.
    pub storm_threshold: Option<u32>,
    pub skip_reposts: Option<bool>,
    /// Override for the contract address regex.
    pub address_pattern: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "default_gateway_url")]
    pub url: String,
    #[serde(default = "default_request_timeout")]
    pub request_timeout_secs: u64,
}

fn default_gateway_url() -> String {
    "http://127.0.0.1:9222".to_string()
}

fn default_request_timeout() -> u64 {
    60
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            url: default_gateway_url(),
            request_timeout_secs: default_request_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublisherConfig {
    #[serde(default = "default_redis_url")]
    pub redis_url: String,
    #[serde(default = "default_topic")]
    pub topic: String,
}

fn default_redis_url() -> String {
    "redis://127.0.0.1:6379".to_string()
}

fn default_topic() -> String {
    "ca".to_string()
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            redis_url: default_redis_url(),
            topic: default_topic(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: String,
}

fn default_store_path() -> String {
    "data/signals.db".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
        }
    }
}

/// Fully resolved scheduler settings.
#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub cooldown: CooldownPolicy,
    pub poll_interval: DelayRange,
    pub target_delay: DelayRange,
    pub reconnect_delay: DelayRange,
    pub all_cooling_wait: Duration,
    pub batch_size: usize,
    pub publish_timeout: Duration,
    pub storm_threshold: u32,
    pub skip_reposts: bool,
    pub address_pattern: Option<String>,
}

impl Profile {
    pub fn settings(self) -> Settings {
        let common = Settings {
            cooldown: CooldownPolicy {
                base: minutes(5),
                cap: minutes(120),
            },
            poll_interval: DelayRange::secs(60, 180),
            target_delay: DelayRange::secs(8, 15),
            reconnect_delay: DelayRange::secs(3, 6),
            all_cooling_wait: Duration::from_secs(300),
            batch_size: 3,
            publish_timeout: Duration::from_secs(10),
            storm_threshold: 3,
            skip_reposts: true,
            address_pattern: None,
        };
        match self {
            Profile::Conservative => common,
            Profile::Rapid => Settings {
                cooldown: CooldownPolicy {
                    base: minutes(1),
                    cap: minutes(5),
                },
                poll_interval: DelayRange::secs(10, 20),
                target_delay: DelayRange::secs(10, 20),
                all_cooling_wait: Duration::from_secs(60),
                ..common
            },
        }
    }
}

fn minutes(m: u64) -> Duration {
    Duration::from_secs(m.saturating_mul(60))
}

fn invalid(name: &'static str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Invalid {
        name,
        reason: reason.into(),
    }
}

impl SettingsConfig {
    /// Overlay explicit settings on the profile and check them.
    pub fn resolve(&self) -> Result<Settings, ConfigError> {
        let base = self.profile.settings();
        let settings = Settings {
            cooldown: CooldownPolicy {
                base: self.cooldown_base_minutes.map_or(base.cooldown.base, minutes),
                cap: self.cooldown_cap_minutes.map_or(base.cooldown.cap, minutes),
            },
            poll_interval: self.poll_interval.unwrap_or(base.poll_interval),
            target_delay: self.target_delay.unwrap_or(base.target_delay),
            reconnect_delay: self.reconnect_delay.unwrap_or(base.reconnect_delay),
            all_cooling_wait: self
                .all_cooling_wait_secs
                .map_or(base.all_cooling_wait, Duration::from_secs),
            batch_size: self.batch_size.unwrap_or(base.batch_size),
            publish_timeout: self
                .publish_timeout_secs
                .map_or(base.publish_timeout, Duration::from_secs),
            storm_threshold: self.storm_threshold.unwrap_or(base.storm_threshold),
            skip_reposts: self.skip_reposts.unwrap_or(base.skip_reposts),
            address_pattern: self.address_pattern.clone(),
        };

        if settings.cooldown.base.is_zero() {
            return Err(invalid("cooldown_base_minutes", "must be positive"));
        }
        if settings.cooldown.base > settings.cooldown.cap {
            return Err(invalid("cooldown_cap_minutes", "must not be below the base"));
        }
        for (name, range) in [
            ("poll_interval", settings.poll_interval),
            ("target_delay", settings.target_delay),
            ("reconnect_delay", settings.reconnect_delay),
        ] {
            if !range.is_valid() {
                return Err(invalid(name, "min_secs exceeds max_secs"));
            }
        }
        if settings.batch_size == 0 {
            return Err(invalid("batch_size", "must be at least 1"));
        }
        if settings.publish_timeout.is_zero() {
            return Err(invalid("publish_timeout_secs", "must be positive"));
        }
        if settings.storm_threshold == 0 {
            return Err(invalid("storm_threshold", "must be at least 1"));
        }
        if let Some(pattern) = &settings.address_pattern {
            regex::Regex::new(pattern).map_err(|e| invalid("address_pattern", e.to_string()))?;
        }
        Ok(settings)
    }
}

impl AppConfig {
    /// Load config from the given TOML file path.
    pub fn load(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        let config: Self = toml::from_str(&contents)
            .with_context(|| format!("failed to parse {}", path.display()))?;
        Ok(config)
    }

    /// Append credentials and targets supplied through the environment.
    pub fn apply_env(&mut self) {
        self.apply_env_from(|key| std::env::var(key).ok());
    }

    /// Like [`apply_env`](Self::apply_env) with an explicit variable lookup.
    pub fn apply_env_from(&mut self, var: impl Fn(&str) -> Option<String>) {
        for n in 1.. {
            let identity = var(&format!("{ENV_CREDENTIAL_PREFIX}IDENTITY_{n}"));
            let secret = var(&format!("{ENV_CREDENTIAL_PREFIX}SECRET_{n}"));
            let (Some(identity), Some(secret)) = (identity, secret) else {
                break;
            };
            let handle = var(&format!("{ENV_CREDENTIAL_PREFIX}HANDLE_{n}"));
            self.accounts.push(AccountConfig {
                identity,
                secret,
                handle,
            });
        }
        if let Some(extra) = var(ENV_EXTRA_TARGETS) {
            self.targets.extend(
                extra
                    .split(',')
                    .map(str::trim)
                    .filter(|t| !t.is_empty())
                    .map(String::from),
            );
        }
    }

    /// Pool credentials in configuration order.
    pub fn credentials(&self) -> Result<Vec<Credential>, ConfigError> {
        if self.accounts.is_empty() {
            return Err(ConfigError::NoCredentials);
        }
        self.accounts
            .iter()
            .map(|a| {
                if a.identity.trim().is_empty() || a.secret.is_empty() {
                    return Err(invalid("accounts", "identity and secret are required"));
                }
                let handle = a
                    .handle
                    .clone()
                    .filter(|h| !h.trim().is_empty())
                    .unwrap_or_else(|| a.identity.clone());
                Ok(Credential::new(a.identity.trim(), a.secret.clone(), handle))
            })
            .collect()
    }

    /// Watch list with a leading `@` stripped and repeats removed, first occurrence kept.
    pub fn targets(&self) -> Result<Vec<String>, ConfigError> {
        let mut seen = HashSet::new();
        let targets: Vec<String> = self
            .targets
            .iter()
            .map(|t| t.trim().trim_start_matches('@').to_string())
            .filter(|t| !t.is_empty())
            .filter(|t| seen.insert(t.to_lowercase()))
            .collect();
        if targets.is_empty() {
            return Err(ConfigError::NoTargets);
        }
        Ok(targets)
    }

    pub fn keywords(&self) -> Result<Vec<String>, ConfigError> {
        if self.keywords.iter().any(|k| k.trim().is_empty()) {
            return Err(invalid("keywords", "blank keyword"));
        }
        Ok(self.keywords.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    const SAMPLE: &str = r#"
        targets = ["@alice", "bob", "alice", "carol"]
        keywords = ["solana", "memecoin"]

        [[accounts]]
        identity = "one@mail.test"
        secret = "pw1"
        handle = "one"

        [[accounts]]
        identity = "two@mail.test"
        secret = "pw2"

        [settings]
        profile = "rapid"
        batch_size = 5
        poll_interval = { min_secs = 30, max_secs = 45 }

        [publisher]
        topic = "signals"
    "#;

    fn parse(s: &str) -> AppConfig {
        toml::from_str(s).unwrap()
    }

    // ── parsing ────────────────────────────────────────────────────

    #[test]
    fn parses_sample() {
        let cfg = parse(SAMPLE);
        let creds = cfg.credentials().unwrap();
        assert_eq!(creds.len(), 2);
        assert_eq!(creds[0].handle, "one");
        assert_eq!(creds[1].handle, "two@mail.test");
        assert_eq!(cfg.targets().unwrap(), vec!["alice", "bob", "carol"]);
        assert_eq!(cfg.publisher.topic, "signals");
        assert_eq!(cfg.publisher.redis_url, "redis://127.0.0.1:6379");
        assert_eq!(cfg.store.path, "data/signals.db");
    }

    #[test]
    fn profile_defaults_with_overrides() {
        let settings = parse(SAMPLE).settings.resolve().unwrap();
        assert_eq!(settings.cooldown.base, Duration::from_secs(60));
        assert_eq!(settings.cooldown.cap, Duration::from_secs(300));
        assert_eq!(settings.all_cooling_wait, Duration::from_secs(60));
        assert_eq!(settings.batch_size, 5);
        assert_eq!(settings.poll_interval, DelayRange::secs(30, 45));
        assert_eq!(settings.publish_timeout, Duration::from_secs(10));
    }

    #[test]
    fn empty_settings_use_conservative_profile() {
        let settings = SettingsConfig::default().resolve().unwrap();
        assert_eq!(settings, Profile::Conservative.settings());
        assert_eq!(settings.cooldown.cap, Duration::from_secs(120 * 60));
        assert_eq!(settings.batch_size, 3);
    }

    // ── validation ─────────────────────────────────────────────────

    #[test]
    fn missing_credentials_is_fatal() {
        let cfg = parse(r#"targets = ["alice"]"#);
        assert!(matches!(cfg.credentials(), Err(ConfigError::NoCredentials)));
    }

    #[test]
    fn missing_targets_is_fatal() {
        let cfg = parse(r#"targets = ["  ", "@"]"#);
        assert!(matches!(cfg.targets(), Err(ConfigError::NoTargets)));
    }

    #[test]
    fn rejects_inverted_ranges_and_zero_values() {
        let mut s = SettingsConfig {
            target_delay: Some(DelayRange::secs(20, 10)),
            ..Default::default()
        };
        assert!(matches!(s.resolve(), Err(ConfigError::Invalid { name: "target_delay", .. })));

        s.target_delay = None;
        s.batch_size = Some(0);
        assert!(matches!(s.resolve(), Err(ConfigError::Invalid { name: "batch_size", .. })));

        s.batch_size = None;
        s.cooldown_base_minutes = Some(10);
        s.cooldown_cap_minutes = Some(5);
        assert!(s.resolve().is_err());

        s.cooldown_cap_minutes = None;
        s.address_pattern = Some("[unclosed".into());
        assert!(matches!(s.resolve(), Err(ConfigError::Invalid { name: "address_pattern", .. })));
    }

    #[test]
    fn blank_keyword_rejected() {
        let cfg = parse(r#"keywords = ["ok", " "]"#);
        assert!(cfg.keywords().is_err());
    }

    // ── environment ────────────────────────────────────────────────

    #[test]
    fn env_adds_credentials_until_gap() {
        let vars: HashMap<&str, &str> = HashMap::from([
            ("MONITOR_IDENTITY_1", "env1@mail"),
            ("MONITOR_SECRET_1", "s1"),
            ("MONITOR_HANDLE_1", "env1"),
            ("MONITOR_IDENTITY_2", "env2@mail"),
            ("MONITOR_SECRET_2", "s2"),
            // gap at 3
            ("MONITOR_IDENTITY_4", "env4@mail"),
            ("MONITOR_SECRET_4", "s4"),
            ("MONITOR_EXTRA_TARGETS", "dave, ,@erin"),
        ]);
        let mut cfg = parse(r#"targets = ["alice"]"#);
        cfg.apply_env_from(|k| vars.get(k).map(|v| v.to_string()));

        let creds = cfg.credentials().unwrap();
        assert_eq!(creds.len(), 2);
        assert_eq!(creds[0].handle, "env1");
        assert_eq!(creds[1].handle, "env2@mail");
        assert_eq!(cfg.targets().unwrap(), vec!["alice", "dave", "erin"]);
    }

    #[test]
    fn debug_hides_secret() {
        let cfg = parse(SAMPLE);
        assert!(!format!("{cfg:?}").contains("pw1"));
    }

    #[test]
    fn example_config_is_valid() {
        let cfg = parse(include_str!("../config.example.toml"));
        assert_eq!(cfg.settings.resolve().unwrap(), Profile::Conservative.settings());
        assert_eq!(cfg.targets().unwrap(), vec!["someone", "another_account"]);
        assert_eq!(cfg.credentials().unwrap().len(), 1);
        assert_eq!(cfg.publisher.topic, "ca");
    }
}
