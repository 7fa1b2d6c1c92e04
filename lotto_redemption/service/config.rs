use core::str::FromStr;
use core::time::Duration;
use log::debug;
use lotto_redemption::codec::IssuerKey;
use lotto_redemption::config::Config;
use lotto_redemption::error::{DecodeError, ValidationError};
use lotto_redemption::ledger::DEFAULT_LOCK_SHARDS;
use lotto_redemption::reconciliation::RetryPolicy;

pub const NB_NUMBERS: &str = "LOTTO_NB_NUMBERS";
pub const MIN_NUMBER: &str = "LOTTO_MIN_NUMBER";
pub const MAX_NUMBER: &str = "LOTTO_MAX_NUMBER";
pub const ISSUER_PUBLIC_KEY: &str = "LOTTO_ISSUER_PUBLIC_KEY";
pub const LOCK_SHARDS: &str = "LOTTO_LOCK_SHARDS";
pub const QR_MODULE_SIZE: &str = "LOTTO_QR_MODULE_SIZE";
pub const REPLAY_MAX_ATTEMPTS: &str = "LOTTO_REPLAY_MAX_ATTEMPTS";
pub const REPLAY_BACKOFF_MS: &str = "LOTTO_REPLAY_BACKOFF_MS";

const DEFAULT_QR_MODULE_SIZE: usize = 4;

#[derive(Debug, Eq, PartialEq, Clone)]
pub enum ConfigError {
    MissingVar(&'static str),
    InvalidVar(&'static str),
    Numbers(ValidationError),
    IssuerKey(DecodeError),
}

#[derive(Debug, Clone)]
pub struct ServiceConfig {
    pub numbers: Config,
    pub issuer_key: IssuerKey,
    pub lock_shards: usize,
    pub qr_module_size: usize,
    pub retry: RetryPolicy,
}

fn get_env(key: &str) -> Option<String> {
    match std::env::var(key) {
        Ok(k) => Some(k),
        _ => {
            debug!("Key {key} not found");
            None
        }
    }
}

fn required<T, F>(lookup: &F, key: &'static str) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    let value = lookup(key).ok_or(ConfigError::MissingVar(key))?;
    value.trim().parse().map_err(|_| ConfigError::InvalidVar(key))
}

fn optional<T, F>(lookup: &F, key: &'static str, default: T) -> Result<T, ConfigError>
where
    T: FromStr,
    F: Fn(&str) -> Option<String>,
{
    match lookup(key) {
        None => Ok(default),
        Some(value) => value.trim().parse().map_err(|_| ConfigError::InvalidVar(key)),
    }
}

impl ServiceConfig {
    /// Read the config from the environment, a `.env` file is loaded first if present
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();
        Self::from_lookup(get_env)
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let numbers = Config::new(
            required(&lookup, NB_NUMBERS)?,
            required(&lookup, MIN_NUMBER)?,
            required(&lookup, MAX_NUMBER)?,
        )
        .map_err(ConfigError::Numbers)?;

        let issuer_key = lookup(ISSUER_PUBLIC_KEY).ok_or(ConfigError::MissingVar(ISSUER_PUBLIC_KEY))?;
        let issuer_key = IssuerKey::from_hex(&issuer_key).map_err(ConfigError::IssuerKey)?;

        let default_retry = RetryPolicy::default();
        let backoff_ms: u64 = optional(
            &lookup,
            REPLAY_BACKOFF_MS,
            default_retry.initial_backoff.as_millis() as u64,
        )?;
        let retry = RetryPolicy {
            max_attempts: optional(&lookup, REPLAY_MAX_ATTEMPTS, default_retry.max_attempts)?,
            initial_backoff: Duration::from_millis(backoff_ms),
            max_backoff: default_retry.max_backoff.max(Duration::from_millis(backoff_ms)),
        };
        if retry.max_attempts == 0 {
            return Err(ConfigError::InvalidVar(REPLAY_MAX_ATTEMPTS));
        }

        let lock_shards: usize = optional(&lookup, LOCK_SHARDS, DEFAULT_LOCK_SHARDS)?;
        if lock_shards == 0 {
            return Err(ConfigError::InvalidVar(LOCK_SHARDS));
        }

        let qr_module_size: usize = optional(&lookup, QR_MODULE_SIZE, DEFAULT_QR_MODULE_SIZE)?;
        if qr_module_size == 0 {
            return Err(ConfigError::InvalidVar(QR_MODULE_SIZE));
        }

        Ok(Self {
            numbers,
            issuer_key,
            lock_shards,
            qr_module_size,
            retry,
        })
    }
}
