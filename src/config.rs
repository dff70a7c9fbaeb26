//! Configuration, built from environment variables.
//!
//! Every config has a `from_env()` constructor plus a `from_vars()` variant
//! that takes a lookup function, so parsing can be tested without touching
//! the process environment.

use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use secrecy::{ExposeSecret, SecretString};

use crate::error::ConfigError;

/// Variable lookup used by every `from_vars`.
pub type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

/// Lookup against the process environment. Empty values count as unset.
pub fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn parse_or<T: FromStr>(vars: Lookup<'_>, key: &str, default: T) -> Result<T, ConfigError>
where
    T::Err: std::fmt::Display,
{
    match vars(key) {
        None => Ok(default),
        Some(raw) => raw.trim().parse().map_err(|e: T::Err| ConfigError::InvalidValue {
            key: key.to_string(),
            message: format!("{raw:?}: {e}"),
        }),
    }
}

fn split_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
        .collect()
}

// ── SMTP ────────────────────────────────────────────────────────────

/// Outbound SMTP settings.
#[derive(Debug)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: SecretString,
    pub from_address: String,
}

impl Clone for SmtpConfig {
    fn clone(&self) -> Self {
        Self {
            host: self.host.clone(),
            port: self.port,
            username: self.username.clone(),
            password: SecretString::from(self.password.expose_secret()),
            from_address: self.from_address.clone(),
        }
    }
}

// ── Notifications ───────────────────────────────────────────────────

/// Notification dispatcher settings.
#[derive(Debug, Clone)]
pub struct NotifyConfig {
    /// `None` when `NOTIFY_SMTP_HOST` is unset; every message then goes to the fallback store.
    pub smtp: Option<SmtpConfig>,
    pub recipient: String,
    pub send_timeout: Duration,
    pub fallback_dir: PathBuf,
}

impl NotifyConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env_lookup)
    }

    pub fn from_vars(vars: Lookup<'_>) -> Result<Self, ConfigError> {
        let smtp = match vars("NOTIFY_SMTP_HOST") {
            None => None,
            Some(host) => {
                let username = vars("NOTIFY_USERNAME").unwrap_or_default();
                let from_address = vars("NOTIFY_FROM").unwrap_or_else(|| username.clone());
                if from_address.is_empty() {
                    return Err(ConfigError::MissingRequired {
                        key: "NOTIFY_FROM".into(),
                        hint: "Set NOTIFY_FROM or NOTIFY_USERNAME when SMTP is enabled.".into(),
                    });
                }
                Some(SmtpConfig {
                    host,
                    port: parse_or(vars, "NOTIFY_SMTP_PORT", 587)?,
                    username,
                    password: SecretString::from(vars("NOTIFY_PASSWORD").unwrap_or_default()),
                    from_address,
                })
            }
        };

        let recipient = match (vars("NOTIFY_RECIPIENT"), &smtp) {
            (Some(r), _) => r,
            (None, None) => "ops@localhost".to_string(),
            (None, Some(_)) => {
                return Err(ConfigError::MissingRequired {
                    key: "NOTIFY_RECIPIENT".into(),
                    hint: "Set the address that operational alerts are sent to.".into(),
                });
            }
        };

        Ok(Self {
            smtp,
            recipient,
            send_timeout: Duration::from_secs(parse_or(vars, "NOTIFY_SEND_TIMEOUT_SECS", 30)?),
            fallback_dir: vars("NOTIFY_FALLBACK_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./notifications")),
        })
    }
}

// ── Mail monitor ────────────────────────────────────────────────────

/// IMAP inbox monitor settings.
#[derive(Debug)]
pub struct MonitorConfig {
    pub imap_host: String,
    pub imap_port: u16,
    pub username: String,
    pub password: SecretString,
    pub poll_interval_secs: u64,
    /// See [`crate::monitor::is_sender_allowed`] for the entry syntax.
    pub allowed_senders: Vec<String>,
    pub report_dir: PathBuf,
}

impl Clone for MonitorConfig {
    fn clone(&self) -> Self {
        Self {
            imap_host: self.imap_host.clone(),
            imap_port: self.imap_port,
            username: self.username.clone(),
            password: SecretString::from(self.password.expose_secret()),
            poll_interval_secs: self.poll_interval_secs,
            allowed_senders: self.allowed_senders.clone(),
            report_dir: self.report_dir.clone(),
        }
    }
}

impl MonitorConfig {
    /// Returns `Ok(None)` if `MONITOR_IMAP_HOST` is not set (monitor disabled).
    pub fn from_env() -> Result<Option<Self>, ConfigError> {
        Self::from_vars(&env_lookup)
    }

    pub fn from_vars(vars: Lookup<'_>) -> Result<Option<Self>, ConfigError> {
        let Some(imap_host) = vars("MONITOR_IMAP_HOST") else {
            return Ok(None);
        };

        let poll_interval_secs = parse_or(vars, "MONITOR_POLL_INTERVAL_SECS", 60_u64)?;
        if poll_interval_secs == 0 {
            return Err(ConfigError::InvalidValue {
                key: "MONITOR_POLL_INTERVAL_SECS".into(),
                message: "must be at least 1".into(),
            });
        }

        Ok(Some(Self {
            imap_host,
            imap_port: parse_or(vars, "MONITOR_IMAP_PORT", 993)?,
            username: vars("MONITOR_USERNAME").unwrap_or_default(),
            password: SecretString::from(vars("MONITOR_PASSWORD").unwrap_or_default()),
            poll_interval_secs,
            allowed_senders: split_list(
                &vars("MONITOR_ALLOWED_SENDERS").unwrap_or_else(|| "*".to_string()),
            ),
            report_dir: vars("MONITOR_REPORT_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./bug-reports")),
        }))
    }
}

// ── Smoke tests ─────────────────────────────────────────────────────

/// Smoke runner settings.
#[derive(Debug, Clone)]
pub struct SmokeConfig {
    pub base_url: Option<String>,
    pub timeout: Duration,
}

impl SmokeConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env_lookup)
    }

    pub fn from_vars(vars: Lookup<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            base_url: vars("SMOKE_BASE_URL"),
            timeout: Duration::from_secs(parse_or(vars, "SMOKE_TIMEOUT_SECS", 10)?),
        })
    }
}

// ── Aggregate ───────────────────────────────────────────────────────

/// Everything the binary needs.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub notify: NotifyConfig,
    pub todo_dir: PathBuf,
    pub monitor: Option<MonitorConfig>,
    pub smoke: SmokeConfig,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_vars(&env_lookup)
    }

    pub fn from_vars(vars: Lookup<'_>) -> Result<Self, ConfigError> {
        Ok(Self {
            notify: NotifyConfig::from_vars(vars)?,
            todo_dir: vars("TODO_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("./todos")),
            monitor: MonitorConfig::from_vars(vars)?,
            smoke: SmokeConfig::from_vars(vars)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn vars(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |key: &str| map.get(key).cloned()
    }

    #[test]
    fn defaults_without_any_vars() {
        let lookup = vars(&[]);
        let cfg = AppConfig::from_vars(&lookup).unwrap();
        assert!(cfg.notify.smtp.is_none());
        assert_eq!(cfg.notify.recipient, "ops@localhost");
        assert_eq!(cfg.notify.send_timeout, Duration::from_secs(30));
        assert_eq!(cfg.notify.fallback_dir, PathBuf::from("./notifications"));
        assert_eq!(cfg.todo_dir, PathBuf::from("./todos"));
        assert!(cfg.monitor.is_none());
        assert!(cfg.smoke.base_url.is_none());
    }

    #[test]
    fn smtp_enabled_with_from_defaulting_to_username() {
        let lookup = vars(&[
            ("NOTIFY_SMTP_HOST", "smtp.example.com"),
            ("NOTIFY_USERNAME", "alerts@example.com"),
            ("NOTIFY_PASSWORD", "hunter2"),
            ("NOTIFY_RECIPIENT", "oncall@example.com"),
        ]);
        let cfg = NotifyConfig::from_vars(&lookup).unwrap();
        let smtp = cfg.smtp.unwrap();
        assert_eq!(smtp.port, 587);
        assert_eq!(smtp.from_address, "alerts@example.com");
        assert_eq!(smtp.password.expose_secret(), "hunter2");
        assert_eq!(cfg.recipient, "oncall@example.com");
    }

    #[test]
    fn smtp_without_recipient_is_an_error() {
        let lookup = vars(&[
            ("NOTIFY_SMTP_HOST", "smtp.example.com"),
            ("NOTIFY_USERNAME", "alerts@example.com"),
        ]);
        let err = NotifyConfig::from_vars(&lookup).unwrap_err();
        assert!(matches!(err, ConfigError::MissingRequired { ref key, .. } if key == "NOTIFY_RECIPIENT"));
    }

    #[test]
    fn smtp_without_sender_is_an_error() {
        let lookup = vars(&[
            ("NOTIFY_SMTP_HOST", "smtp.example.com"),
            ("NOTIFY_RECIPIENT", "oncall@example.com"),
        ]);
        assert!(NotifyConfig::from_vars(&lookup).is_err());
    }

    #[test]
    fn bad_port_is_invalid_value() {
        let lookup = vars(&[
            ("NOTIFY_SMTP_HOST", "smtp.example.com"),
            ("NOTIFY_USERNAME", "a@example.com"),
            ("NOTIFY_RECIPIENT", "b@example.com"),
            ("NOTIFY_SMTP_PORT", "seventy"),
        ]);
        let err = NotifyConfig::from_vars(&lookup).unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue { ref key, .. } if key == "NOTIFY_SMTP_PORT"));
    }

    #[test]
    fn monitor_disabled_without_host() {
        let lookup = vars(&[("MONITOR_USERNAME", "x")]);
        assert!(MonitorConfig::from_vars(&lookup).unwrap().is_none());
    }

    #[test]
    fn monitor_parses_allowlist_and_defaults() {
        let lookup = vars(&[
            ("MONITOR_IMAP_HOST", "imap.example.com"),
            ("MONITOR_ALLOWED_SENDERS", " qa@example.com , @beta.example.com ,,"),
        ]);
        let cfg = MonitorConfig::from_vars(&lookup).unwrap().unwrap();
        assert_eq!(cfg.imap_port, 993);
        assert_eq!(cfg.poll_interval_secs, 60);
        assert_eq!(
            cfg.allowed_senders,
            vec!["qa@example.com".to_string(), "@beta.example.com".to_string()]
        );
        assert_eq!(cfg.report_dir, PathBuf::from("./bug-reports"));
    }

    #[test]
    fn monitor_allows_everyone_by_default() {
        let lookup = vars(&[("MONITOR_IMAP_HOST", "imap.example.com")]);
        let cfg = MonitorConfig::from_vars(&lookup).unwrap().unwrap();
        assert_eq!(cfg.allowed_senders, vec!["*".to_string()]);
    }

    #[test]
    fn zero_poll_interval_is_rejected() {
        let lookup = vars(&[
            ("MONITOR_IMAP_HOST", "imap.example.com"),
            ("MONITOR_POLL_INTERVAL_SECS", "0"),
        ]);
        assert!(MonitorConfig::from_vars(&lookup).is_err());
    }

    #[test]
    fn smoke_timeout_override() {
        let lookup = vars(&[
            ("SMOKE_BASE_URL", "https://staging.example.com"),
            ("SMOKE_TIMEOUT_SECS", "3"),
        ]);
        let cfg = SmokeConfig::from_vars(&lookup).unwrap();
        assert_eq!(cfg.base_url.as_deref(), Some("https://staging.example.com"));
        assert_eq!(cfg.timeout, Duration::from_secs(3));
    }

    #[test]
    fn cloned_smtp_config_keeps_password() {
        let cfg = SmtpConfig {
            host: "h".into(),
            port: 465,
            username: "u".into(),
            password: SecretString::from("p"),
            from_address: "u@h".into(),
        };
        assert_eq!(cfg.clone().password.expose_secret(), "p");
    }
}
