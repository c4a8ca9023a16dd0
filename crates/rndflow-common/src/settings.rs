// Agent settings, read from `RNDFLOW_*` environment variables.

use crate::constants::{self, layout, variables};
use rndflow_sdk::StringUtil;
use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Configuration problems detected before any network call is made.
#[derive(Debug, Error)]
pub enum SettingsError {
    #[error("The required environment variable \"{0}\" is not set")]
    Missing(&'static str),

    #[error("Invalid value \"{value}\" for {name}: {reason}")]
    Invalid {
        name: String,
        value: String,
        reason: String,
    },
}

/// Timezone used when rendering log timestamps.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum LogTimezone {
    #[default]
    Utc,
    Local,
}

/// Retry budgets and timeouts of one transport profile.
#[derive(Debug, Clone, PartialEq)]
pub struct RetrySettings {
    pub total: u32,
    pub connect: u32,
    pub read: u32,
    pub redirect: u32,
    pub status: u32,
    pub other: u32,
    /// Seconds; the delay before retry `n` is `backoff_factor * 2^(n-1)`.
    pub backoff_factor: f64,
    pub connect_timeout: Duration,
    pub read_timeout: Duration,
}

impl RetrySettings {
    /// Profile for ordinary short calls.
    pub fn common() -> Self {
        Self {
            total: 3,
            connect: 3,
            read: 3,
            redirect: 3,
            status: 3,
            other: 0,
            backoff_factor: 0.3,
            connect_timeout: Duration::from_secs(30),
            read_timeout: Duration::from_secs(300),
        }
    }

    /// Profile for calls that may keep the server busy for a long time.
    pub fn spec() -> Self {
        Self {
            read_timeout: Duration::from_secs(300_000),
            ..Self::common()
        }
    }

    fn from_lookup<F>(prefix: &str, defaults: Self, lookup: &F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |suffix: &str| format!("{prefix}_{suffix}");
        Ok(Self {
            total: parse_or(lookup, &var("TOTAL_RETRIES"), defaults.total)?,
            connect: parse_or(lookup, &var("CONNECT_RETRIES"), defaults.connect)?,
            read: parse_or(lookup, &var("READ_RETRIES"), defaults.read)?,
            redirect: parse_or(lookup, &var("REDIRECT_RETRIES"), defaults.redirect)?,
            status: parse_or(lookup, &var("STATUS_RETRIES"), defaults.status)?,
            other: parse_or(lookup, &var("OTHER_RETRIES"), defaults.other)?,
            backoff_factor: parse_or(lookup, &var("BACKOFF_FACTOR"), defaults.backoff_factor)?,
            connect_timeout: seconds_or(lookup, &var("CONNECT_TIMEOUT"), defaults.connect_timeout)?,
            read_timeout: seconds_or(lookup, &var("READ_TIMEOUT"), defaults.read_timeout)?,
        })
    }
}

/// Everything the agent reads from its environment.
#[derive(Debug, Clone)]
pub struct Settings {
    pub api_server: Option<String>,
    pub refresh_token: String,
    /// Pre-issued access token; when present no initial refresh is made.
    pub access_token: Option<String>,
    pub logging_level: String,
    pub date_format: String,
    pub timezone: LogTimezone,
    pub ssl_verify: bool,
    pub heartbeat_interval: Duration,
    pub common: RetrySettings,
    pub spec: RetrySettings,
    pub error_report_attempts: u32,
    pub error_report_interval: Duration,
    /// Top-level directories of the job root that are never uploaded.
    pub exclude_dirs: Vec<String>,
    /// Parent directory of job roots.
    pub work_directory: PathBuf,
    pub jupyter_base_url: Option<String>,
}

impl Settings {
    /// Settings with every default and the given refresh token.
    pub fn new(refresh_token: impl Into<String>) -> Self {
        Self {
            api_server: None,
            refresh_token: refresh_token.into(),
            access_token: None,
            logging_level: constants::DEFAULT_LOGGING_LEVEL.to_string(),
            date_format: constants::DEFAULT_DATE_FORMAT.to_string(),
            timezone: LogTimezone::Utc,
            ssl_verify: true,
            heartbeat_interval: constants::DEFAULT_HEARTBEAT_INTERVAL,
            common: RetrySettings::common(),
            spec: RetrySettings::spec(),
            error_report_attempts: constants::DEFAULT_ERROR_REPORT_ATTEMPTS,
            error_report_interval: constants::DEFAULT_ERROR_REPORT_INTERVAL,
            exclude_dirs: layout::DEFAULT_EXCLUDE_DIRS
                .iter()
                .map(|d| d.to_string())
                .collect(),
            work_directory: PathBuf::from("."),
            jupyter_base_url: None,
        }
    }

    /// Read settings from the process environment.
    pub fn from_env() -> Result<Self, SettingsError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read settings through `lookup`, which returns the value of a variable.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, SettingsError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let refresh_token =
            get(variables::REFRESH_TOKEN).ok_or(SettingsError::Missing(variables::REFRESH_TOKEN))?;
        let defaults = Self::new(refresh_token);

        let timezone = match get(variables::TIMEZONE) {
            None => defaults.timezone,
            Some(tz) => match tz.trim().to_lowercase().as_str() {
                "utc" => LogTimezone::Utc,
                "local" => LogTimezone::Local,
                _ => {
                    return Err(SettingsError::Invalid {
                        name: variables::TIMEZONE.to_string(),
                        value: tz,
                        reason: "expected \"utc\" or \"local\"".to_string(),
                    })
                }
            },
        };

        let ssl_verify = match get(variables::SSL_VERIFY) {
            None => defaults.ssl_verify,
            Some(v) => StringUtil::convert_to_bool(&v).ok_or_else(|| SettingsError::Invalid {
                name: variables::SSL_VERIFY.to_string(),
                value: v.clone(),
                reason: "expected a boolean".to_string(),
            })?,
        };

        let exclude_dirs = match get(variables::EXCLUDE_DIRS) {
            None => defaults.exclude_dirs.clone(),
            Some(v) => StringUtil::split_list(&v),
        };

        Ok(Self {
            api_server: get(variables::API_SERVER).map(|s| s.trim_end_matches('/').to_string()),
            access_token: get(variables::ACCESS_TOKEN),
            logging_level: get(variables::LOGGING_LEVEL).unwrap_or(defaults.logging_level.clone()),
            date_format: get(variables::DATE_FORMAT).unwrap_or(defaults.date_format.clone()),
            timezone,
            ssl_verify,
            heartbeat_interval: seconds_or(
                &lookup,
                variables::HEARTBEAT_INTERVAL,
                defaults.heartbeat_interval,
            )?,
            common: RetrySettings::from_lookup(
                variables::COMMON_PROFILE_PREFIX,
                RetrySettings::common(),
                &lookup,
            )?,
            spec: RetrySettings::from_lookup(
                variables::SPEC_PROFILE_PREFIX,
                RetrySettings::spec(),
                &lookup,
            )?,
            error_report_attempts: parse_or(
                &lookup,
                variables::ERROR_REPORT_ATTEMPTS,
                defaults.error_report_attempts,
            )?,
            error_report_interval: seconds_or(
                &lookup,
                variables::ERROR_REPORT_INTERVAL,
                defaults.error_report_interval,
            )?,
            exclude_dirs,
            work_directory: get(variables::WORK_DIRECTORY)
                .map(PathBuf::from)
                .unwrap_or(defaults.work_directory.clone()),
            jupyter_base_url: get(variables::JUPYTER_BASE_URL),
            ..defaults
        })
    }

    /// The API base URL for `host`, or for the configured server.
    ///
    /// The host must be an absolute http(s) URL.
    pub fn api_base_url(&self, host: Option<&str>) -> Result<String, SettingsError> {
        let host = host
            .map(str::to_string)
            .or_else(|| self.api_server.clone())
            .ok_or(SettingsError::Missing(variables::API_SERVER))?;
        let invalid = |reason: String| SettingsError::Invalid {
            name: variables::API_SERVER.to_string(),
            value: host.clone(),
            reason,
        };
        let url = url::Url::parse(host.trim()).map_err(|e| invalid(e.to_string()))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(invalid(format!("unsupported scheme '{}'", url.scheme())));
        }
        Ok(format!(
            "{}{}",
            url.as_str().trim_end_matches('/'),
            constants::api::BASE_SUFFIX
        ))
    }
}

fn parse_or<F, T>(lookup: &F, name: &str, default: T) -> Result<T, SettingsError>
where
    F: Fn(&str) -> Option<String>,
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match lookup(name).filter(|v| !v.trim().is_empty()) {
        None => Ok(default),
        Some(v) => v.trim().parse().map_err(|e: T::Err| SettingsError::Invalid {
            name: name.to_string(),
            reason: e.to_string(),
            value: v,
        }),
    }
}

fn seconds_or<F>(lookup: &F, name: &str, default: Duration) -> Result<Duration, SettingsError>
where
    F: Fn(&str) -> Option<String>,
{
    let secs: f64 = parse_or(lookup, name, default.as_secs_f64())?;
    Duration::try_from_secs_f64(secs).map_err(|e| SettingsError::Invalid {
        name: name.to_string(),
        value: secs.to_string(),
        reason: e.to_string(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup(vars: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = vars
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn refresh_token_is_required() {
        let err = Settings::from_lookup(lookup(&[])).unwrap_err();
        assert!(matches!(err, SettingsError::Missing("RNDFLOW_REFRESH_TOKEN")));
    }

    #[test]
    fn defaults() {
        let s = Settings::from_lookup(lookup(&[("RNDFLOW_REFRESH_TOKEN", "r0")])).unwrap();
        assert_eq!(s.refresh_token, "r0");
        assert!(s.access_token.is_none());
        assert!(s.ssl_verify);
        assert_eq!(s.heartbeat_interval, Duration::from_secs(60));
        assert_eq!(s.common, RetrySettings::common());
        assert_eq!(s.spec.read_timeout, Duration::from_secs(300_000));
        assert_eq!(s.common.read_timeout, Duration::from_secs(300));
        assert_eq!(s.error_report_attempts, 144);
        assert_eq!(s.exclude_dirs, vec!["in", "__pycache__", ".ipynb_checkpoints"]);
        assert_eq!(s.timezone, LogTimezone::Utc);
    }

    #[test]
    fn overrides() {
        let s = Settings::from_lookup(lookup(&[
            ("RNDFLOW_REFRESH_TOKEN", "r0"),
            ("RNDFLOW_API_SERVER", "https://flow.example/"),
            ("RNDFLOW_SSL_VERIFY", "false"),
            ("RNDFLOW_TIMEZONE", "Local"),
            ("RNDFLOW_HEARTBEAT_INTERVAL", "0.5"),
            ("RNDFLOW_COMMON_TOTAL_RETRIES", "5"),
            ("RNDFLOW_SPEC_BACKOFF_FACTOR", "1.5"),
            ("RNDFLOW_EXCLUDE_DIRS", "in, cache"),
        ]))
        .unwrap();
        assert!(!s.ssl_verify);
        assert_eq!(s.timezone, LogTimezone::Local);
        assert_eq!(s.heartbeat_interval, Duration::from_millis(500));
        assert_eq!(s.common.total, 5);
        assert_eq!(s.spec.total, 3);
        assert_eq!(s.spec.backoff_factor, 1.5);
        assert_eq!(s.exclude_dirs, vec!["in", "cache"]);
        assert_eq!(s.api_base_url(None).unwrap(), "https://flow.example/api");
        assert_eq!(
            s.api_base_url(Some("http://127.0.0.1:9000")).unwrap(),
            "http://127.0.0.1:9000/api"
        );
    }

    #[test]
    fn invalid_numbers_are_rejected() {
        let err = Settings::from_lookup(lookup(&[
            ("RNDFLOW_REFRESH_TOKEN", "r0"),
            ("RNDFLOW_COMMON_READ_RETRIES", "many"),
        ]))
        .unwrap_err();
        assert!(err.to_string().contains("RNDFLOW_COMMON_READ_RETRIES"));
    }

    #[test]
    fn missing_host_is_an_error() {
        let s = Settings::new("r0");
        assert!(matches!(
            s.api_base_url(None),
            Err(SettingsError::Missing("RNDFLOW_API_SERVER"))
        ));
    }

    #[test]
    fn host_must_be_an_http_url() {
        let s = Settings::new("r0");
        for host in ["flow.example", "ftp://flow.example"] {
            assert!(matches!(
                s.api_base_url(Some(host)),
                Err(SettingsError::Invalid { .. })
            ));
        }
    }
}
