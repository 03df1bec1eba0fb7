//! Controller configuration
//!
//! Defaults suit a single small deployment. Every option can be set with a
//! command-line flag or a `HELMCHART_*` environment variable.

use std::num::ParseIntError;
use std::time::Duration;

use clap::Parser;

use crate::controllers::status::RetryPolicy;
use crate::error::{Error, Result};
use crate::queue::{
    controller_rate_limiter, MaxOfRateLimiter, DEFAULT_BASE_DELAY, DEFAULT_BURST,
    DEFAULT_MAX_DELAY, DEFAULT_QPS,
};

/// Default number of workers
pub const DEFAULT_WORKERS: usize = 2;

/// Default metrics port
pub const DEFAULT_METRICS_PORT: u16 = 8080;

fn parse_millis(value: &str) -> std::result::Result<Duration, ParseIntError> {
    value.trim().parse().map(Duration::from_millis)
}

fn parse_secs(value: &str) -> std::result::Result<Duration, ParseIntError> {
    value.trim().parse().map(Duration::from_secs)
}

/// HelmChart controller - reconciles HelmChart resources
#[derive(Parser, Clone, Debug, PartialEq)]
#[command(name = "helmchart-controller", version, about, long_about = None)]
pub struct ControllerConfig {
    /// Number of parallel workers
    #[arg(long, env = "HELMCHART_WORKERS", default_value_t = DEFAULT_WORKERS)]
    pub workers: usize,

    /// Per-key requeue delay after the first failure, in milliseconds
    #[arg(
        long = "backoff-base-ms",
        env = "HELMCHART_BACKOFF_BASE_MS",
        value_parser = parse_millis,
        default_value = "5"
    )]
    pub backoff_base: Duration,

    /// Ceiling for the per-key requeue delay, in seconds
    #[arg(
        long = "backoff-max-secs",
        env = "HELMCHART_BACKOFF_MAX_SECS",
        value_parser = parse_secs,
        default_value = "1000"
    )]
    pub backoff_max: Duration,

    /// Overall requeue rate limit (keys per second)
    #[arg(long, env = "HELMCHART_REQUEUE_QPS", default_value_t = DEFAULT_QPS)]
    pub requeue_qps: f64,

    /// Overall requeue burst
    #[arg(long, env = "HELMCHART_REQUEUE_BURST", default_value_t = DEFAULT_BURST)]
    pub requeue_burst: u32,

    /// Status write attempts before a conflict is given up on
    #[arg(long, env = "HELMCHART_STATUS_RETRY_STEPS", default_value_t = 5)]
    pub status_retry_steps: u32,

    /// Delay between conflicting status writes, in milliseconds
    #[arg(
        long = "status-retry-delay-ms",
        env = "HELMCHART_STATUS_RETRY_DELAY_MS",
        value_parser = parse_millis,
        default_value = "10"
    )]
    pub status_retry_delay: Duration,

    /// Port of the metrics and health server
    #[arg(long, env = "HELMCHART_METRICS_PORT", default_value_t = DEFAULT_METRICS_PORT)]
    pub metrics_port: u16,

    /// Namespace to watch; all namespaces when unset
    #[arg(long, env = "HELMCHART_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        let retry = RetryPolicy::default();
        Self {
            workers: DEFAULT_WORKERS,
            backoff_base: DEFAULT_BASE_DELAY,
            backoff_max: DEFAULT_MAX_DELAY,
            requeue_qps: DEFAULT_QPS,
            requeue_burst: DEFAULT_BURST,
            status_retry_steps: retry.steps,
            status_retry_delay: retry.delay,
            metrics_port: DEFAULT_METRICS_PORT,
            watch_namespace: None,
        }
    }
}

impl ControllerConfig {
    /// Parse `args` (flags first, environment as fallback) and validate.
    pub fn try_from_args<I, T>(args: I) -> Result<Self>
    where
        I: IntoIterator<Item = T>,
        T: Into<std::ffi::OsString> + Clone,
    {
        let config =
            Self::try_parse_from(args).map_err(|e| Error::config(e.to_string().trim_end()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::config("workers must be at least 1"));
        }
        if self.backoff_base > self.backoff_max {
            return Err(Error::config(format!(
                "backoff base {:?} exceeds backoff max {:?}",
                self.backoff_base, self.backoff_max
            )));
        }
        if !self.requeue_qps.is_finite() || self.requeue_qps < 0.0 {
            return Err(Error::config("requeue qps must be a non-negative number"));
        }
        if self.status_retry_steps == 0 {
            return Err(Error::config("status retry steps must be at least 1"));
        }
        if let Some(ns) = &self.watch_namespace {
            if ns.trim().is_empty() {
                return Err(Error::config("watch namespace must not be blank when set"));
            }
        }
        Ok(())
    }

    /// Conflict retry budget for status writes
    pub fn status_retry(&self) -> RetryPolicy {
        RetryPolicy {
            steps: self.status_retry_steps,
            delay: self.status_retry_delay,
            ..RetryPolicy::default()
        }
    }

    /// Per-key exponential backoff combined with the overall token bucket
    pub fn rate_limiter(&self) -> MaxOfRateLimiter<String> {
        controller_rate_limiter(
            self.backoff_base,
            self.backoff_max,
            self.requeue_qps,
            self.requeue_burst,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::RateLimiter;

    const BIN: &str = "helmchart-controller";

    #[test]
    fn defaults_without_flags() {
        let config = ControllerConfig::try_from_args([BIN]).unwrap();
        let defaults = ControllerConfig::default();

        assert_eq!(config.workers, defaults.workers);
        assert_eq!(config.backoff_base, Duration::from_millis(5));
        assert_eq!(config.backoff_max, Duration::from_secs(1000));
        assert_eq!(config.requeue_qps, DEFAULT_QPS);
        assert_eq!(config.requeue_burst, DEFAULT_BURST);
        assert_eq!(config.status_retry(), RetryPolicy::default());
        assert_eq!(config.metrics_port, DEFAULT_METRICS_PORT);
    }

    #[test]
    fn flags_override_defaults() {
        let config = ControllerConfig::try_from_args([
            BIN,
            "--workers",
            "4",
            "--backoff-base-ms",
            "50",
            "--status-retry-steps",
            "10",
            "--status-retry-delay-ms",
            "25",
            "--watch-namespace",
            "apps",
        ])
        .unwrap();

        assert_eq!(config.workers, 4);
        assert_eq!(config.backoff_base, Duration::from_millis(50));
        assert_eq!(config.status_retry().steps, 10);
        assert_eq!(config.status_retry().delay, Duration::from_millis(25));
        assert_eq!(config.watch_namespace.as_deref(), Some("apps"));
    }

    #[test]
    fn environment_is_used_when_flag_absent() {
        std::env::set_var("HELMCHART_WATCH_NAMESPACE", "team-a");
        let from_env = ControllerConfig::try_from_args([BIN]).unwrap();
        let from_flag =
            ControllerConfig::try_from_args([BIN, "--watch-namespace", "team-b"]).unwrap();
        std::env::remove_var("HELMCHART_WATCH_NAMESPACE");

        assert_eq!(from_env.watch_namespace.as_deref(), Some("team-a"));
        assert_eq!(from_flag.watch_namespace.as_deref(), Some("team-b"));
    }

    #[test]
    fn invalid_values_are_config_errors() {
        let err = ControllerConfig::try_from_args([BIN, "--workers", "many"]).unwrap_err();
        assert!(matches!(err, Error::Config(_)));

        let err = ControllerConfig::try_from_args([BIN, "--workers", "0"]).unwrap_err();
        assert!(err.to_string().contains("workers"));

        let err =
            ControllerConfig::try_from_args([BIN, "--status-retry-steps", "0"]).unwrap_err();
        assert!(err.to_string().contains("retry"));

        let err = ControllerConfig::try_from_args([
            BIN,
            "--backoff-base-ms",
            "5000",
            "--backoff-max-secs",
            "1",
        ])
        .unwrap_err();
        assert!(err.to_string().contains("backoff"));
    }

    #[test]
    fn rate_limiter_uses_configured_backoff() {
        let config =
            ControllerConfig::try_from_args([BIN, "--backoff-base-ms", "20"]).unwrap();
        let limiter = config.rate_limiter();
        let key = "ns1/foo".to_string();

        let first = limiter.when(&key);
        assert_eq!(first, Duration::from_millis(20));
        assert_eq!(limiter.num_requeues(&key), 1);
    }
}
