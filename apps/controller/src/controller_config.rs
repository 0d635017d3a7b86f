use std::env;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use jitaccess_application::{ConflictRetryPolicy, ReconcilerConfig, RolePruning};
use jitaccess_core::{AppError, AppResult};
use jitaccess_infrastructure::QueueBackoff;
use tracing_subscriber::EnvFilter;

/// Source of the permission decisions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PermissionGateConfig {
    /// Allow everyone except a fixed list of subjects.
    Static { denied_subjects: Vec<String> },
    /// Ask an HTTP endpoint for every decision.
    Http { url: String, timeout: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ControllerConfig {
    pub requeue_interval: Duration,
    pub worker_count: usize,
    pub reconcile_timeout: Duration,
    pub conflict_retry: ConflictRetryPolicy,
    pub role_pruning: RolePruning,
    pub backoff_max: Duration,
    pub seed_file: Option<PathBuf>,
    pub permission_gate: PermissionGateConfig,
}

impl ControllerConfig {
    pub fn load() -> AppResult<Self> {
        Self::from_lookup(|name| env::var(name).ok())
    }

    /// Builds the configuration from any variable source.
    pub fn from_lookup<F>(lookup: F) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let requeue_interval_seconds =
            parse_env(&lookup, "CONTROLLER_REQUEUE_INTERVAL_SECONDS", 180_u64)?;
        let worker_count = parse_env(&lookup, "CONTROLLER_WORKER_COUNT", 4_usize)?;
        let reconcile_timeout_seconds =
            parse_env(&lookup, "CONTROLLER_RECONCILE_TIMEOUT_SECONDS", 30_u64)?;
        let conflict_retry_attempts =
            parse_env(&lookup, "CONTROLLER_CONFLICT_RETRY_ATTEMPTS", 5_u32)?;
        let conflict_retry_backoff_ms =
            parse_env(&lookup, "CONTROLLER_CONFLICT_RETRY_BACKOFF_MS", 10_u64)?;
        let role_pruning = parse_env(&lookup, "CONTROLLER_ROLE_PRUNING", RolePruning::Retain)?;
        let backoff_max_seconds = parse_env(&lookup, "CONTROLLER_BACKOFF_MAX_SECONDS", 60_u64)?;
        let seed_file = non_empty_env(&lookup, "CONTROLLER_SEED_FILE").map(PathBuf::from);

        for (name, value) in [
            ("CONTROLLER_REQUEUE_INTERVAL_SECONDS", requeue_interval_seconds),
            ("CONTROLLER_RECONCILE_TIMEOUT_SECONDS", reconcile_timeout_seconds),
            ("CONTROLLER_BACKOFF_MAX_SECONDS", backoff_max_seconds),
            (
                "CONTROLLER_WORKER_COUNT",
                u64::try_from(worker_count).unwrap_or(u64::MAX),
            ),
            (
                "CONTROLLER_CONFLICT_RETRY_ATTEMPTS",
                u64::from(conflict_retry_attempts),
            ),
        ] {
            if value == 0 {
                return Err(AppError::Validation(format!(
                    "{name} must be greater than zero"
                )));
            }
        }

        let permission_gate = match non_empty_env(&lookup, "PERMISSION_GATE_URL") {
            Some(url) => {
                let timeout_ms = parse_env(&lookup, "PERMISSION_GATE_TIMEOUT_MS", 5000_u64)?;
                if timeout_ms == 0 {
                    return Err(AppError::Validation(
                        "PERMISSION_GATE_TIMEOUT_MS must be greater than zero".to_owned(),
                    ));
                }
                PermissionGateConfig::Http {
                    url,
                    timeout: Duration::from_millis(timeout_ms),
                }
            }
            None => PermissionGateConfig::Static {
                denied_subjects: lookup("PERMISSION_GATE_DENY_SUBJECTS")
                    .map(|value| {
                        value
                            .split(',')
                            .map(str::trim)
                            .filter(|subject| !subject.is_empty())
                            .map(str::to_owned)
                            .collect()
                    })
                    .unwrap_or_default(),
            },
        };

        Ok(Self {
            requeue_interval: Duration::from_secs(requeue_interval_seconds),
            worker_count,
            reconcile_timeout: Duration::from_secs(reconcile_timeout_seconds),
            conflict_retry: ConflictRetryPolicy {
                max_attempts: conflict_retry_attempts,
                backoff: Duration::from_millis(conflict_retry_backoff_ms),
            },
            role_pruning,
            backoff_max: Duration::from_secs(backoff_max_seconds),
            seed_file,
            permission_gate,
        })
    }

    pub fn reconciler_config(&self) -> ReconcilerConfig {
        ReconcilerConfig {
            requeue_interval: self.requeue_interval,
            conflict_retry: self.conflict_retry,
            role_pruning: self.role_pruning,
        }
    }

    pub fn queue_backoff(&self) -> QueueBackoff {
        let defaults = QueueBackoff::default();
        QueueBackoff {
            base: defaults.base.min(self.backoff_max),
            max: self.backoff_max,
        }
    }
}

pub fn init_tracing() {
    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(false)
        .compact()
        .init();
}

fn non_empty_env<F>(lookup: &F, name: &str) -> Option<String>
where
    F: Fn(&str) -> Option<String>,
{
    lookup(name)
        .map(|value| value.trim().to_owned())
        .filter(|value| !value.is_empty())
}

fn parse_env<F, T>(lookup: &F, name: &str, default: T) -> AppResult<T>
where
    F: Fn(&str) -> Option<String>,
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match non_empty_env(lookup, name) {
        Some(value) => value.parse::<T>().map_err(|error| {
            AppError::Validation(format!("invalid {name} value '{value}': {error}"))
        }),
        None => Ok(default),
    }
}
