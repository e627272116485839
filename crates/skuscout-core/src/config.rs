use std::path::PathBuf;
use std::time::Duration;

use crate::engine_config::{
    BackoffSettings, CircuitSettings, EngineConfig, RateLimitSettings, SessionBudget,
};
use crate::ConfigError;

/// Largest pacing multiplier accepted per failure signal.
const MAX_RATE_BACKOFF_FACTOR: f64 = 10.0;

/// Load engine configuration from environment variables.
///
/// Calls `dotenvy::dotenv().ok()` to load `.env` files before reading env vars.
///
/// # Errors
///
/// Returns `ConfigError` if a recognized env var holds an invalid value.
pub fn load_engine_config() -> Result<EngineConfig, ConfigError> {
    dotenvy::dotenv().ok();
    load_engine_config_from_env()
}

/// Load engine configuration from environment variables already in the process.
///
/// Unlike [`load_engine_config`], this does NOT load `.env` files.
///
/// # Errors
///
/// Returns `ConfigError` if a recognized env var holds an invalid value.
pub fn load_engine_config_from_env() -> Result<EngineConfig, ConfigError> {
    build_engine_config(|key| std::env::var(key))
}

fn invalid(var: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::InvalidEnvVar {
        var: var.to_string(),
        reason: reason.into(),
    }
}

/// Build engine configuration using the provided env-var lookup function.
///
/// Pure parsing/validation so tests can feed a `HashMap` instead of mutating
/// the process environment.
#[allow(clippy::too_many_lines)]
fn build_engine_config<F>(lookup: F) -> Result<EngineConfig, ConfigError>
where
    F: Fn(&str) -> Result<String, std::env::VarError>,
{
    let or_default = |var: &str, default: &str| -> String {
        lookup(var).unwrap_or_else(|_| default.to_string())
    };

    let parse_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        or_default(var, default)
            .trim()
            .parse::<u32>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_u64 = |var: &str, default: &str| -> Result<u64, ConfigError> {
        or_default(var, default)
            .trim()
            .parse::<u64>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        or_default(var, default)
            .trim()
            .parse::<usize>()
            .map_err(|e| invalid(var, e.to_string()))
    };

    let parse_f64 = |var: &str, default: &str| -> Result<f64, ConfigError> {
        let value = or_default(var, default)
            .trim()
            .parse::<f64>()
            .map_err(|e| invalid(var, e.to_string()))?;
        if value.is_finite() {
            Ok(value)
        } else {
            Err(invalid(var, "must be a finite number"))
        }
    };

    let parse_fraction = |var: &str, default: &str| -> Result<f64, ConfigError> {
        let value = parse_f64(var, default)?;
        if (0.0..=1.0).contains(&value) {
            Ok(value)
        } else {
            Err(invalid(var, format!("{value} is outside [0, 1]")))
        }
    };

    let parse_positive_usize = |var: &str, default: &str| -> Result<usize, ConfigError> {
        let value = parse_usize(var, default)?;
        if value == 0 {
            return Err(invalid(var, "must be at least 1"));
        }
        Ok(value)
    };

    let parse_positive_u32 = |var: &str, default: &str| -> Result<u32, ConfigError> {
        let value = parse_u32(var, default)?;
        if value == 0 {
            return Err(invalid(var, "must be at least 1"));
        }
        Ok(value)
    };

    let headless = parse_bool("SKUSCOUT_HEADLESS", &or_default("SKUSCOUT_HEADLESS", "true"))?;
    let debug_step = parse_bool(
        "SKUSCOUT_DEBUG_STEP",
        &or_default("SKUSCOUT_DEBUG_STEP", "false"),
    )?;

    let batch_size = parse_positive_usize("SKUSCOUT_BATCH_SIZE", "50")?;
    let workers = parse_positive_usize("SKUSCOUT_WORKERS", "2")?;
    let batch_deadline = match lookup("SKUSCOUT_BATCH_DEADLINE_SECS") {
        Ok(raw) if !raw.trim().is_empty() => Some(Duration::from_secs(
            raw.trim()
                .parse::<u64>()
                .map_err(|e| invalid("SKUSCOUT_BATCH_DEADLINE_SECS", e.to_string()))?,
        )),
        _ => None,
    };
    let request_timeout =
        Duration::from_secs(parse_u64("SKUSCOUT_REQUEST_TIMEOUT_SECS", "30")?.max(1));

    let max_transient_attempts = parse_positive_u32("SKUSCOUT_MAX_TRANSIENT_ATTEMPTS", "3")?;
    let max_blocked_attempts = parse_positive_u32("SKUSCOUT_MAX_BLOCKED_ATTEMPTS", "2")?;

    let backoff = BackoffSettings {
        base: Duration::from_millis(parse_u64("SKUSCOUT_BACKOFF_BASE_MS", "1000")?),
        max: Duration::from_millis(parse_u64("SKUSCOUT_BACKOFF_MAX_MS", "30000")?),
        jitter: parse_fraction("SKUSCOUT_BACKOFF_JITTER", "0.5")?,
    };
    if backoff.max < backoff.base {
        return Err(invalid(
            "SKUSCOUT_BACKOFF_MAX_MS",
            "must be greater than or equal to SKUSCOUT_BACKOFF_BASE_MS",
        ));
    }

    let circuit = CircuitSettings {
        window: parse_positive_usize("SKUSCOUT_CIRCUIT_WINDOW", "20")?,
        failure_threshold: parse_positive_u32("SKUSCOUT_CIRCUIT_THRESHOLD", "12")?,
        blocked_weight: parse_positive_u32("SKUSCOUT_CIRCUIT_BLOCKED_WEIGHT", "2")?,
        cooldown: Duration::from_secs(parse_u64("SKUSCOUT_CIRCUIT_COOLDOWN_SECS", "60")?),
        cooldown_max: Duration::from_secs(parse_u64("SKUSCOUT_CIRCUIT_COOLDOWN_MAX_SECS", "900")?),
    };
    if circuit.cooldown_max < circuit.cooldown {
        return Err(invalid(
            "SKUSCOUT_CIRCUIT_COOLDOWN_MAX_SECS",
            "must be greater than or equal to SKUSCOUT_CIRCUIT_COOLDOWN_SECS",
        ));
    }

    let rate_limit = RateLimitSettings {
        base_interval: Duration::from_millis(parse_u64("SKUSCOUT_RATE_BASE_MS", "1500")?),
        floor: Duration::from_millis(parse_u64("SKUSCOUT_RATE_FLOOR_MS", "500")?),
        ceiling: Duration::from_millis(parse_u64("SKUSCOUT_RATE_CEILING_MS", "60000")?),
        backoff_factor: parse_f64("SKUSCOUT_RATE_BACKOFF_FACTOR", "2.0")?,
        recovery_step: Duration::from_millis(parse_u64("SKUSCOUT_RATE_RECOVERY_STEP_MS", "250")?),
        recovery_after: parse_positive_u32("SKUSCOUT_RATE_RECOVERY_AFTER", "5")?,
    };
    if rate_limit.floor > rate_limit.ceiling {
        return Err(invalid(
            "SKUSCOUT_RATE_FLOOR_MS",
            "floor must not exceed SKUSCOUT_RATE_CEILING_MS",
        ));
    }
    if !(1.0..=MAX_RATE_BACKOFF_FACTOR).contains(&rate_limit.backoff_factor) {
        return Err(invalid(
            "SKUSCOUT_RATE_BACKOFF_FACTOR",
            format!("must be between 1.0 and {MAX_RATE_BACKOFF_FACTOR}"),
        ));
    }

    let session = SessionBudget {
        max_requests: parse_positive_u32("SKUSCOUT_SESSION_MAX_REQUESTS", "40")?,
        max_age: Duration::from_secs(parse_u64("SKUSCOUT_SESSION_MAX_AGE_SECS", "600")?),
    };

    let proxies = or_default("SKUSCOUT_PROXIES", "")
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect::<Vec<_>>();
    if let Some(bad) = proxies.iter().find(|p| !p.contains("://")) {
        return Err(invalid(
            "SKUSCOUT_PROXIES",
            format!("proxy entry '{bad}' is missing a scheme"),
        ));
    }

    let quality_threshold = parse_fraction("SKUSCOUT_QUALITY_THRESHOLD", "0.6")?;
    let sites_path = PathBuf::from(or_default("SKUSCOUT_SITES_PATH", "./config/sites.yaml"));
    let log_level = or_default("SKUSCOUT_LOG_LEVEL", "info");

    Ok(EngineConfig {
        headless,
        debug_step,
        batch_size,
        workers,
        batch_deadline,
        request_timeout,
        max_transient_attempts,
        max_blocked_attempts,
        backoff,
        circuit,
        rate_limit,
        session,
        proxies,
        quality_threshold,
        sites_path,
        log_level,
    })
}

/// Parse a boolean toggle. Accepts `true/false`, `1/0`, `yes/no`, `on/off`.
fn parse_bool(var: &str, raw: &str) -> Result<bool, ConfigError> {
    match raw.trim().to_ascii_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Ok(true),
        "false" | "0" | "no" | "off" => Ok(false),
        other => Err(invalid(var, format!("'{other}' is not a boolean"))),
    }
}

#[cfg(test)]
#[path = "config_test.rs"]
mod tests;
