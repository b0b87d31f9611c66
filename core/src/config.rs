//! Environment-derived limits for the execution subsystem. Hosts may rename
//! the variables; the clamps are not negotiable.

use std::time::Duration;

pub const YIELD_MS_ENV: &str = "BASH_YIELD_MS";
pub const MAX_OUTPUT_CHARS_ENV: &str = "BASH_MAX_OUTPUT_CHARS";
pub const JOB_TTL_MS_ENV: &str = "BASH_JOB_TTL_MS";

pub(crate) const MIN_YIELD_MS: u64 = 1_000;
pub(crate) const MAX_YIELD_MS: u64 = 120_000;
const DEFAULT_YIELD_MS: u64 = 60_000;

const MIN_OUTPUT_CHARS: u64 = 1_000;
const MAX_OUTPUT_CHARS: u64 = 150_000;
const DEFAULT_OUTPUT_CHARS: u64 = 30_000;

const MIN_JOB_TTL_MS: u64 = 60_000;
const MAX_JOB_TTL_MS: u64 = 10_800_000; // 3h
const DEFAULT_JOB_TTL_MS: u64 = 1_800_000; // 30min

/// Limits shared by the registry and supervisor. Built from the environment
/// once for the process-wide registry; tests construct their own.
#[derive(Debug, Clone)]
pub struct ExecStreamConfig {
    /// Default yield window when a start call does not pass one.
    pub yield_ms: u64,
    /// Output ring cap, in characters.
    pub max_output_chars: usize,
    /// How long finished sessions stay visible before the sweeper evicts them.
    pub job_ttl: Duration,
}

impl Default for ExecStreamConfig {
    fn default() -> Self {
        Self {
            yield_ms: DEFAULT_YIELD_MS,
            max_output_chars: DEFAULT_OUTPUT_CHARS as usize,
            job_ttl: Duration::from_millis(DEFAULT_JOB_TTL_MS),
        }
    }
}

impl ExecStreamConfig {
    pub fn from_env() -> Self {
        Self {
            yield_ms: env_limit(YIELD_MS_ENV, DEFAULT_YIELD_MS, MIN_YIELD_MS, MAX_YIELD_MS),
            max_output_chars: env_limit(
                MAX_OUTPUT_CHARS_ENV,
                DEFAULT_OUTPUT_CHARS,
                MIN_OUTPUT_CHARS,
                MAX_OUTPUT_CHARS,
            ) as usize,
            job_ttl: Duration::from_millis(env_limit(
                JOB_TTL_MS_ENV,
                DEFAULT_JOB_TTL_MS,
                MIN_JOB_TTL_MS,
                MAX_JOB_TTL_MS,
            )),
        }
    }

    /// Resolves the yield window for one start call: the request value wins
    /// over the environment default, and both are clamped the same way.
    pub(crate) fn clamp_yield_ms(&self, requested: Option<u64>) -> u64 {
        requested
            .unwrap_or(self.yield_ms)
            .clamp(MIN_YIELD_MS, MAX_YIELD_MS)
    }
}

fn env_limit(name: &str, default: u64, min: u64, max: u64) -> u64 {
    match std::env::var(name) {
        Ok(raw) => match raw.trim().parse::<u64>() {
            Ok(value) => value.clamp(min, max),
            Err(_) => {
                tracing::warn!(name, raw, "ignoring unparseable limit override");
                default
            }
        },
        Err(_) => default,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn yield_window_clamps_both_ends() {
        let config = ExecStreamConfig::default();
        assert_eq!(config.clamp_yield_ms(Some(0)), MIN_YIELD_MS);
        assert_eq!(config.clamp_yield_ms(Some(50)), MIN_YIELD_MS);
        assert_eq!(config.clamp_yield_ms(Some(5_000)), 5_000);
        assert_eq!(config.clamp_yield_ms(Some(999_999)), MAX_YIELD_MS);
    }

    #[test]
    fn yield_window_defaults_from_config() {
        let config = ExecStreamConfig {
            yield_ms: 2_000,
            ..ExecStreamConfig::default()
        };
        assert_eq!(config.clamp_yield_ms(None), 2_000);
    }

    #[test]
    fn defaults_match_documented_limits() {
        let config = ExecStreamConfig::default();
        assert_eq!(config.yield_ms, 60_000);
        assert_eq!(config.max_output_chars, 30_000);
        assert_eq!(config.job_ttl, Duration::from_secs(30 * 60));
    }
}
