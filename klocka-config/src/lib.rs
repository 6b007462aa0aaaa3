//! # Klocka Configuration System
//!
//! Hierarchical configuration for the virtual clock engine, its telemetry and
//! the scenario simulator.
//!
//! ## Features
//! - **Unified Configuration**: Single source of truth across all crates
//! - **Validation**: Runtime validation of every numeric limit
//! - **Environment Awareness**: Per-environment YAML overrides and `KLOCKA_*` variables

#![warn(unsafe_code)]
#![deny(rustdoc::broken_intra_doc_links)]

use std::path::Path;

use figment::{
    providers::{Env, Format, Serialized, Yaml},
    Figment,
};
use serde::{Deserialize, Serialize};
use validator::Validate;

mod clock;
mod error;
mod simulator;
mod telemetry;
mod validation;

pub use clock::ClockConfig;
pub use error::ConfigError;
pub use simulator::SimulatorConfig;
pub use telemetry::TelemetryConfig;

const BASE_FILE: &str = "config/klocka.yaml";
const ENV_PREFIX: &str = "KLOCKA_";

/// Top‑level configuration container.
#[derive(Debug, Serialize, Deserialize, Validate, Default, Clone, PartialEq, Eq)]
pub struct KlockaConfig {
    /// Engine limits.
    #[serde(default)]
    #[validate(nested)]
    pub clock: ClockConfig,

    /// Logging and metrics.
    #[serde(default)]
    #[validate(nested)]
    pub telemetry: TelemetryConfig,

    /// Scenario runner and fuzzer.
    #[serde(default)]
    #[validate(nested)]
    pub simulator: SimulatorConfig,
}

impl KlockaConfig {
    /// Load configuration from default files and environment.
    ///
    /// Hierarchy:
    /// 1. Default values
    /// 2. `config/klocka.yaml`, skipped if missing
    /// 3. `config/<KLOCKA_ENV>.yaml`, environment‑specific overrides
    /// 4. `KLOCKA_*` environment variables, `__` separating nested keys
    pub fn load() -> Result<Self, ConfigError> {
        let mut figment = Figment::from(Serialized::defaults(KlockaConfig::default()));

        if Path::new(BASE_FILE).exists() {
            figment = figment.merge(Yaml::file(BASE_FILE));
        }

        let env = std::env::var("KLOCKA_ENV").unwrap_or_else(|_| "test".into());
        let env_file = format!("config/{}.yaml", env);
        if Path::new(&env_file).exists() {
            figment = figment.merge(Yaml::file(env_file));
        }

        Self::extract_validated(figment.merge(Env::prefixed(ENV_PREFIX).split("__")))
    }

    /// Load configuration from a specific path, still honouring `KLOCKA_*`.
    pub fn load_from_path<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.to_path_buf()));
        }

        let figment = Figment::from(Serialized::defaults(KlockaConfig::default()))
            .merge(Yaml::file(path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"));
        Self::extract_validated(figment)
    }

    fn extract_validated(figment: Figment) -> Result<Self, ConfigError> {
        figment
            .extract()
            .map_err(ConfigError::from)
            .and_then(|config: Self| {
                config.validate()?;
                Ok(config)
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_full_config_validation() {
        let config = KlockaConfig::default();
        config.validate().expect("Default config should validate");
        assert_eq!(config.clock.flush_timeout_ms, 3_600_000);
        assert_eq!(config.clock.drain_limit, None);
    }

    #[test]
    fn test_missing_files_fall_back_to_defaults() {
        Jail::expect_with(|_jail| {
            let config = KlockaConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config, KlockaConfig::default());
            Ok(())
        });
    }

    #[test]
    fn test_base_file_then_environment_override() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file(
                "config/klocka.yaml",
                "clock:\n  flush_timeout_ms: 5000\n  drain_limit: 64\ntelemetry:\n  log_level: debug\n",
            )?;
            jail.set_env("KLOCKA_CLOCK__DRAIN_LIMIT", "128");

            let config = KlockaConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.clock.flush_timeout_ms, 5000);
            assert_eq!(config.clock.drain_limit, Some(128));
            assert_eq!(config.telemetry.log_level, "debug");
            Ok(())
        });
    }

    #[test]
    fn test_environment_file_overrides_base() {
        Jail::expect_with(|jail| {
            jail.create_dir("config")?;
            jail.create_file("config/klocka.yaml", "simulator:\n  seed: 1\n")?;
            jail.create_file("config/ci.yaml", "simulator:\n  seed: 7\n")?;
            jail.set_env("KLOCKA_ENV", "ci");

            let config = KlockaConfig::load().map_err(|e| e.to_string())?;
            assert_eq!(config.simulator.seed, 7);
            Ok(())
        });
    }

    #[test]
    fn test_invalid_values_are_rejected() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "bad.yaml",
                "clock:\n  drain_limit: 0\ntelemetry:\n  log_level: loud\n",
            )?;

            match KlockaConfig::load_from_path("bad.yaml") {
                Err(ConfigError::Validation(errors)) => {
                    let rendered = ConfigError::Validation(errors).to_string();
                    assert!(rendered.contains("invalid_log_level"));
                }
                other => panic!("expected validation error, got {other:?}"),
            }
            Ok(())
        });
    }

    #[test]
    fn test_load_from_missing_path_fails() {
        let err = KlockaConfig::load_from_path("does/not/exist.yaml").unwrap_err();
        assert!(matches!(err, ConfigError::FileNotFound(_)));
    }
}
