//! Grader configuration.
//!
//! Sources in priority order (lowest to highest):
//! 1. Code defaults (the 64 host threads + 4096 lanes scenario).
//! 2. TOML file named by the `HETSYNC_CONFIG` environment variable.
//! 3. Environment variables prefixed with `HETSYNC_`, e.g.
//!    `HETSYNC_LANES=1024` or `HETSYNC_BACKEND=threads`.
//!
//! ```toml
//! host_threads = 8
//! lanes = 512
//! backend = "sequential"
//! trials = 100
//! ```

use figment::{
    Figment, Provider,
    providers::{Env, Format, Serialized, Toml},
};
use hetsync::{Backend, Offload, offload::OffloadError};
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

/// ENV naming an optional TOML configuration file.
const CONFIG_PATH_ENV: &str = "HETSYNC_CONFIG";

/// Prefix of configuration environment variables.
const ENV_PREFIX: &str = "HETSYNC_";

/// Configuration errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to extract configuration: {0}")]
    Extraction(#[from] Box<figment::Error>),

    #[error("`{0}` must be at least 1")]
    Zero(&'static str),
}

/// Parameters of the scenario suites.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct GraderConfig {
    /// Number of host threads contending with the offloaded task.
    pub host_threads: usize,
    /// Number of lanes of the offloaded task.
    pub lanes: usize,
    /// How lanes are executed.
    pub backend: Backend,
    /// OS threads backing the lanes; `None` = one per CPU.
    pub workers: Option<usize>,
    /// Number of repetitions for the visibility trials.
    pub trials: usize,
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            host_threads: 64,
            lanes: 4096,
            backend: Backend::Rayon,
            workers: None,
            trials: 1000,
        }
    }
}

impl GraderConfig {
    /// The layered configuration sources.
    pub fn figment() -> Figment {
        let mut figment = Figment::new().merge(Serialized::defaults(GraderConfig::default()));
        if let Ok(path) = std::env::var(CONFIG_PATH_ENV) {
            figment = figment.merge(Toml::file(path));
        }
        figment.merge(Env::prefixed(ENV_PREFIX).ignore(&["log", "config"]))
    }

    /// Loads the configuration from the default sources.
    pub fn load() -> Result<Self, ConfigError> {
        Self::extract_from(Self::figment())
    }

    /// Extracts and validates the configuration from any provider.
    pub fn extract_from<T: Provider>(provider: T) -> Result<Self, ConfigError> {
        let config: Self = Figment::from(provider)
            .extract()
            .map_err(|e| ConfigError::Extraction(Box::new(e)))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.lanes == 0 {
            return Err(ConfigError::Zero("lanes"));
        }
        if self.trials == 0 {
            return Err(ConfigError::Zero("trials"));
        }
        if self.workers == Some(0) {
            return Err(ConfigError::Zero("workers"));
        }
        Ok(())
    }

    /// Builds the configured offload backend.
    pub fn offload(&self) -> Result<Box<dyn Offload>, OffloadError> {
        self.backend.build(self.workers)
    }
}

static CONFIG: OnceLock<GraderConfig> = OnceLock::new();

/// Makes `config` the configuration returned by [`get`].
///
/// Only the first call has an effect.
pub fn install(config: GraderConfig) {
    if CONFIG.set(config).is_err() {
        tracing::warn!("grader configuration already installed");
    }
}

/// The installed configuration, or the defaults if none was installed.
pub fn get() -> &'static GraderConfig {
    CONFIG.get_or_init(GraderConfig::default)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VARS: [&str; 6] = [
        "HETSYNC_CONFIG",
        "HETSYNC_HOST_THREADS",
        "HETSYNC_LANES",
        "HETSYNC_BACKEND",
        "HETSYNC_WORKERS",
        "HETSYNC_TRIALS",
    ];

    #[test]
    fn defaults_match_reference_scenario() {
        temp_env::with_vars_unset(VARS, || {
            let config = GraderConfig::load().unwrap();
            assert_eq!(config, GraderConfig::default());
            assert_eq!(config.host_threads + config.lanes, 4160);
        });
    }

    #[test]
    fn env_overrides_defaults() {
        temp_env::with_vars(
            [
                ("HETSYNC_CONFIG", None),
                ("HETSYNC_LANES", Some("128")),
                ("HETSYNC_BACKEND", Some("sequential")),
                ("HETSYNC_WORKERS", Some("2")),
                ("HETSYNC_LOG", Some("hetsync=trace")),
            ],
            || {
                let config = GraderConfig::load().unwrap();
                assert_eq!(config.lanes, 128);
                assert_eq!(config.backend, Backend::Sequential);
                assert_eq!(config.workers, Some(2));
                assert_eq!(config.host_threads, 64);
            },
        );
    }

    #[test]
    fn tuple_override_and_validation() {
        temp_env::with_vars_unset(VARS, || {
            let config =
                GraderConfig::extract_from(GraderConfig::figment().merge(("host_threads", 3usize)))
                    .unwrap();
            assert_eq!(config.host_threads, 3);

            let err = GraderConfig::extract_from(GraderConfig::figment().merge(("lanes", 0usize)))
                .unwrap_err();
            assert!(matches!(err, ConfigError::Zero("lanes")));
        });
    }

    #[test]
    fn backend_name_is_case_insensitive() {
        temp_env::with_vars([("HETSYNC_CONFIG", None), ("HETSYNC_BACKEND", Some("Threads"))], || {
            let config = GraderConfig::load().unwrap();
            assert_eq!(config.backend, "Threads".parse().unwrap());
            assert_eq!(config.backend, Backend::Threads);
        });
    }

    #[test]
    fn unknown_backend_is_rejected() {
        temp_env::with_vars([("HETSYNC_CONFIG", None), ("HETSYNC_BACKEND", Some("gpu"))], || {
            assert!(matches!(
                GraderConfig::load(),
                Err(ConfigError::Extraction(_))
            ));
        });
    }
}
