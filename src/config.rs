//! Runtime configuration
//!
//! Values come from an optional YAML file layered under `LAYOUT_RUNTIME__*`
//! environment variables, e.g. `LAYOUT_RUNTIME__LOGGING__LEVEL=debug` or
//! `LAYOUT_RUNTIME__BACKOFF_LADDER_SECS=1,2,4`.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use config::{Config, Environment, File, FileFormat};
use layout_core_types::{Clock, TaskSleeper};
use layout_retry::BackoffLadder;
use serde::{Deserialize, Serialize};
use crate::errors::RuntimeResult;
use crate::form::{EarlyValidation, FieldProcessor, ValidationTiming};

pub const ENV_PREFIX: &str = "LAYOUT_RUNTIME";
pub const APP_DIR: &str = "layout-runtime";

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Retry delays in seconds; the last rung repeats.
    pub backoff_ladder_secs: Vec<f64>,
    /// Delay before a field's first processing attempt.
    pub field_process_delay_ms: u64,
    /// Delay before an asynchronous validator starts on its own.
    pub early_validation_delay_ms: u64,
    /// Minimum time a form stays `Validating` while waiting on fields.
    pub min_validation_time_ms: u64,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    pub level: String,
    pub json: bool,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backoff_ladder_secs: vec![3.0, 6.0, 12.0, 15.0],
            field_process_delay_ms: 1000,
            early_validation_delay_ms: 1000,
            min_validation_time_ms: 0,
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl RuntimeConfig {
    /// Loads the configuration.
    ///
    /// File priority: `path` > `./config/layout-runtime.yaml` >
    /// `<config dir>/layout-runtime/config.yaml`. A missing file is not an
    /// error; environment variables always win.
    pub fn load(path: Option<&Path>) -> RuntimeResult<Self> {
        let mut builder = Config::builder();
        if let Some(file) = Self::file_path(path) {
            builder = builder.add_source(
                File::from(file.as_path())
                    .format(FileFormat::Yaml)
                    .required(path.is_some()),
            );
        }

        let config: RuntimeConfig = builder
            .add_source(
                Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("backoff_ladder_secs"),
            )
            .build()?
            .try_deserialize()?;

        config.ladder()?;
        Ok(config)
    }

    /// File `load` reads for `path`, if any.
    pub fn file_path(path: Option<&Path>) -> Option<PathBuf> {
        match path {
            Some(path) => Some(path.to_path_buf()),
            None => default_config_path(),
        }
    }

    pub fn ladder(&self) -> RuntimeResult<BackoffLadder> {
        Ok(BackoffLadder::from_secs_f64(&self.backoff_ladder_secs)?)
    }

    pub fn process_delay(&self) -> Duration {
        Duration::from_millis(self.field_process_delay_ms)
    }

    pub fn early_validation(&self) -> EarlyValidation {
        EarlyValidation::Delay(Duration::from_millis(self.early_validation_delay_ms))
    }

    pub fn validation_timing(
        &self,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn TaskSleeper>,
    ) -> ValidationTiming {
        ValidationTiming::new(Duration::from_millis(self.min_validation_time_ms), clock, sleeper)
    }

    /// Processor using the configured ladder and the given time sources.
    pub fn field_processor(
        &self,
        clock: Arc<dyn Clock>,
        sleeper: Arc<dyn TaskSleeper>,
    ) -> RuntimeResult<FieldProcessor> {
        Ok(FieldProcessor::new()
            .with_clock(clock)
            .with_sleeper(sleeper)
            .with_ladder(self.ladder()?))
    }
}

fn default_config_path() -> Option<PathBuf> {
    let local = PathBuf::from("config").join(format!("{APP_DIR}.yaml"));
    if local.exists() {
        return Some(local);
    }
    dirs::config_dir().map(|dir| dir.join(APP_DIR).join("config.yaml"))
}
