use std::fs;
use std::time::Duration;

use anyhow::Result;
use tempfile::tempdir;

use layout_runtime::form::EarlyValidation;
use layout_runtime::{BackoffLadder, RuntimeConfig, SystemClock, TokioSleeper};

// Environment variables are process wide, so every assertion that touches
// them lives in this single test.
#[test]
fn environment_overrides_the_config_file() -> Result<()> {
    let dir = tempdir()?;
    let path = dir.path().join("layout-runtime.yaml");
    fs::write(
        &path,
        "backoff_ladder_secs: [2, 4]\nearly_validation_delay_ms: 250\nlogging:\n  level: warn\n",
    )?;

    let config = RuntimeConfig::load(Some(&path))?;
    assert_eq!(config.ladder()?, BackoffLadder::from_secs_f64(&[2.0, 4.0])?);
    assert_eq!(
        config.early_validation(),
        EarlyValidation::Delay(Duration::from_millis(250))
    );
    assert_eq!(config.logging.level, "warn");

    std::env::set_var("LAYOUT_RUNTIME__LOGGING__LEVEL", "debug");
    std::env::set_var("LAYOUT_RUNTIME__BACKOFF_LADDER_SECS", "1,1.5");
    std::env::set_var("LAYOUT_RUNTIME__FIELD_PROCESS_DELAY_MS", "10");
    let overridden = RuntimeConfig::load(Some(&path));
    std::env::remove_var("LAYOUT_RUNTIME__LOGGING__LEVEL");
    std::env::remove_var("LAYOUT_RUNTIME__BACKOFF_LADDER_SECS");
    std::env::remove_var("LAYOUT_RUNTIME__FIELD_PROCESS_DELAY_MS");

    let overridden = overridden?;
    assert_eq!(overridden.logging.level, "debug");
    assert_eq!(overridden.backoff_ladder_secs, vec![1.0, 1.5]);
    assert_eq!(overridden.process_delay(), Duration::from_millis(10));

    let processor = overridden.field_processor(
        std::sync::Arc::new(SystemClock),
        std::sync::Arc::new(TokioSleeper),
    )?;
    assert_eq!(
        processor.ladder().steps(),
        &[Duration::from_secs(1), Duration::from_millis(1500)]
    );
    Ok(())
}
