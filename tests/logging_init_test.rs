//! Global subscriber installation.
//!
//! Installing the process-wide subscriber would swallow the captured logs of
//! `#[traced_test]` unit tests, so it runs in its own test binary.

use smart_lpm::config::Settings;
use smart_lpm::logging::{self, OutputFormat, TracingConfig};
use tracing::Level;

#[test]
fn test_init_is_idempotent() {
    let config = TracingConfig::new(Level::ERROR).with_format(OutputFormat::Compact);
    assert!(logging::init(config.clone()).is_ok());
    assert!(logging::init(config).is_ok());

    // a second install from settings is not an error either
    assert!(logging::init_from_settings(&Settings::default()).is_ok());
}
