//! Configuration validation.

use crate::config::Config;
use crate::proxy::UpstreamTarget;

/// Validate the configuration.
///
/// Checks for:
/// - At least one backend
/// - Every backend address is a usable `http://` base URL
/// - A known log level
///
/// # Returns
///
/// `Ok(())` if valid, or an error message describing every problem found.
pub fn validate_config(config: &Config) -> Result<(), String> {
    let mut errors = Vec::new();

    if config.backends.is_empty() {
        errors.push("at least one backend must be defined".to_string());
    }

    for server in &config.backends {
        if let Err(e) = UpstreamTarget::parse(&server.address) {
            errors.push(format!("invalid backend address '{}': {}", server.address, e));
        }
    }

    let valid_levels = ["trace", "debug", "info", "warn", "error"];
    if !valid_levels.contains(&config.global.log_level.to_lowercase().as_str()) {
        errors.push(format!(
            "invalid log level '{}', must be one of: {}",
            config.global.log_level,
            valid_levels.join(", ")
        ));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors.join("; "))
    }
}
