pub mod display;
pub mod types;
pub mod validate;

use crate::error::{Result, ServerError};
use std::path::Path;

pub use display::display_config;
pub use types::{AppConfig, RouteConfig, ServerConfig};
pub use validate::validate_configs;

/// Loads, parses and validates a configuration file, returning the set of
/// server blocks the event loop should bind and route against.
pub fn load_config(path: impl AsRef<Path>) -> Result<Vec<ServerConfig>> {
    let raw = std::fs::read_to_string(path)?;
    let parsed: AppConfig = serde_yaml::from_str(&raw)?;
    if parsed.servers.is_empty() {
        return Err(ServerError::Config(
            "configuration defines no server blocks".to_string(),
        ));
    }
    let validated = validate_configs(parsed.servers);
    if validated.is_empty() {
        return Err(ServerError::Config(
            "no server blocks survived validation".to_string(),
        ));
    }
    Ok(validated)
}
