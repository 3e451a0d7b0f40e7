//! Layered configuration loading: defaults, then an optional TOML file,
//! then environment overrides, in that precedence order.

use std::path::Path;

use leadline_error::ErrorClass;
use leadline_error::PipelineError;

use crate::AppConfig;
use crate::env_loader::apply_env_overrides;

/// Loads configuration: start from [`AppConfig::default`], merge in
/// `path` if it exists (a missing file is not an error — it just means
/// "use defaults"), then apply environment overrides.
pub fn load(path: Option<&Path>) -> Result<AppConfig, PipelineError> {
    let mut config = match path {
        Some(p) if p.exists() => load_file(p)?,
        _ => AppConfig::default(),
    };
    apply_env_overrides(&mut config);
    Ok(config)
}

fn load_file(path: &Path) -> Result<AppConfig, PipelineError> {
    let raw = std::fs::read_to_string(path).map_err(|e| {
        PipelineError::new(
            ErrorClass::Fatal,
            "config_io",
            format!("reading {}: {e}", path.display()),
        )
    })?;
    toml::from_str(&raw).map_err(|e| {
        PipelineError::new(
            ErrorClass::Fatal,
            "config_parse",
            format!("parsing {}: {e}", path.display()),
        )
    })
}
