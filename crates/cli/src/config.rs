//! Configuration file loading.
//!
//! An explicit `--config` path must exist. Without one, `signflow.toml` in
//! the working directory is used when present; otherwise defaults apply.

use std::path::Path;

use signflow_core::SignflowConfig;
use tracing::debug;

pub(crate) const DEFAULT_CONFIG_FILE: &str = "signflow.toml";

pub(crate) fn load(path: Option<&Path>) -> Result<SignflowConfig, String> {
    let path = match path {
        Some(p) => p,
        None => {
            let default = Path::new(DEFAULT_CONFIG_FILE);
            if !default.exists() {
                return Ok(SignflowConfig::default());
            }
            default
        }
    };

    let src = std::fs::read_to_string(path)
        .map_err(|e| format!("error reading config '{}': {}", path.display(), e))?;
    let config: SignflowConfig = toml::from_str(&src)
        .map_err(|e| format!("error parsing config '{}': {}", path.display(), e))?;
    config
        .validate()
        .map_err(|e| format!("invalid config '{}': {}", path.display(), e))?;
    debug!(
        path = %path.display(),
        providers = config.providers.len(),
        strict = config.flow.strict,
        "configuration loaded"
    );
    Ok(config)
}
