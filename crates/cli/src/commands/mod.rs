pub(crate) mod flow;
pub(crate) mod hash;
pub(crate) mod request;

use std::path::Path;
use std::process;

use serde::de::DeserializeOwned;
use serde::Serialize;
use signflow_core::SignflowConfig;

use crate::{report_error, OutputFormat};

/// Global flags and loaded configuration, shared by every subcommand.
pub(crate) struct Context {
    pub output: OutputFormat,
    pub quiet: bool,
    pub config: SignflowConfig,
}

impl Context {
    /// Report `msg` and exit with status 1.
    pub(crate) fn fail(&self, msg: &str) -> ! {
        report_error(msg, self.output, self.quiet);
        process::exit(1);
    }

    pub(crate) fn read_json<T: DeserializeOwned>(&self, path: &Path) -> T {
        let src = match std::fs::read_to_string(path) {
            Ok(s) => s,
            Err(e) => self.fail(&format!("error reading file '{}': {}", path.display(), e)),
        };
        match serde_json::from_str(&src) {
            Ok(v) => v,
            Err(e) => self.fail(&format!("error parsing JSON in '{}': {}", path.display(), e)),
        }
    }
}

/// Pretty JSON on stdout.
pub(crate) fn print_json<T: Serialize>(value: &T) {
    let pretty = serde_json::to_string_pretty(value)
        .unwrap_or_else(|e| format!("serialization error: {}", e));
    println!("{}", pretty);
}
