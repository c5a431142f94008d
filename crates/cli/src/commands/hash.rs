use std::path::Path;

use signflow_core::DocumentHash;

use super::{print_json, Context};
use crate::OutputFormat;

pub(crate) fn cmd_hash(ctx: &Context, file: &Path, verify: Option<&str>) {
    let content = match std::fs::read_to_string(file) {
        Ok(s) => s,
        Err(e) => ctx.fail(&format!("error reading file '{}': {}", file.display(), e)),
    };

    let Some(expected) = verify else {
        let hash = DocumentHash::compute(&content);
        match ctx.output {
            OutputFormat::Text => println!("{}", hash),
            OutputFormat::Json => print_json(&hash),
        }
        return;
    };

    let expected = DocumentHash::detect(expected.trim());
    if !expected.verify(&content) {
        ctx.fail(&format!(
            "hash mismatch for '{}': document does not match {}",
            file.display(),
            expected
        ));
    }
    if !ctx.quiet {
        match ctx.output {
            OutputFormat::Text => println!("match"),
            OutputFormat::Json => print_json(&serde_json::json!({
                "match": true,
                "algorithm": expected.algorithm,
            })),
        }
    }
}
