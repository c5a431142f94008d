use std::path::Path;

use signflow_core::signature::{derive_effective_status, time_remaining};
use signflow_core::QualifiedSignatureRequest;
use time::format_description::well_known::Rfc3339;
use time::OffsetDateTime;

use super::{print_json, Context};
use crate::OutputFormat;

fn status_name<T: serde::Serialize>(status: T) -> String {
    serde_json::to_value(status)
        .ok()
        .and_then(|v| v.as_str().map(str::to_owned))
        .unwrap_or_default()
}

pub(crate) fn cmd_request_status(ctx: &Context, file: &Path, at: Option<&str>) {
    let request: QualifiedSignatureRequest = ctx.read_json(file);
    let now = match at {
        Some(s) => match OffsetDateTime::parse(s, &Rfc3339) {
            Ok(t) => t,
            Err(e) => ctx.fail(&format!("invalid --at timestamp '{}': {}", s, e)),
        },
        None => OffsetDateTime::now_utc(),
    };

    let effective = derive_effective_status(&request, now);
    let remaining = request.expires_at.map(|exp| time_remaining(exp, now));

    match ctx.output {
        OutputFormat::Text => {
            let mut line = format!("{}: {}", request.id, status_name(effective));
            if effective != request.status {
                line.push_str(&format!(" (stored {})", status_name(request.status)));
            }
            if let (Some(remaining), false) = (&remaining, effective.is_terminal()) {
                line.push_str(&format!(", {} left", remaining));
            }
            println!("{}", line);
        }
        OutputFormat::Json => print_json(&serde_json::json!({
            "id": request.id,
            "document_id": request.document_id,
            "provider": request.provider,
            "stored_status": request.status,
            "effective_status": effective,
            "time_remaining": remaining,
            "document_hash": request.document_hash,
        })),
    }
}
