//! Flow subcommands. Each one reads a JSON document, runs the engine once,
//! and prints the result; nothing is persisted.

use std::path::Path;

use signflow_core::flow::{progress, validate};
use signflow_core::{Actor, ApprovalFlow, EngineMode, FlowEngine, NewFlow};
use tracing::info;

use super::{print_json, Context};
use crate::OutputFormat;

fn engine(ctx: &Context) -> FlowEngine {
    let mode = if ctx.config.flow.strict {
        EngineMode::Strict
    } else {
        EngineMode::Lenient
    };
    FlowEngine::new().with_mode(mode)
}

/// Accept either a step id or a step number.
fn resolve_step(flow: &ApprovalFlow, step: &str) -> String {
    if flow.step(step).is_some() {
        return step.to_string();
    }
    match step.parse::<u32>().ok().and_then(|n| flow.step_by_number(n)) {
        Some(s) => s.id.clone(),
        // Unknown ids go through to the engine, which decides per mode.
        None => step.to_string(),
    }
}

fn actor(id: &str, name: Option<&str>) -> Actor {
    Actor::new(id, name.unwrap_or(id))
}

pub(crate) fn cmd_create_flow(ctx: &Context, file: &Path) {
    let new: NewFlow = ctx.read_json(file);
    let flow = engine(ctx).create_flow(new);
    let report = validate(&flow);
    if !report.valid {
        ctx.fail(&format!("invalid flow: {}", report.errors.join("; ")));
    }
    info!(flow_id = %flow.id, steps = flow.steps.len(), "flow created");
    print_json(&flow);
}

pub(crate) fn cmd_validate(ctx: &Context, file: &Path) {
    let flow: ApprovalFlow = ctx.read_json(file);
    let report = validate(&flow);

    if report.valid {
        if !ctx.quiet {
            match ctx.output {
                OutputFormat::Text => println!("valid"),
                OutputFormat::Json => print_json(&report),
            }
        }
        return;
    }

    match ctx.output {
        OutputFormat::Text => {
            if !ctx.quiet {
                eprintln!("invalid flow");
                for err in &report.errors {
                    eprintln!("  - {}", err);
                }
            }
        }
        OutputFormat::Json => {
            eprintln!(
                "{}",
                serde_json::to_string_pretty(&report).unwrap_or_default()
            );
        }
    }
    std::process::exit(1);
}

pub(crate) fn cmd_progress(ctx: &Context, file: &Path) {
    let flow: ApprovalFlow = ctx.read_json(file);
    let p = progress(&flow);
    match ctx.output {
        OutputFormat::Text => println!(
            "{}/{} steps ({}%), {}/{} signatures, status {}",
            p.completed_steps,
            p.total_steps,
            p.percentage,
            p.completed_signatures,
            p.total_signatures,
            serde_json::to_value(flow.status)
                .ok()
                .and_then(|v| v.as_str().map(str::to_owned))
                .unwrap_or_default(),
        ),
        OutputFormat::Json => print_json(&p),
    }
}

pub(crate) fn cmd_approve(
    ctx: &Context,
    file: &Path,
    step: &str,
    approver: &str,
    name: Option<&str>,
    comments: Option<&str>,
) {
    let flow: ApprovalFlow = ctx.read_json(file);
    let step_id = resolve_step(&flow, step);
    match engine(ctx).approve(&flow, &step_id, &actor(approver, name), comments, None) {
        Ok(next) => print_json(&next),
        Err(e) => ctx.fail(&e.to_string()),
    }
}

pub(crate) fn cmd_reject(
    ctx: &Context,
    file: &Path,
    step: &str,
    approver: &str,
    name: Option<&str>,
    reason: &str,
) {
    let flow: ApprovalFlow = ctx.read_json(file);
    let step_id = resolve_step(&flow, step);
    match engine(ctx).reject(&flow, &step_id, &actor(approver, name), reason) {
        Ok(next) => print_json(&next),
        Err(e) => ctx.fail(&e.to_string()),
    }
}

pub(crate) fn cmd_cancel(ctx: &Context, file: &Path, user: &str, name: Option<&str>, reason: &str) {
    let flow: ApprovalFlow = ctx.read_json(file);
    print_json(&engine(ctx).cancel(&flow, &actor(user, name), reason));
}
