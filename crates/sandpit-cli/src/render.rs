// src/render.rs

use sandpit_core::{ExecutionResult, FaultKind, Severity};

const ERROR_PREFIX: &str = "! ";

/// One output line per transcript line; error lines carry the `! ` prefix on
/// every physical line so multi-line renderings stay marked.
pub fn format_transcript(result: &ExecutionResult) -> String {
    let mut out = String::new();
    for line in result.transcript.lines() {
        for physical in line.text.split('\n') {
            if line.severity == Severity::Error {
                out.push_str(ERROR_PREFIX);
            }
            out.push_str(physical);
            out.push('\n');
        }
    }
    out
}

pub fn status_line(result: &ExecutionResult) -> String {
    let mut status = if result.had_error {
        let kinds: Vec<&str> = result
            .faults
            .iter()
            .map(|fault| match fault.kind {
                FaultKind::Compile => "compile",
                FaultKind::Runtime => "runtime",
                FaultKind::Late => "late",
            })
            .collect();
        if kinds.is_empty() {
            format!("error in {} ms", result.elapsed_ms)
        } else {
            format!("error in {} ms ({})", result.elapsed_ms, kinds.join(", "))
        }
    } else {
        format!("ok in {} ms", result.elapsed_ms)
    };
    if result.cancelled {
        status.push_str(", flush window cancelled");
    }
    status
}
