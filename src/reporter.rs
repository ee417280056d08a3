use serde_json::json;

use crate::types::{ExitSummary, SignalEvent};

/// Emit a published signal as a single JSON line to stdout.
pub fn report_signal(topic: &str, event: &SignalEvent) -> Result<(), serde_json::Error> {
    let line = serde_json::to_string(&json!({ "topic": topic, "signal": event }))?;
    println!("{line}");
    Ok(())
}

/// Emit the exit summary as pretty-printed JSON to stdout.
pub fn report_exit_summary(summary: &ExitSummary) {
    if let Ok(json) = serde_json::to_string_pretty(summary) {
        println!("{json}");
    }
}
