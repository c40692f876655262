//! Human-readable lines for run events
//!
//! Shared by the exported session log, the line-oriented streaming
//! endpoints and the CLI.

use multiexec_api::{OutputStream, RunEvent, Stage};

/// Label for a host's stage
#[must_use]
pub fn stage_label(stage: Stage, ok: Option<bool>, exit_status: Option<i32>) -> String {
    match stage {
        Stage::Pending => "Pending".to_string(),
        Stage::Connecting => "Connecting...".to_string(),
        Stage::Connected => "Connected".to_string(),
        Stage::CommandStarting => "Starting...".to_string(),
        Stage::CommandStarted => "Running".to_string(),
        Stage::Completed if ok == Some(true) => "Success".to_string(),
        Stage::Completed => match exit_status {
            Some(code) => format!("Failed (exit {code})"),
            None => "Failed".to_string(),
        },
        Stage::ConnectFailed => "Connect failed".to_string(),
        Stage::Error => "Error".to_string(),
        Stage::Stopped => "Stopped".to_string(),
    }
}

/// Render one event as text; output chunks may span several lines
#[must_use]
pub fn describe(event: &RunEvent) -> String {
    match event {
        RunEvent::Init { total_hosts, .. } => format!("Dispatching to {total_hosts} host(s)"),
        RunEvent::HostStatus {
            host,
            stage,
            ok,
            exit_status,
            error,
        } => {
            let label = stage_label(*stage, *ok, *exit_status);
            match error {
                Some(error) => format!("[{host}] {label}: {error}"),
                None => format!("[{host}] {label}"),
            }
        }
        RunEvent::Output { host, stream, data } => {
            let prefix = match stream {
                OutputStream::Stdout => "",
                OutputStream::Stderr => "ERR> ",
            };
            data.trim_end_matches('\n')
                .lines()
                .map(|line| format!("[{host}] {prefix}{line}"))
                .collect::<Vec<_>>()
                .join("\n")
        }
        RunEvent::Summary {
            total_hosts,
            started,
            success,
            failure,
            duration_sec,
            ..
        } => format!(
            "Summary: total={total_hosts} started={started} success={success} \
             failure={failure} duration={duration_sec:.2}s"
        ),
        RunEvent::Done { .. } => "Run finished".to_string(),
        RunEvent::Error { message } => format!("Error: {message}"),
    }
}
