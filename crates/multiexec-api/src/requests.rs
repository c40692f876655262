//! Request types for the API

use std::fmt;

use serde::{Deserialize, Serialize};
use utoipa::ToSchema;

/// First message a client sends on the dispatch WebSocket
#[derive(Clone, Default, Serialize, Deserialize, ToSchema)]
pub struct DispatchRequest {
    /// Single host, comma list or dash range
    #[serde(default)]
    pub host_range: String,
    /// Host list read client-side from an uploaded file
    #[serde(default)]
    pub hosts_file_lines: Vec<String>,
    #[serde(default)]
    pub ssh_user: String,
    #[serde(default)]
    pub ssh_pass: String,
    #[serde(default)]
    pub command: String,
}

impl fmt::Debug for DispatchRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DispatchRequest")
            .field("host_range", &self.host_range)
            .field("hosts_file_lines", &self.hosts_file_lines.len())
            .field("ssh_user", &self.ssh_user)
            .field("command", &self.command)
            .finish_non_exhaustive()
    }
}

/// Control messages a client may send after the dispatch request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum ControlMessage {
    /// Cancel the run; the server still streams the final summary
    Stop,
}

/// Multipart field names of the upload and script endpoints
pub mod transfer_fields {
    pub const SSH_USER: &str = "ssh_user";
    pub const SSH_PASS: &str = "ssh_pass";
    /// JSON array of host names
    pub const HOSTS: &str = "hosts";
    /// Range string, used when `hosts` is absent or empty
    pub const HOST_RANGE: &str = "host_range";
    /// File to upload (`/upload_file`)
    pub const FILE: &str = "file";
    /// Target directory for the upload
    pub const REMOTE_PATH: &str = "remote_path";
    /// Script to run (`/run_script`)
    pub const SCRIPT: &str = "script";
    /// `true` to run the script through sudo
    pub const SUDO: &str = "sudo";
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_defaults() {
        let req: DispatchRequest =
            serde_json::from_str(r#"{"host_range":"10.0.0.1-3","command":"uptime"}"#).unwrap();
        assert_eq!(req.host_range, "10.0.0.1-3");
        assert!(req.hosts_file_lines.is_empty());
        assert!(req.ssh_user.is_empty());
    }

    #[test]
    fn test_debug_hides_password() {
        let req = DispatchRequest {
            ssh_pass: "hunter2".to_string(),
            ..DispatchRequest::default()
        };
        assert!(!format!("{req:?}").contains("hunter2"));
    }

    #[test]
    fn test_stop_message() {
        let msg: ControlMessage = serde_json::from_str(r#"{"action":"stop"}"#).unwrap();
        assert_eq!(msg, ControlMessage::Stop);
    }
}
