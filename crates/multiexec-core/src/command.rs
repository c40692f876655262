//! Jobs and command preparation
//!
//! A job is the work done on every host of a run. Commands are wrapped in a
//! login shell before they reach the transport; `sudo` commands are fed the
//! run's password on stdin.

use std::fmt;
use std::path::Path;

use multiexec_exec::Credentials;

use crate::error::CoreError;

/// Default target directory for uploads
pub const DEFAULT_UPLOAD_DIR: &str = "/tmp/uploads";

/// Work to perform on each host
#[derive(Clone, PartialEq, Eq)]
pub enum Job {
    /// Run a shell command
    Command { command: String },
    /// Upload a script to the user's home, run it with bash, remove it
    Script {
        file_name: String,
        contents: Vec<u8>,
        sudo: bool,
    },
    /// Upload a file into a directory, creating it first
    Upload {
        file_name: String,
        contents: Vec<u8>,
        remote_dir: String,
    },
}

impl Job {
    pub fn command(command: impl Into<String>) -> Self {
        Job::Command {
            command: command.into(),
        }
    }

    /// Short human description used in listings and logs
    #[must_use]
    pub fn label(&self) -> String {
        match self {
            Job::Command { command } => command.trim().to_string(),
            Job::Script { file_name, sudo, .. } => {
                if *sudo {
                    format!("script {file_name} (sudo)")
                } else {
                    format!("script {file_name}")
                }
            }
            Job::Upload {
                file_name,
                remote_dir,
                ..
            } => format!("upload {file_name} -> {remote_dir}"),
        }
    }

    /// Reject jobs that cannot run on any host
    ///
    /// # Errors
    /// `InvalidRequest` for an empty command or a missing file name.
    pub fn validate(&self) -> Result<(), CoreError> {
        match self {
            Job::Command { command } if command.trim().is_empty() => {
                Err(CoreError::InvalidRequest("missing command".to_string()))
            }
            Job::Script { file_name, .. } | Job::Upload { file_name, .. }
                if base_name(file_name).is_none() =>
            {
                Err(CoreError::InvalidRequest("missing file name".to_string()))
            }
            _ => Ok(()),
        }
    }
}

impl fmt::Debug for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Job::Command { command } => f.debug_struct("Command").field("command", command).finish(),
            Job::Script {
                file_name,
                contents,
                sudo,
            } => f
                .debug_struct("Script")
                .field("file_name", file_name)
                .field("bytes", &contents.len())
                .field("sudo", sudo)
                .finish(),
            Job::Upload {
                file_name,
                contents,
                remote_dir,
            } => f
                .debug_struct("Upload")
                .field("file_name", file_name)
                .field("bytes", &contents.len())
                .field("remote_dir", remote_dir)
                .finish(),
        }
    }
}

/// Build the command line sent to the transport
///
/// A leading `sudo ` is replaced by a password-fed `sudo -S`, `apt update`
/// is made non-interactive, and the result runs under `bash -lc`.
#[must_use]
pub fn prepare_command(raw: &str, credentials: &Credentials) -> String {
    let raw = raw.trim();
    let command = match raw.strip_prefix("sudo ") {
        Some(inner) => sudo(&noninteractive_apt(inner.trim_start()), credentials),
        None => noninteractive_apt(raw),
    };
    format!("bash -lc {}", shell_words::quote(&command))
}

fn sudo(inner: &str, credentials: &Credentials) -> String {
    format!(
        "echo {} | sudo -S -p '' {inner}",
        shell_words::quote(&credentials.password)
    )
}

fn noninteractive_apt(command: &str) -> String {
    let mut words = command.splitn(3, char::is_whitespace);
    match (words.next(), words.next()) {
        (Some("apt"), Some("update")) => {
            let rest = words.next().map(str::trim).unwrap_or_default();
            if rest.is_empty() {
                "DEBIAN_FRONTEND=noninteractive apt-get update -y".to_string()
            } else {
                format!("DEBIAN_FRONTEND=noninteractive apt-get update -y {rest}")
            }
        }
        _ => command.to_string(),
    }
}

/// Commands and paths for running an uploaded script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptPlan {
    pub remote_path: String,
    pub run: String,
    pub cleanup: String,
}

impl ScriptPlan {
    #[must_use]
    pub fn new(file_name: &str, sudo_run: bool, credentials: &Credentials) -> Self {
        let home = if credentials.user == "root" {
            "/root".to_string()
        } else {
            format!("/home/{}", credentials.user)
        };
        let name = base_name(file_name).unwrap_or("script.sh");
        let remote_path = format!("{home}/{name}");
        let quoted = shell_words::quote(&remote_path).into_owned();

        let run = format!("bash {quoted}");
        let run = if sudo_run { sudo(&run, credentials) } else { run };

        Self {
            cleanup: format!("rm -f {quoted}"),
            run,
            remote_path,
        }
    }
}

/// Commands and paths for a plain upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadPlan {
    pub mkdir: String,
    pub remote_path: String,
}

impl UploadPlan {
    #[must_use]
    pub fn new(file_name: &str, remote_dir: &str) -> Self {
        let dir = remote_dir.trim();
        let dir = if dir.is_empty() { DEFAULT_UPLOAD_DIR } else { dir };
        let dir = match dir.trim_end_matches('/') {
            "" => "/",
            trimmed => trimmed,
        };
        let name = base_name(file_name).unwrap_or("upload.bin");
        let remote_path = if dir == "/" {
            format!("/{name}")
        } else {
            format!("{dir}/{name}")
        };

        Self {
            mkdir: format!("mkdir -p {}", shell_words::quote(dir)),
            remote_path,
        }
    }
}

/// Final path component, so uploaded names cannot escape their directory
fn base_name(file_name: &str) -> Option<&str> {
    Path::new(file_name.trim())
        .file_name()
        .and_then(|name| name.to_str())
        .filter(|name| !name.is_empty())
}
