//! multiexec-exec: Remote execution abstraction
//!
//! Session-scoped transport used by the dispatch engine: open a session to a
//! host, run commands and upload files over it, close it. Ships an SSH
//! implementation (russh + SFTP) and a local `sh -c` implementation.

pub mod error;
pub mod local;
pub mod result;
pub mod ssh;
pub mod traits;

pub use error::ExecError;
pub use local::LocalExecutor;
pub use result::{CollectedOutput, Credentials, HostTarget, StreamKind};
pub use ssh::{SshConfig, SshExecutor};
pub use traits::{OutputSink, RemoteExecutor, RemoteSession};
