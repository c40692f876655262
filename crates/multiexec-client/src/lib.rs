//! multiexec-client: HTTP and WebSocket client library
//!
//! Provides the WebSocket dispatch client and an HTTP client for the REST
//! and streaming transfer endpoints of the multiexec daemon.
//!
//! # Examples
//!
//! ## HTTP Client
//!
//! ```no_run
//! use multiexec_client::HttpClient;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let client = HttpClient::new("http://localhost:8080")?;
//!
//! let health = client.health().await?;
//! println!("Status: {}", health.status);
//!
//! for run in client.list_runs().await? {
//!     println!("{} {} {:?}", run.id, run.job, run.phase);
//! }
//! # Ok(())
//! # }
//! ```

pub mod error;
pub mod http;
pub mod sse;
pub mod ws;

pub use error::{ClientError, Result};
pub use http::{HttpClient, SseLines, TransferTarget};
pub use sse::SseDecoder;
pub use ws::DispatchClient;
