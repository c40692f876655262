//! API route handlers

pub mod error;
pub mod openapi;
pub mod runs;
pub mod system;
pub mod transfer;
pub mod ws;

pub use error::{ApiError, AppError};
