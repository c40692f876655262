//! Actor implementations

pub mod registry;

pub use registry::RunRegistry;
