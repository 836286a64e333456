//! Connection Management Module
//! 
//! Tracks live client connections: the shared registry and the per-connection
//! outbound handle stored in it.

pub mod handle;
pub mod registry;

#[cfg(test)]
pub(crate) mod test_support;

pub use handle::ConnectionHandle;
pub use registry::{ConnectionRegistry, RegistrationGuard, RegistryError, RegistryStats};
