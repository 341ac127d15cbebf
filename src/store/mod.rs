//! Credential persistence.
//!
//! One [`CredentialBundle`](crate::types::CredentialBundle) is kept behind the
//! [`CredentialStore`] trait; a JSON file and an in-memory implementation are
//! provided.

mod file;
mod memory;
mod traits;

pub use file::*;
pub use memory::*;
pub use traits::*;
