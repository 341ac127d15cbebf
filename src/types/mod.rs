//! Core types: credentials, contacts and events.

mod contact;
mod credentials;
mod events;

pub use contact::*;
pub use credentials::*;
pub use events::*;
