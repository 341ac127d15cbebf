//! wxchat-rust: WeChat web protocol client library.
//!
//! Logs in through the QR-code handshake, keeps the session alive with the
//! long-poll sync loop and exposes inbound events plus outbound sends.
//!
//! ## Modules
//!
//! - `types` - Contacts, credentials and events
//! - `protocol` - Endpoints, login, contact directory, sync and normalization
//! - `transport` - HTTP abstraction with a `reqwest` implementation and a mock
//! - `store` - Credential persistence
//! - `config` - Configuration management
//! - `state` - Shared session state

pub mod protocol;
pub mod store;
pub mod transport;
pub mod types;

mod client;
mod config;
mod error;
mod state;

pub use client::Client;
pub use config::WxConfig;
pub use error::{ClientError, Result};
pub use state::SessionState;

pub use protocol::{AuthState, EventBus};
pub use store::{CredentialStore, JsonFileStore, MemoryCredentialStore, StoreError};
pub use transport::{Transport, TransportError, ReqwestTransport};
pub use types::{
    Contact, ContactKind, CredentialBundle, Event, EventKind, MessageEvent, MessageKind,
    MessageType,
};
