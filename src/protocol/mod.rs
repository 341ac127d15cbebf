//! Web protocol: endpoints, login handshake, contact cache, sync loop and
//! message normalization.

pub mod api;
mod auth;
mod bus;
mod contacts;
mod message;
pub mod parse;
pub mod request;
mod sync;

pub use api::WebApi;
pub use auth::{login_url, render_qr_ascii, AuthSession, AuthState};
pub use bus::{EventBus, EventHandler};
pub use contacts::ContactDirectory;
pub use message::{classify, media_url, Classification, MessageNormalizer};
pub use sync::{candidate_hosts, SyncEngine, KNOWN_PUSH_HOSTS};
