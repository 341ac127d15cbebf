//! HTTP transport layer.
//!
//! Provides the [`Transport`] trait, the `reqwest` implementation used in
//! production and a scripted mock for tests.

mod http;
mod mock;
mod traits;

pub use http::ReqwestTransport;
pub use mock::{MockReply, MockTransport, RecordedRequest};
pub use traits::*;
