//! Proxy module
//!
//! Builds upstream requests and relays their responses.

pub mod forwarder;
pub mod headers;
pub mod logging;
pub mod relay;

pub use forwarder::{ApiFlavor, Operation, OutboundRequest, RequestForwarder};
pub use logging::RequestContext;
pub use relay::{RelayTimeouts, StreamRelay};
