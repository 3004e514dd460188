//! The protocol as a Tower service: typed requests in, typed responses out

pub mod core;
pub mod request;
pub mod response;

pub use core::A2AProtocolService;
pub use request::{A2ARequest, RequestContext};
pub use response::A2AResponse;
