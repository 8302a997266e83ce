//! WebSocket transport

pub mod handler;
pub mod protocol;
pub mod session;

pub use session::SessionRegistry;
