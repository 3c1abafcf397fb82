//! Editor-facing WebSocket surface.

mod channel;
mod events;
mod handlers;

pub use handlers::ws_handler;
