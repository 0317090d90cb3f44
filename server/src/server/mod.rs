//! HTTP and WebSocket surface

pub mod handlers;
pub mod serve;
pub mod state;
pub mod ws;
