//! HTTP front end: player page, status API, WebSocket endpoint

pub mod handlers;
pub mod server;
pub mod websocket;

pub use server::WebServer;
