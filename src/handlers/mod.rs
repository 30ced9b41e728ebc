//! HTTP and WebSocket request handlers
//!
//! - `api` - Health check and model catalog endpoints
//! - `ws` - Speech synthesis WebSocket

pub mod api;
pub mod ws;

// Re-export commonly used handlers for convenient access
pub use ws::ws_speech_handler;
