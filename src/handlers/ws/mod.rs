//! Speech WebSocket handler
//!
//! # Protocol
//!
//! ## Client → Server
//!
//! One JSON object per text frame:
//!
//! - `{"text": "...", "speaker": 0, "language": "en-US", "model": "edge",
//!   "sample_rate": 24000, "extra_params": {...}}` requests speech. Only
//!   `text` is required; `model_type` is accepted as an alias of `model`.
//! - `{"command": "info"}` requests the model catalog.
//!
//! ## Server → Client
//!
//! - **loading**: the requested model started loading
//! - **queued**: the request waits for its model, with its queue position
//! - **success**: metadata for the audio that follows
//! - **error**: the request failed; the connection stays open
//! - **info**: model catalog
//! - **Binary frames**: the WAV file, split into frames that concatenate
//!   back to the exact file
//! - **Ping frames**: heartbeats while a load or generation is running

mod handler;

pub use handler::ws_speech_handler;
