//! `webload`: asynchronous HTTP transfer engine.
//!
//! One [`transfer::engine::TransferEngine`] runs at most one logical
//! transfer at a time: an in-memory buffer download, a file/stream download,
//! or a text download (buffer plus a charset decode). Starting a transfer
//! returns immediately; response, progress, and exactly one terminal
//! notification per operation are delivered to registered
//! [`progress::observer::TransferObserver`]s on background tasks.

pub mod progress;
pub mod transfer;
pub mod types;
