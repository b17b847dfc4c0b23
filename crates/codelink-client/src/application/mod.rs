//! Application layer for codelink-client.
//!
//! The application layer orchestrates the infrastructure pieces into the
//! surface the UI consumes.  It contains no socket or file code of its own.
//!
//! # Sub-modules
//!
//! - **`coordinator`** – [`ConnectionCoordinator`]: discovery plus the
//!   connection client behind one facade, with the mirrored editor snapshot,
//!   the selected service, and the user-facing error message.

pub mod coordinator;

pub use coordinator::ConnectionCoordinator;
