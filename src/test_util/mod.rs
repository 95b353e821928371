//! Utilities for testing code built on top of the messaging layer. They are used for the crate's
//!  own tests, and they are exported for application testing as well.

pub mod handler;
pub mod node;
pub mod transport;

pub use handler::{HandlerEvent, RecordingHandler};
pub use node::test_addr;
pub use transport::TrackingTransport;
