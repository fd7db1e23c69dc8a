//! Status server for voxundo - line-delimited JSON over TCP for inspecting
//! and poking a running history manager
//!
//! Start the status server in your app:
//! ```ignore
//! let handler = Arc::new(Mutex::new(MyHandler::new()));
//! let _server = StatusServer::start(handler, DEFAULT_PORT).await?;
//! ```

pub mod protocol;
pub mod server;

pub use protocol::*;
pub use server::{StatusHandler, StatusServer};

/// Default status server port
pub const DEFAULT_PORT: u16 = 9743;
