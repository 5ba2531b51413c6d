pub mod db;
pub mod error;
pub mod queue;
pub mod types;

pub use error::{QueueError, Result};
pub use queue::MessageQueue;
pub use types::{MessageStatus, QueueItem};
