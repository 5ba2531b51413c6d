pub mod commands;
pub mod context;
pub mod error;
pub mod events;
pub mod games;
pub mod inbound;
pub mod moderation;
pub mod outbound;
pub mod pipeline;
pub mod schedule;
pub mod supervisor;
pub mod template;
pub mod worker;

pub use context::WorkerContext;
pub use error::{Result, WorkerError};
pub use events::EventBus;
pub use supervisor::{Supervisor, WorkerStatus};
pub use worker::{BotWorker, WorkerState};
