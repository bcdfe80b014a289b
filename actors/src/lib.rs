//! Buffer-manager policies, provider negotiation, and the worker thread pool.

mod buffer_manager;
mod error;
mod threadpool;

pub use buffer_manager::{negotiate, BufferManager, BufferMode, CircularManager, GenericPool};
pub use error::DomainError;
pub use threadpool::{Runnable, ThreadPool, ThreadPoolArgs, YieldMode};
