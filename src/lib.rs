pub mod config;
pub mod error;
pub mod scheduler;
pub mod service;
pub mod shutdown;
pub mod supervisor;
pub mod worker;

pub use config::SupervisorConfig;
pub use error::{Result, SupervisorError};
pub use service::{SupervisorHandle, SupervisorService};
pub use supervisor::{Supervisor, TickReport};
