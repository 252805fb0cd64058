pub mod coordinator;
pub mod host;
pub mod jobs;

// Re-export command functions for convenience
pub use coordinator::coordinator_server;
pub use host::host_agent;
pub use jobs::{enqueue, state};
