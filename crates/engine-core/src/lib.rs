pub mod context;
pub mod error;
pub mod event_bus;
pub mod metrics;
pub mod offsets;
pub mod policy;
pub mod retry;
pub mod stage;
