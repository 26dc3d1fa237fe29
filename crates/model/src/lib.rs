pub mod core;
pub mod events;
pub mod execution;
pub mod offsets;
pub mod partition;
pub mod records;
