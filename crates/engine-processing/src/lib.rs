pub mod error;
pub mod partitions;
pub mod provider;
pub mod source;
pub mod target;
pub mod worker;
