pub mod catalog;
pub mod error;
pub mod file;
pub mod mapper;
pub mod memory;
pub mod pool;
pub mod query;
pub mod reader;
pub mod row;
