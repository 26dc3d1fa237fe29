pub mod context;
pub mod offset;
