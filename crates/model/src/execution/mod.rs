pub mod error_record;
pub mod issue;
pub mod policy;
