pub mod directory;
pub mod error;
pub mod infer;
pub mod settings;
