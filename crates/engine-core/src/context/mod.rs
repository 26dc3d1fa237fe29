mod batch;
mod delegate;
mod exec;

pub use batch::BatchContext;
pub use delegate::{Handoff, PushSourceDelegate};
pub use exec::{StageContext, StageInfo};
