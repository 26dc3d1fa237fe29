pub mod delegate;
pub mod error;
pub mod factory;
pub mod pipeline;
pub mod runner;
pub mod tracker;

#[cfg(test)]
mod tests;
