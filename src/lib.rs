pub mod clock;
pub mod config;
pub mod error;
pub mod executor;
pub mod ledger;
pub mod scheduler;
pub mod sequencer;
pub mod stage;
pub mod store;

#[cfg(test)]
mod testing;
