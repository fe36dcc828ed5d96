pub mod cancel;
pub mod channel;
pub mod cleanup;
pub mod command_runner;
pub mod config;
pub mod doctor;
pub mod engine;
pub mod latch;
pub mod outcome;
pub mod process_engine;
pub mod registry;
pub mod task;
#[cfg(test)]
pub(crate) mod test_support;
pub mod time;
pub mod work;
