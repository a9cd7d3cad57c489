pub mod cli;
pub mod client;
pub mod credentials;
pub mod harness;
pub mod probe;
pub mod report;
mod stack;
