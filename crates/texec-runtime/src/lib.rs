//! Runtime half of the executor stack: buffer registry, binding maps,
//! staged transfers, and the execution driver that runs compiled programs
//! from `texec` against a device engine.

mod bindings;
mod config;
mod executor;
mod outputs;
mod queue;
mod registry;
mod state;
mod transfer;

pub use config::ExecutorConfig;
pub use executor::Executor;
pub use queue::{DrainHandle, TaskQueue};
pub use registry::BufferState;
