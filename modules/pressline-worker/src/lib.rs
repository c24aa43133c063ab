pub mod http;
pub mod runtime;

pub use http::{serve, HttpState, WakeAction};
pub use runtime::{Handler, RuntimeConfig, WorkerCounters, WorkerRuntime};
