pub mod annotations;
pub mod config;
pub mod dispatcher;
pub mod error;
pub mod flare_detector;
pub mod invocation;
pub mod normalize;
pub mod processor;
pub mod secrets;
pub mod tasks;
pub mod timeseries_sink;
pub mod types;
pub mod upstream;

pub use dispatcher::{Dispatcher, ScheduledTask};
pub use error::{ExecutionError, Result};
pub use invocation::{Invocation, InvocationResponse, TaskResult};
pub use processor::FluxSeriesProcessor;
pub use tasks::TaskContext;
