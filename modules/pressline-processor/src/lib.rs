pub mod assess;
pub mod attempts;
pub mod metadata;
pub mod processor;

pub use processor::{ProcessOutcome, Processor, ProcessorHandler};
