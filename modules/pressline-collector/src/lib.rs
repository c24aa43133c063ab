pub mod collector;
pub mod sources;
pub mod stats;

pub use collector::Collector;
pub use stats::CollectStats;
