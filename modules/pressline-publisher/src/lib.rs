pub mod mime;
pub mod publisher;
pub mod validate;

pub use publisher::{PublishStats, PublisherHandler, SitePublisher};
