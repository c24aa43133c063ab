pub mod blob;
pub mod dedup;
pub mod fs_blob;
pub mod fs_queue;
pub mod layout;
pub mod lease;
pub mod queue;
pub mod ratelimit;

pub use blob::{BlobStore, Etag, MemoryBlobStore, StoreError};
pub use dedup::DedupStore;
pub use fs_blob::FsBlobStore;
pub use fs_queue::FsQueue;
pub use lease::{LeaseGuard, LeaseManager, LeaseRecord};
pub use queue::{Delivery, MemoryQueue, Queue};
pub use ratelimit::RateLimiter;
