pub mod articles;
pub mod config;
pub mod error;
pub mod messages;
pub mod naming;
pub mod quality;
pub mod textnorm;

pub use articles::*;
pub use config::Config;
pub use error::{PipelineError, Result};
pub use messages::*;
pub use naming::{article_url, filename_for, is_valid_filename, slugify};
pub use quality::QualitySpec;
pub use textnorm::{content_hash, normalize};
