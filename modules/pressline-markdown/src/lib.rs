pub mod render;

pub use render::{MarkdownGenerator, MarkdownHandler, RenderResult};
