pub mod config;
pub mod error;
pub mod image_processing;
pub mod pipeline;
pub mod routes;
pub mod slug;
pub mod storage;
pub mod upload;

pub use config::IngestConfig;
pub use error::{IngestError, IngestResult};
pub use pipeline::{ConvertedImage, IngestPipeline};
