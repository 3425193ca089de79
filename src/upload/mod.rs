pub mod receiver;
pub mod staging;
pub mod validator;

pub use receiver::{IMAGE_FIELD, UploadReceiver};
pub use staging::StagedFile;
pub use validator::UploadPolicy;
