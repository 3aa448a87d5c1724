//! Over-the-air firmware updates

mod session;
mod uploader;

pub use uploader::{OtaEvent, OtaUploader};
