//! HTTP request handlers.

pub mod admin;
pub mod uploads;
pub mod videos;

pub use admin::health_check;
pub use uploads::{abort_upload, complete_upload, create_upload, get_upload, upload_part};
pub use videos::{delete_video, get_video};
