//! Request-independent services behind the HTTP handlers

pub mod delivery;
pub mod io;
pub mod processing;
pub mod upload;

pub use delivery::{content_type_for, Delivery};
pub use io::ImageIOService;
pub use processing::{processed_name, ProcessingError};
pub use upload::{secure_filename, UploadRejection, UploadedFile};
