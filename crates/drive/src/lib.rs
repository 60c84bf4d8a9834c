//! Google identity and Google Drive v3 integration.

mod client;
mod error;
pub mod oauth;
mod token_source;

pub use client::{DriveClient, DRIVE_API_BASE, DRIVE_UPLOAD_BASE, FOLDER_MIME_TYPE};
pub use error::DriveError;
pub use oauth::{ClientSecrets, OAuthClient, DRIVE_FILE_SCOPE};
pub use token_source::TokenSource;
