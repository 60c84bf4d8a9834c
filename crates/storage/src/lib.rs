pub mod credentials;
pub mod memory_store;
pub mod retention;
pub mod store;
mod uploader;

pub use credentials::CredentialStore;
pub use memory_store::MemoryRemoteStore;
pub use retention::{sweep_local_dir, sweep_local_dir_at, sweep_remote_folder, sweep_remote_folder_at, SweepReport};
pub use store::{RemoteFile, RemoteFolder, RemoteStore};
pub use uploader::{resolve_folder, upload_artifact, UploadOutcome};
