pub mod archive;
pub mod azure;
pub mod backend;
pub mod error;
pub mod fetcher;
pub mod staging;

pub use archive::Archiver;
pub use azure::AzureConnectionString;
pub use backend::{ObjectStoreRemote, RemoteStore};
pub use error::StorageError;
pub use fetcher::{ConcurrentFetcher, FetchFailure, FetchReport};
pub use staging::{StagingArea, RETRY_FILE};
