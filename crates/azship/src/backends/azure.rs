// ai
//! 🪣☁️ Azure Blob Backend: where batches go to retire.
//!
//! INT. STORAGE ACCOUNT. NIGHT. A container waits. Maybe it exists, maybe it
//! doesn't. The sink knocks (`GET ?restype=container`), and if nobody answers
//! it builds the house itself (`PUT ?restype=container`).
//!
//! 🧠 Knowledge graph:
//! - Config co-located: `AzureBlobConfig` lives in `azure_blob_store.rs`
//! - Trait impl: `impl ObjectStore for AzureBlobStore`
//! - Enum variant: `StoreBackend::Azure(AzureBlobStore)`
//! - Transport: `object_store`'s `MicrosoftAzure`. Small bodies go up in one `PUT`;
//!   big ones are staged as 4 MiB blocks, four in flight, then committed.
//! - Auth: SAS token or account key, handed to the builder and to `AzureAuthorizer`.
//!
//! 🦆 The duck does not have an Azure subscription.

mod azure_blob_store;

pub use azure_blob_store::{AzureBlobConfig, AzureBlobStore};
