//! Record and content store abstractions.
//!
//! The orchestrator talks to two collaborators:
//!
//! * a [`RecordStore`] holding claims, evidence rows and the payment ledger;
//! * a [`ContentStore`] holding raw bytes under `(bucket, path)` keys.
//!
//! Both are async traits so the same pipeline runs against the in-memory
//! stores used in tests, the filesystem store used by the CLI, or a remote
//! object-storage service.
//!
//! Neither trait offers transactions. The one multi-step write the pipeline
//! needs, the packet row upsert, is a single [`RecordStore`] call so each
//! backend can make it atomic.

use crate::error::StoreError;
use crate::model::{ClaimRecord, ClaimStatus, EvidenceFile, EvidenceKind, FileLocation, PaymentRecord};
use async_trait::async_trait;
use uuid::Uuid;

pub mod fs;
pub mod http;
pub mod memory;
pub mod snapshot;

pub use fs::FsContentStore;
pub use http::HttpContentStore;
pub use memory::{MemoryContentStore, MemoryRecordStore};
pub use snapshot::Snapshot;

/// Claims, evidence rows and payments.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn get_claim(&self, claim_id: Uuid) -> Result<Option<ClaimRecord>, StoreError>;

    /// Evidence rows of a claim, ascending by creation time.
    async fn list_files(&self, claim_id: Uuid) -> Result<Vec<EvidenceFile>, StoreError>;

    async fn get_file(&self, file_id: Uuid) -> Result<Option<EvidenceFile>, StoreError>;

    /// First row of `kind` on the claim, if any.
    async fn find_file_by_kind(
        &self,
        claim_id: Uuid,
        kind: EvidenceKind,
    ) -> Result<Option<EvidenceFile>, StoreError>;

    /// Insert an evidence row. A second `packet_pdf` row for the same claim
    /// is rejected with [`StoreError::Conflict`].
    async fn insert_file(&self, file: EvidenceFile) -> Result<(), StoreError>;

    /// Point the claim's `packet_pdf` row at `location`, inserting the row
    /// when the claim has none. Returns the row id.
    ///
    /// Must be atomic: concurrent calls for one claim leave exactly one row,
    /// holding whichever location was written last. A SQL backend gets this
    /// from a unique index on `(packet_id) WHERE kind = 'packet_pdf'` and an
    /// `INSERT ... ON CONFLICT DO UPDATE`.
    async fn upsert_packet_file(
        &self,
        claim_id: Uuid,
        owner_id: Uuid,
        location: FileLocation,
    ) -> Result<Uuid, StoreError>;

    async fn delete_file(&self, file_id: Uuid) -> Result<(), StoreError>;

    /// Mark a successful generation: store `narrative` if the claim has none
    /// yet and advance the status to at least `generated`.
    async fn record_generation(&self, claim_id: Uuid, narrative: &str) -> Result<ClaimRecord, StoreError>;

    /// Advance the claim status. Never moves it backwards; returns the
    /// status now stored.
    async fn set_status(&self, claim_id: Uuid, status: ClaimStatus) -> Result<ClaimStatus, StoreError>;

    /// Whether the ledger holds a paid entry for this claim and owner.
    async fn has_paid_payment(&self, claim_id: Uuid, owner_id: Uuid) -> Result<bool, StoreError>;

    /// Insert or replace the ledger entry with the same checkout session id.
    async fn upsert_payment(&self, payment: PaymentRecord) -> Result<(), StoreError>;
}

/// Raw bytes keyed by bucket and relative path.
#[async_trait]
pub trait ContentStore: Send + Sync {
    /// Store `bytes`, overwriting whatever was at the key.
    async fn put(&self, bucket: &str, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StoreError>;

    async fn get(&self, bucket: &str, path: &str) -> Result<Vec<u8>, StoreError>;

    /// Delete the given keys. Missing keys are not an error.
    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), StoreError>;

    /// A time-limited URL for the object.
    async fn signed_url(&self, bucket: &str, path: &str, ttl_secs: u64) -> Result<String, StoreError> {
        let _ = (bucket, path, ttl_secs);
        Err(StoreError::Unsupported("signed_url"))
    }
}

/// Reject keys that could escape their bucket.
pub(crate) fn validate_key(bucket: &str, path: &str) -> Result<(), StoreError> {
    let bad_bucket = bucket.is_empty() || bucket.contains(['/', '\\']) || bucket == "." || bucket == "..";
    if bad_bucket {
        return Err(StoreError::InvalidPath(bucket.to_string()));
    }
    let bad_path = path.is_empty()
        || path.starts_with('/')
        || path.contains('\\')
        || path.split('/').any(|seg| seg.is_empty() || seg == "." || seg == "..");
    if bad_path {
        return Err(StoreError::InvalidPath(path.to_string()));
    }
    Ok(())
}
