//! Error types for the claimpack library.
//!
//! Two distinct error types reflect two distinct failure modes:
//!
//! * [`PacketError`] is **fatal**: the operation cannot complete (claim not
//!   found, caller not entitled, corrupt image, storage write failed).
//!   Returned as `Err(PacketError)` from every [`crate::PacketService`] call.
//!
//! * [`EvidenceError`] is **non-fatal**: one evidence file could not be
//!   fetched, but the packet is still worth producing without it. Stored
//!   inside [`crate::pipeline::resolve::DroppedEvidence`] so callers can see
//!   what was left out rather than relying on log output.
//!
//! Backends report through [`StoreError`]; rows that fail boundary
//! validation report through [`ModelError`]. Both are folded into
//! [`PacketError`] by the orchestrator, which knows whether a failure was a
//! read or a write.

use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use uuid::Uuid;

/// All fatal errors returned by the claimpack library.
///
/// Evidence fetch failures use [`EvidenceError`] and never surface here.
#[derive(Debug, Error)]
pub enum PacketError {
    // ── Input errors ──────────────────────────────────────────────────────
    /// The claim id is not a UUID.
    #[error("Invalid claim id '{input}'")]
    InvalidClaimId { input: String },

    /// The evidence file id is not a UUID.
    #[error("Invalid evidence file id '{input}'")]
    InvalidFileId { input: String },

    /// No claim with this id exists.
    #[error("Claim {claim_id} not found")]
    ClaimNotFound { claim_id: Uuid },

    /// No evidence file with this id exists on the claim.
    #[error("Evidence file {file_id} not found on claim {claim_id}")]
    EvidenceNotFound { claim_id: Uuid, file_id: Uuid },

    /// Uploads cannot use this kind (the rendered packet is managed internally).
    #[error("Evidence kind '{kind}' cannot be uploaded")]
    InvalidEvidenceKind { kind: String },

    /// Upload exceeds the configured size limit.
    #[error("File '{name}' is too large ({size} bytes, max {max})")]
    FileTooLarge { name: String, size: usize, max: usize },

    /// Upload carried no bytes.
    #[error("File '{name}' is empty")]
    EmptyUpload { name: String },

    // ── Authorization errors ──────────────────────────────────────────────
    /// The caller does not own the claim and is not an admin.
    #[error("Claim {claim_id} does not belong to the caller")]
    Forbidden { claim_id: Uuid },

    /// The claim has not been paid for and the caller is not an admin.
    #[error("Claim {claim_id} is not paid")]
    NotPaid { claim_id: Uuid },

    /// Evidence can only change while the claim is a draft.
    #[error("Claim {claim_id} is {status} and can no longer be edited")]
    ClaimLocked { claim_id: Uuid, status: String },

    // ── Composition errors ────────────────────────────────────────────────
    /// An evidence image uses a MIME type the compositor cannot embed.
    #[error("Evidence '{name}' has unsupported image type '{mime_type}'")]
    UnsupportedImage { name: String, mime_type: String },

    /// Evidence bytes were fetched but do not decode as their declared format.
    #[error("Evidence '{name}' is not a valid {format} image: {detail}")]
    CorruptImage {
        name: String,
        format: String,
        detail: String,
    },

    /// The page sequence could not be written out as PDF.
    #[error("Failed to serialize packet: {0}")]
    Serialization(String),

    // ── Persistence errors ────────────────────────────────────────────────
    /// Reading claim, manifest or ledger rows failed.
    #[error("Failed to read records: {source}")]
    RecordRead {
        #[source]
        source: StoreError,
    },

    /// Writing evidence rows or claim status failed.
    #[error("Failed to write records: {source}")]
    RecordWrite {
        #[source]
        source: StoreError,
    },

    /// Writing bytes to the content store failed.
    #[error("Failed to store '{path}': {source}")]
    BlobWrite {
        path: String,
        #[source]
        source: StoreError,
    },

    /// Reading a stored packet back failed.
    #[error("Failed to fetch '{path}': {source}")]
    BlobRead {
        path: String,
        #[source]
        source: StoreError,
    },

    /// The claim has never been generated, so there is nothing to retrieve.
    #[error("Packet for claim {claim_id} is not available yet")]
    PacketNotAvailable { claim_id: Uuid },

    // ── Config errors ─────────────────────────────────────────────────────
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    // ── Catch-all ─────────────────────────────────────────────────────────
    /// Unexpected internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Coarse classification of a [`PacketError`], for callers mapping errors to
/// status codes or retry decisions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Input,
    Authorization,
    Composition,
    Persistence,
    Internal,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorKind::Input => "input",
            ErrorKind::Authorization => "authorization",
            ErrorKind::Composition => "composition",
            ErrorKind::Persistence => "persistence",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}

impl PacketError {
    /// Which part of the taxonomy this error belongs to.
    pub fn kind(&self) -> ErrorKind {
        match self {
            PacketError::InvalidClaimId { .. }
            | PacketError::InvalidFileId { .. }
            | PacketError::ClaimNotFound { .. }
            | PacketError::EvidenceNotFound { .. }
            | PacketError::InvalidEvidenceKind { .. }
            | PacketError::FileTooLarge { .. }
            | PacketError::EmptyUpload { .. } => ErrorKind::Input,
            PacketError::Forbidden { .. }
            | PacketError::NotPaid { .. }
            | PacketError::ClaimLocked { .. } => ErrorKind::Authorization,
            PacketError::UnsupportedImage { .. }
            | PacketError::CorruptImage { .. }
            | PacketError::Serialization(_) => ErrorKind::Composition,
            PacketError::RecordRead { .. }
            | PacketError::RecordWrite { .. }
            | PacketError::BlobWrite { .. }
            | PacketError::BlobRead { .. }
            | PacketError::PacketNotAvailable { .. } => ErrorKind::Persistence,
            PacketError::InvalidConfig(_) | PacketError::Internal(_) => ErrorKind::Internal,
        }
    }
}

/// A non-fatal error for a single evidence file.
///
/// The resolver records it and moves on; the packet is produced without the
/// affected image.
#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
pub enum EvidenceError {
    /// The row has no storage path to fetch from.
    #[error("evidence {file_id} has no storage path")]
    MissingPath { file_id: Uuid },

    /// The content store could not return the bytes.
    #[error("evidence {file_id} could not be fetched from '{path}': {detail}")]
    FetchFailed {
        file_id: Uuid,
        path: String,
        detail: String,
    },
}

/// Errors raised by record and content store backends.
#[derive(Debug, Error)]
pub enum StoreError {
    /// No object or row at this key.
    #[error("not found: {0}")]
    NotFound(String),

    /// The key is not a valid relative storage path.
    #[error("invalid storage path '{0}'")]
    InvalidPath(String),

    /// The backend does not implement this operation.
    #[error("operation not supported by this store: {0}")]
    Unsupported(&'static str),

    /// The write would break a uniqueness rule of the store.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The backend is temporarily unable to serve the request.
    #[error("store unavailable: {0}")]
    Unavailable(String),

    /// A stored row failed validation.
    #[error(transparent)]
    Malformed(#[from] ModelError),

    /// Local I/O failure.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// HTTP transport failure.
    #[error(transparent)]
    Http(#[from] reqwest::Error),

    /// JSON encode/decode failure.
    #[error(transparent)]
    Json(#[from] serde_json::Error),
}

/// A loosely typed row failed validation at the data boundary.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ModelError {
    #[error("malformed row: field '{field}' {reason}")]
    MalformedRow { field: &'static str, reason: String },
}

impl ModelError {
    pub(crate) fn field(field: &'static str, reason: impl Into<String>) -> Self {
        ModelError::MalformedRow {
            field,
            reason: reason.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn not_paid_is_authorization() {
        let e = PacketError::NotPaid {
            claim_id: Uuid::nil(),
        };
        assert_eq!(e.kind(), ErrorKind::Authorization);
        assert!(e.to_string().contains("not paid"), "got: {e}");
    }

    #[test]
    fn corrupt_image_is_composition() {
        let e = PacketError::CorruptImage {
            name: "box.jpg".into(),
            format: "JPEG".into(),
            detail: "bad marker".into(),
        };
        assert_eq!(e.kind(), ErrorKind::Composition);
        assert!(e.to_string().contains("box.jpg"));
        assert!(e.to_string().contains("JPEG"));
    }

    #[test]
    fn blob_write_is_persistence_and_keeps_source() {
        let e = PacketError::BlobWrite {
            path: "a/b/packet.pdf".into(),
            source: StoreError::Unavailable("bucket offline".into()),
        };
        assert_eq!(e.kind(), ErrorKind::Persistence);
        let source = std::error::Error::source(&e).expect("source");
        assert!(source.to_string().contains("bucket offline"));
    }

    #[test]
    fn evidence_error_display() {
        let e = EvidenceError::FetchFailed {
            file_id: Uuid::nil(),
            path: "u/c/damage_photo/x.jpg".into(),
            detail: "timeout".into(),
        };
        assert!(e.to_string().contains("timeout"));
        assert!(e.to_string().contains("x.jpg"));
    }

    #[test]
    fn error_kind_display() {
        assert_eq!(ErrorKind::Composition.to_string(), "composition");
        assert_eq!(ErrorKind::Input.to_string(), "input");
    }
}
