//! Gating and persistence orchestrator.
//!
//! [`PacketService`] is the public entry point. It decides whether a caller
//! may generate or retrieve a claim's packet, drives the pipeline stages,
//! and persists the result:
//!
//! ```text
//! authorize ─▶ load claim + manifest ─▶ resolve ─▶ compose + pdf ─▶ put blob ─▶ upsert row ─▶ advance status
//! ```
//!
//! ## Idempotency
//!
//! The packet is always written to `{owner_id}/{claim_id}/packet.pdf`,
//! overwriting the previous one, and the claim's single `packet_pdf` row is
//! upserted through [`RecordStore::upsert_packet_file`], which updates it in
//! place or inserts it atomically. Re-running a generation therefore
//! converges on one blob and one row reflecting the latest run. There is no
//! lock around the whole run: two concurrent runs for the same claim both
//! succeed, the second upsert is a redundant update, and the last writer
//! wins.
//!
//! Any failure before the upsert leaves the previous row untouched. If the
//! blob write succeeds and the upsert then fails, the blob holds the new
//! packet while the row still describes the old one; nothing reconciles
//! that window, and the next successful run repairs it.

use crate::config::PacketConfig;
use crate::error::PacketError;
use crate::model::{
    ClaimRecord, ClaimStatus, EvidenceFile, EvidenceKind, FileLocation, PaymentRecord, PaymentStatus,
};
use crate::narrative;
use crate::pipeline::compose::{self, RenderedDocument};
use crate::pipeline::pdf;
use crate::pipeline::resolve::{self, DroppedEvidence};
use crate::store::{ContentStore, RecordStore};
use crate::validation::{self, Completeness};
use chrono::Utc;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub const PACKET_FILE_NAME: &str = "packet.pdf";
pub const PACKET_CONTENT_TYPE: &str = "application/pdf";
const DEFAULT_UPLOAD_TYPE: &str = "application/octet-stream";

static UNSAFE_FILE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]+").unwrap());

/// Who is asking.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Caller {
    /// Signed-in user, if any.
    pub user_id: Option<Uuid>,
    /// Admins bypass ownership and payment checks.
    pub is_admin: bool,
}

impl Caller {
    pub fn user(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            is_admin: false,
        }
    }

    pub fn admin(user_id: Uuid) -> Self {
        Self {
            user_id: Some(user_id),
            is_admin: true,
        }
    }

    /// Internal caller used after payment confirmation.
    pub fn system() -> Self {
        Self {
            user_id: None,
            is_admin: true,
        }
    }
}

/// Result of a successful generation.
#[derive(Debug, Clone, Serialize)]
pub struct GeneratedPacket {
    pub claim_id: Uuid,
    /// Id of the claim's `packet_pdf` row.
    pub file_id: Uuid,
    pub storage_path: String,
    pub byte_len: usize,
    pub page_count: usize,
    pub image_pages: usize,
    /// Evidence images that could not be fetched and were left out.
    pub dropped: Vec<DroppedEvidence>,
}

/// A stored packet, ready to hand to the caller.
#[derive(Debug, Clone)]
pub struct PacketDownload {
    pub file_name: String,
    pub content_type: String,
    pub bytes: Vec<u8>,
}

/// A file to attach to a draft claim.
#[derive(Debug, Clone)]
pub struct NewEvidence {
    pub kind: EvidenceKind,
    pub file_name: String,
    pub mime_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// A completed checkout, as reported by the payment provider.
#[derive(Debug, Clone)]
pub struct PaymentConfirmation {
    pub claim_id: Uuid,
    pub owner_id: Uuid,
    pub checkout_session_id: String,
    pub payment_intent_id: Option<String>,
    pub amount_cents: Option<i64>,
    pub currency: String,
}

/// What happened after a payment was confirmed.
#[derive(Debug, Clone, Serialize)]
pub struct PaymentOutcome {
    pub claim_id: Uuid,
    pub status: ClaimStatus,
    pub packet: Option<GeneratedPacket>,
    /// Set when the follow-up generation failed; the payment still stands.
    pub generation_error: Option<String>,
}

/// Summary of a claim for status displays.
#[derive(Debug, Clone, Serialize)]
pub struct ClaimOverview {
    pub claim_id: Uuid,
    pub status: ClaimStatus,
    pub completeness: Completeness,
    pub evidence_count: usize,
    pub packet_available: bool,
}

/// Generates, stores and serves claim packets.
pub struct PacketService {
    records: Arc<dyn RecordStore>,
    content: Arc<dyn ContentStore>,
    config: PacketConfig,
}

impl PacketService {
    pub fn new(records: Arc<dyn RecordStore>, content: Arc<dyn ContentStore>, config: PacketConfig) -> Self {
        Self {
            records,
            content,
            config,
        }
    }

    pub fn config(&self) -> &PacketConfig {
        &self.config
    }

    /// Resolve a signed-in user into a [`Caller`], applying the admin allow-list.
    pub fn caller(&self, user_id: Uuid, email: Option<&str>) -> Caller {
        Caller {
            user_id: Some(user_id),
            is_admin: email.is_some_and(|e| self.config.is_admin_email(e)),
        }
    }

    // ── Generation ───────────────────────────────────────────────────────

    /// Generate the packet for a claim and persist it.
    ///
    /// The caller must own the claim and the claim must be paid, unless
    /// the caller is an admin. Evidence images that cannot be fetched are
    /// left out and reported in [`GeneratedPacket::dropped`]; images that
    /// are fetched but cannot be decoded fail the run.
    pub async fn generate_packet(&self, claim_id: &str, caller: Caller) -> Result<GeneratedPacket, PacketError> {
        let claim = self.load_authorized(claim_id, caller).await?;
        self.generate_for(claim).await
    }

    async fn generate_for(&self, claim: ClaimRecord) -> Result<GeneratedPacket, PacketError> {
        info!("Generating packet for claim {}", claim.id);
        let progress = self.config.progress_callback.as_ref();

        let manifest = self
            .records
            .list_files(claim.id)
            .await
            .map_err(|source| PacketError::RecordRead { source })?;
        let image_count = manifest.iter().filter(|f| f.is_embeddable_image()).count();
        debug!("Manifest has {} files, {} images", manifest.len(), image_count);
        if let Some(cb) = progress {
            cb.on_generation_start(&claim.id.to_string(), image_count);
        }

        let resolved = resolve::resolve_images(
            self.content.as_ref(),
            &self.config.uploads_bucket,
            &manifest,
            self.config.fetch_concurrency,
            progress,
        )
        .await;
        if !resolved.dropped.is_empty() {
            warn!(
                "Claim {}: {} evidence image(s) could not be fetched and were left out",
                claim.id,
                resolved.dropped.len()
            );
        }

        let narrative = match &claim.narrative {
            Some(text) if !text.trim().is_empty() => text.clone(),
            _ => narrative::synthesize(&claim),
        };

        // Layout and serialization are CPU-bound.
        let layout = self.config.layout;
        let images = resolved.images;
        let (document, bytes) = {
            let claim = claim.clone();
            let narrative = narrative.clone();
            tokio::task::spawn_blocking(move || -> Result<(RenderedDocument, Vec<u8>), PacketError> {
                let document = compose::compose(&claim, &narrative, &manifest, &images, &layout)?;
                let bytes = pdf::write_pdf(&document)?;
                Ok((document, bytes))
            })
            .await
            .map_err(|e| PacketError::Internal(format!("compose task failed: {e}")))??
        };
        if let Some(cb) = progress {
            cb.on_composed(document.page_count());
        }

        let storage_path = packet_path(&claim);
        let byte_len = bytes.len();
        self.content
            .put(&self.config.packets_bucket, &storage_path, bytes, PACKET_CONTENT_TYPE)
            .await
            .map_err(|source| PacketError::BlobWrite {
                path: storage_path.clone(),
                source,
            })?;
        debug!("Stored {} bytes at {}/{}", byte_len, self.config.packets_bucket, storage_path);

        let file_id = self.upsert_packet_row(&claim, &storage_path, byte_len).await?;

        self.records
            .record_generation(claim.id, &narrative)
            .await
            .map_err(|source| PacketError::RecordWrite { source })?;

        if let Some(cb) = progress {
            cb.on_stored(&storage_path, byte_len);
        }
        info!(
            "Packet for claim {} stored: {} pages, {} bytes",
            claim.id,
            document.page_count(),
            byte_len
        );

        Ok(GeneratedPacket {
            claim_id: claim.id,
            file_id,
            storage_path,
            byte_len,
            page_count: document.page_count(),
            image_pages: document.image_page_count(),
            dropped: resolved.dropped,
        })
    }

    /// Update the claim's `packet_pdf` row in place, or insert it.
    async fn upsert_packet_row(&self, claim: &ClaimRecord, storage_path: &str, byte_len: usize) -> Result<Uuid, PacketError> {
        let location = FileLocation {
            storage_path: storage_path.to_string(),
            original_name: PACKET_FILE_NAME.to_string(),
            mime_type: PACKET_CONTENT_TYPE.to_string(),
            size_bytes: byte_len as u64,
        };
        let file_id = self
            .records
            .upsert_packet_file(claim.id, claim.owner_id, location)
            .await
            .map_err(|source| {
                warn!(
                    "Packet for claim {} was stored but its record could not be written: {}",
                    claim.id, source
                );
                PacketError::RecordWrite { source }
            })?;
        debug!("Packet row {} points at {}", file_id, storage_path);
        Ok(file_id)
    }

    // ── Retrieval ────────────────────────────────────────────────────────

    /// Return the stored packet, generating it first if the claim has none.
    pub async fn download_packet(&self, claim_id: &str, caller: Caller) -> Result<PacketDownload, PacketError> {
        let claim = self.load_authorized(claim_id, caller).await?;

        let storage_path = match self.packet_row(claim.id).await? {
            Some(row) if !row.storage_path.is_empty() => row.storage_path,
            _ => {
                info!("Claim {} has no packet yet, generating on demand", claim.id);
                self.generate_for(claim).await?.storage_path
            }
        };

        let bytes = self
            .content
            .get(&self.config.packets_bucket, &storage_path)
            .await
            .map_err(|source| PacketError::BlobRead {
                path: storage_path.clone(),
                source,
            })?;

        Ok(PacketDownload {
            file_name: PACKET_FILE_NAME.to_string(),
            content_type: PACKET_CONTENT_TYPE.to_string(),
            bytes,
        })
    }

    /// A signed, time-limited URL for the stored packet.
    pub async fn packet_url(&self, claim_id: &str, caller: Caller) -> Result<String, PacketError> {
        let claim = self.load_authorized(claim_id, caller).await?;
        let row = self
            .packet_row(claim.id)
            .await?
            .filter(|row| !row.storage_path.is_empty())
            .ok_or(PacketError::PacketNotAvailable { claim_id: claim.id })?;

        self.content
            .signed_url(&self.config.packets_bucket, &row.storage_path, self.config.signed_url_ttl_secs)
            .await
            .map_err(|source| PacketError::BlobRead {
                path: row.storage_path.clone(),
                source,
            })
    }

    async fn packet_row(&self, claim_id: Uuid) -> Result<Option<EvidenceFile>, PacketError> {
        self.records
            .find_file_by_kind(claim_id, EvidenceKind::PacketPdf)
            .await
            .map_err(|source| PacketError::RecordRead { source })
    }

    // ── Payment ──────────────────────────────────────────────────────────

    /// Record a completed checkout and generate the packet.
    ///
    /// The ledger entry and the paid status are what matter; if the
    /// follow-up generation fails it is reported in the outcome and can be
    /// retried by downloading.
    pub async fn confirm_payment(&self, confirmation: PaymentConfirmation) -> Result<PaymentOutcome, PacketError> {
        let claim = self.load_claim(confirmation.claim_id).await?;
        if claim.owner_id != confirmation.owner_id {
            return Err(PacketError::Forbidden { claim_id: claim.id });
        }

        let payment = PaymentRecord {
            claim_id: claim.id,
            owner_id: claim.owner_id,
            status: PaymentStatus::Paid,
            checkout_session_id: confirmation.checkout_session_id,
            payment_intent_id: confirmation.payment_intent_id,
            amount_cents: confirmation.amount_cents,
            currency: confirmation.currency,
            paid_at: Some(Utc::now()),
        };
        info!(
            "Payment {} confirmed for claim {}",
            payment.checkout_session_id, claim.id
        );
        self.records
            .upsert_payment(payment)
            .await
            .map_err(|source| PacketError::RecordWrite { source })?;
        let status = self
            .records
            .set_status(claim.id, ClaimStatus::Paid)
            .await
            .map_err(|source| PacketError::RecordWrite { source })?;

        let claim_id = claim.id;
        let claim = ClaimRecord { status, ..claim };
        let (packet, generation_error) = match self.generate_for(claim).await {
            Ok(packet) => (Some(packet), None),
            Err(e) => {
                warn!("Packet generation after payment failed for claim {}: {}", claim_id, e);
                (None, Some(e.to_string()))
            }
        };

        Ok(PaymentOutcome {
            claim_id,
            status,
            packet,
            generation_error,
        })
    }

    // ── Evidence ─────────────────────────────────────────────────────────

    /// Store an uploaded file and attach it to a draft claim.
    pub async fn attach_evidence(
        &self,
        claim_id: &str,
        caller: Caller,
        upload: NewEvidence,
    ) -> Result<EvidenceFile, PacketError> {
        if !upload.kind.is_uploadable() {
            return Err(PacketError::InvalidEvidenceKind {
                kind: upload.kind.as_str().to_string(),
            });
        }
        if upload.bytes.is_empty() {
            return Err(PacketError::EmptyUpload { name: upload.file_name });
        }
        if upload.bytes.len() > self.config.max_upload_bytes {
            return Err(PacketError::FileTooLarge {
                name: upload.file_name,
                size: upload.bytes.len(),
                max: self.config.max_upload_bytes,
            });
        }

        let claim = self.load_editable(claim_id, caller).await?;
        let file_id = Uuid::new_v4();
        let storage_path = format!(
            "{}/{}/{}/{}-{}",
            claim.owner_id,
            claim.id,
            upload.kind.as_str(),
            file_id,
            sanitize_file_name(&upload.file_name)
        );
        let mime_type = upload
            .mime_type
            .filter(|m| !m.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_UPLOAD_TYPE.to_string());
        let size = upload.bytes.len() as u64;

        self.content
            .put(&self.config.uploads_bucket, &storage_path, upload.bytes, &mime_type)
            .await
            .map_err(|source| PacketError::BlobWrite {
                path: storage_path.clone(),
                source,
            })?;

        let file = EvidenceFile {
            id: file_id,
            claim_id: claim.id,
            owner_id: claim.owner_id,
            kind: upload.kind,
            storage_path: storage_path.clone(),
            original_name: Some(upload.file_name),
            mime_type: Some(mime_type),
            size_bytes: Some(size),
            created_at: Some(Utc::now()),
        };
        if let Err(source) = self.records.insert_file(file.clone()).await {
            // Don't leave orphaned bytes behind.
            if let Err(e) = self
                .content
                .remove(&self.config.uploads_bucket, std::slice::from_ref(&storage_path))
                .await
            {
                warn!("Could not remove orphaned upload {}: {}", storage_path, e);
            }
            return Err(PacketError::RecordWrite { source });
        }

        info!("Attached {} {} to claim {}", file.kind, file.id, claim.id);
        Ok(file)
    }

    /// Delete an uploaded file from a draft claim, bytes first.
    pub async fn remove_evidence(&self, claim_id: &str, file_id: &str, caller: Caller) -> Result<(), PacketError> {
        let file_uuid = Uuid::parse_str(file_id.trim()).map_err(|_| PacketError::InvalidFileId {
            input: file_id.to_string(),
        })?;
        let claim = self.load_editable(claim_id, caller).await?;

        let file = self
            .records
            .get_file(file_uuid)
            .await
            .map_err(|source| PacketError::RecordRead { source })?
            .filter(|f| f.claim_id == claim.id)
            .ok_or(PacketError::EvidenceNotFound {
                claim_id: claim.id,
                file_id: file_uuid,
            })?;
        if !file.kind.is_uploadable() {
            return Err(PacketError::InvalidEvidenceKind {
                kind: file.kind.as_str().to_string(),
            });
        }

        if !file.storage_path.is_empty() {
            self.content
                .remove(&self.config.uploads_bucket, std::slice::from_ref(&file.storage_path))
                .await
                .map_err(|source| PacketError::BlobWrite {
                    path: file.storage_path.clone(),
                    source,
                })?;
        }
        self.records
            .delete_file(file.id)
            .await
            .map_err(|source| PacketError::RecordWrite { source })?;

        info!("Removed evidence {} from claim {}", file.id, claim.id);
        Ok(())
    }

    // ── Status ───────────────────────────────────────────────────────────

    /// Completeness, status and packet availability. Requires ownership only.
    pub async fn claim_overview(&self, claim_id: &str, caller: Caller) -> Result<ClaimOverview, PacketError> {
        let claim = self.load_owned(claim_id, caller).await?;
        let files = self
            .records
            .list_files(claim.id)
            .await
            .map_err(|source| PacketError::RecordRead { source })?;
        let packet_available = files
            .iter()
            .any(|f| f.kind == EvidenceKind::PacketPdf && !f.storage_path.is_empty());

        Ok(ClaimOverview {
            claim_id: claim.id,
            status: claim.status,
            completeness: validation::completeness(&claim),
            evidence_count: files.iter().filter(|f| f.kind.is_uploadable()).count(),
            packet_available,
        })
    }

    // ── Authorization ────────────────────────────────────────────────────

    async fn load_claim(&self, claim_id: Uuid) -> Result<ClaimRecord, PacketError> {
        self.records
            .get_claim(claim_id)
            .await
            .map_err(|source| PacketError::RecordRead { source })?
            .ok_or(PacketError::ClaimNotFound { claim_id })
    }

    /// Parse, load and check ownership.
    async fn load_owned(&self, claim_id: &str, caller: Caller) -> Result<ClaimRecord, PacketError> {
        let id = parse_claim_id(claim_id)?;
        let claim = self.load_claim(id).await?;
        if !caller.is_admin && caller.user_id != Some(claim.owner_id) {
            debug!("Caller {:?} does not own claim {}", caller.user_id, claim.id);
            return Err(PacketError::Forbidden { claim_id: claim.id });
        }
        Ok(claim)
    }

    /// Ownership plus the paid gate.
    async fn load_authorized(&self, claim_id: &str, caller: Caller) -> Result<ClaimRecord, PacketError> {
        let claim = self.load_owned(claim_id, caller).await?;
        if caller.is_admin || claim.status == ClaimStatus::Paid {
            return Ok(claim);
        }
        let paid = self
            .records
            .has_paid_payment(claim.id, claim.owner_id)
            .await
            .map_err(|source| PacketError::RecordRead { source })?;
        if !paid {
            return Err(PacketError::NotPaid { claim_id: claim.id });
        }
        Ok(claim)
    }

    /// Ownership plus the draft-only rule for evidence changes.
    async fn load_editable(&self, claim_id: &str, caller: Caller) -> Result<ClaimRecord, PacketError> {
        let claim = self.load_owned(claim_id, caller).await?;
        if claim.status != ClaimStatus::Draft {
            return Err(PacketError::ClaimLocked {
                claim_id: claim.id,
                status: claim.status.as_str().to_string(),
            });
        }
        Ok(claim)
    }
}

fn parse_claim_id(input: &str) -> Result<Uuid, PacketError> {
    Uuid::parse_str(input.trim()).map_err(|_| PacketError::InvalidClaimId {
        input: input.to_string(),
    })
}

/// Storage key of a claim's packet.
pub fn packet_path(claim: &ClaimRecord) -> String {
    format!("{}/{}/{}", claim.owner_id, claim.id, PACKET_FILE_NAME)
}

/// Replace every run of characters outside `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_file_name(name: &str) -> String {
    let cleaned = UNSAFE_FILE_CHARS.replace_all(name.trim(), "_");
    if cleaned.is_empty() || cleaned.chars().all(|c| c == '.') {
        "upload".to_string()
    } else {
        cleaned.into_owned()
    }
}
