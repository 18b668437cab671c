//! In-memory stores.
//!
//! Used by the integration tests and, seeded from a [`Snapshot`], by the
//! CLI. Both stores can be told to fail specific operations so tests can
//! exercise the partial-failure paths of the orchestrator.

use super::{validate_key, ContentStore, RecordStore, Snapshot};
use crate::error::StoreError;
use crate::model::{
    ClaimRecord, ClaimRow, ClaimStatus, EvidenceFile, EvidenceFileRow, EvidenceKind, FileLocation,
    PaymentRecord, PaymentRow, PaymentStatus,
};
use async_trait::async_trait;
use chrono::Utc;
use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::RwLock;
use tracing::debug;
use uuid::Uuid;

// ── Records ──────────────────────────────────────────────────────────────

#[derive(Default)]
struct Tables {
    claims: BTreeMap<Uuid, ClaimRecord>,
    /// Insertion order is the tie-breaker when creation times are equal.
    files: Vec<EvidenceFile>,
    payments: Vec<PaymentRecord>,
}

/// A [`RecordStore`] backed by in-process tables.
#[derive(Default)]
pub struct MemoryRecordStore {
    tables: RwLock<Tables>,
    fail_file_writes: AtomicBool,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build a store from snapshot rows, validating every row.
    pub fn from_snapshot(snapshot: Snapshot) -> Result<Self, StoreError> {
        let mut tables = Tables::default();
        for row in snapshot.claims {
            let claim = ClaimRecord::try_from(row)?;
            tables.claims.insert(claim.id, claim);
        }
        for row in snapshot.files {
            tables.files.push(EvidenceFile::try_from(row)?);
        }
        for row in snapshot.payments {
            tables.payments.push(PaymentRecord::try_from(row)?);
        }
        debug!(
            "Loaded snapshot: {} claims, {} files, {} payments",
            tables.claims.len(),
            tables.files.len(),
            tables.payments.len()
        );
        Ok(Self {
            tables: RwLock::new(tables),
            fail_file_writes: AtomicBool::new(false),
        })
    }

    /// Current contents as snapshot rows.
    pub async fn snapshot(&self) -> Snapshot {
        let t = self.tables.read().await;
        Snapshot {
            claims: t.claims.values().map(ClaimRow::from).collect(),
            files: t.files.iter().map(EvidenceFileRow::from).collect(),
            payments: t.payments.iter().map(PaymentRow::from).collect(),
        }
    }

    /// Insert or replace a claim.
    pub async fn put_claim(&self, claim: ClaimRecord) {
        self.tables.write().await.claims.insert(claim.id, claim);
    }

    /// Make `insert_file` and `upsert_packet_file` fail until reset.
    pub fn fail_file_writes(&self, fail: bool) {
        self.fail_file_writes.store(fail, Ordering::SeqCst);
    }

    /// Every payment in the ledger.
    pub async fn payments(&self) -> Vec<PaymentRecord> {
        self.tables.read().await.payments.clone()
    }

    fn check_file_writes(&self) -> Result<(), StoreError> {
        if self.fail_file_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable("evidence table is read-only".into()));
        }
        Ok(())
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn get_claim(&self, claim_id: Uuid) -> Result<Option<ClaimRecord>, StoreError> {
        Ok(self.tables.read().await.claims.get(&claim_id).cloned())
    }

    async fn list_files(&self, claim_id: Uuid) -> Result<Vec<EvidenceFile>, StoreError> {
        let t = self.tables.read().await;
        let mut files: Vec<EvidenceFile> = t.files.iter().filter(|f| f.claim_id == claim_id).cloned().collect();
        // Stable: rows without a timestamp sort first, ties keep insertion order.
        files.sort_by_key(|f| f.created_at);
        Ok(files)
    }

    async fn get_file(&self, file_id: Uuid) -> Result<Option<EvidenceFile>, StoreError> {
        Ok(self.tables.read().await.files.iter().find(|f| f.id == file_id).cloned())
    }

    async fn find_file_by_kind(
        &self,
        claim_id: Uuid,
        kind: EvidenceKind,
    ) -> Result<Option<EvidenceFile>, StoreError> {
        let t = self.tables.read().await;
        Ok(t.files
            .iter()
            .find(|f| f.claim_id == claim_id && f.kind == kind)
            .cloned())
    }

    async fn insert_file(&self, file: EvidenceFile) -> Result<(), StoreError> {
        self.check_file_writes()?;
        let mut t = self.tables.write().await;
        if file.kind == EvidenceKind::PacketPdf
            && t.files
                .iter()
                .any(|f| f.claim_id == file.claim_id && f.kind == EvidenceKind::PacketPdf)
        {
            return Err(StoreError::Conflict(format!("claim {} already has a packet row", file.claim_id)));
        }
        t.files.push(file);
        Ok(())
    }

    async fn upsert_packet_file(
        &self,
        claim_id: Uuid,
        owner_id: Uuid,
        location: FileLocation,
    ) -> Result<Uuid, StoreError> {
        self.check_file_writes()?;
        // Lookup and write under one guard.
        let mut t = self.tables.write().await;
        if let Some(row) = t
            .files
            .iter_mut()
            .find(|f| f.claim_id == claim_id && f.kind == EvidenceKind::PacketPdf)
        {
            row.storage_path = location.storage_path;
            row.original_name = Some(location.original_name);
            row.mime_type = Some(location.mime_type);
            row.size_bytes = Some(location.size_bytes);
            return Ok(row.id);
        }

        let id = Uuid::new_v4();
        t.files.push(EvidenceFile {
            id,
            claim_id,
            owner_id,
            kind: EvidenceKind::PacketPdf,
            storage_path: location.storage_path,
            original_name: Some(location.original_name),
            mime_type: Some(location.mime_type),
            size_bytes: Some(location.size_bytes),
            created_at: Some(Utc::now()),
        });
        Ok(id)
    }

    async fn delete_file(&self, file_id: Uuid) -> Result<(), StoreError> {
        self.tables.write().await.files.retain(|f| f.id != file_id);
        Ok(())
    }

    async fn record_generation(&self, claim_id: Uuid, narrative: &str) -> Result<ClaimRecord, StoreError> {
        let mut t = self.tables.write().await;
        let claim = t
            .claims
            .get_mut(&claim_id)
            .ok_or_else(|| StoreError::NotFound(format!("claim {claim_id}")))?;
        if claim.narrative.is_none() {
            claim.narrative = Some(narrative.to_string());
        }
        claim.status = claim.status.advance(ClaimStatus::Generated);
        Ok(claim.clone())
    }

    async fn set_status(&self, claim_id: Uuid, status: ClaimStatus) -> Result<ClaimStatus, StoreError> {
        let mut t = self.tables.write().await;
        let claim = t
            .claims
            .get_mut(&claim_id)
            .ok_or_else(|| StoreError::NotFound(format!("claim {claim_id}")))?;
        claim.status = claim.status.advance(status);
        Ok(claim.status)
    }

    async fn has_paid_payment(&self, claim_id: Uuid, owner_id: Uuid) -> Result<bool, StoreError> {
        let t = self.tables.read().await;
        Ok(t.payments
            .iter()
            .any(|p| p.claim_id == claim_id && p.owner_id == owner_id && p.status == PaymentStatus::Paid))
    }

    async fn upsert_payment(&self, payment: PaymentRecord) -> Result<(), StoreError> {
        let mut t = self.tables.write().await;
        match t
            .payments
            .iter_mut()
            .find(|p| p.checkout_session_id == payment.checkout_session_id)
        {
            Some(existing) => *existing = payment,
            None => t.payments.push(payment),
        }
        Ok(())
    }
}

// ── Content ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
struct StoredObject {
    bytes: Vec<u8>,
    content_type: String,
}

/// A [`ContentStore`] backed by a map of `(bucket, path)` keys.
#[derive(Default)]
pub struct MemoryContentStore {
    objects: RwLock<HashMap<(String, String), StoredObject>>,
    fail_writes: AtomicBool,
    failing_reads: RwLock<HashSet<String>>,
    puts: AtomicUsize,
}

impl MemoryContentStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every `put` fail until reset.
    pub fn fail_writes(&self, fail: bool) {
        self.fail_writes.store(fail, Ordering::SeqCst);
    }

    /// Make `get` fail for this path, in any bucket.
    pub async fn fail_reads_for(&self, path: impl Into<String>) {
        self.failing_reads.write().await.insert(path.into());
    }

    /// Number of successful `put` calls so far.
    pub fn put_count(&self) -> usize {
        self.puts.load(Ordering::SeqCst)
    }

    /// Stored content type, if the object exists.
    pub async fn content_type(&self, bucket: &str, path: &str) -> Option<String> {
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), path.to_string()))
            .map(|o| o.content_type.clone())
    }

    /// Number of objects stored in `bucket`.
    pub async fn object_count(&self, bucket: &str) -> usize {
        self.objects.read().await.keys().filter(|(b, _)| b == bucket).count()
    }
}

#[async_trait]
impl ContentStore for MemoryContentStore {
    async fn put(&self, bucket: &str, path: &str, bytes: Vec<u8>, content_type: &str) -> Result<(), StoreError> {
        validate_key(bucket, path)?;
        if self.fail_writes.load(Ordering::SeqCst) {
            return Err(StoreError::Unavailable(format!("bucket '{bucket}' rejected the write")));
        }
        self.objects.write().await.insert(
            (bucket.to_string(), path.to_string()),
            StoredObject {
                bytes,
                content_type: content_type.to_string(),
            },
        );
        self.puts.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    async fn get(&self, bucket: &str, path: &str) -> Result<Vec<u8>, StoreError> {
        validate_key(bucket, path)?;
        if self.failing_reads.read().await.contains(path) {
            return Err(StoreError::Unavailable(format!("read of '{path}' timed out")));
        }
        self.objects
            .read()
            .await
            .get(&(bucket.to_string(), path.to_string()))
            .map(|o| o.bytes.clone())
            .ok_or_else(|| StoreError::NotFound(format!("{bucket}/{path}")))
    }

    async fn remove(&self, bucket: &str, paths: &[String]) -> Result<(), StoreError> {
        let mut objects = self.objects.write().await;
        for path in paths {
            validate_key(bucket, path)?;
            objects.remove(&(bucket.to_string(), path.clone()));
        }
        Ok(())
    }

    async fn signed_url(&self, bucket: &str, path: &str, ttl_secs: u64) -> Result<String, StoreError> {
        validate_key(bucket, path)?;
        if !self.objects.read().await.contains_key(&(bucket.to_string(), path.to_string())) {
            return Err(StoreError::NotFound(format!("{bucket}/{path}")));
        }
        Ok(format!("memory://{bucket}/{path}?expires_in={ttl_secs}"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Carrier, IssueType};
    use chrono::{TimeZone, Utc};

    fn file(claim_id: Uuid, kind: EvidenceKind, secs: i64) -> EvidenceFile {
        EvidenceFile {
            id: Uuid::new_v4(),
            claim_id,
            owner_id: Uuid::nil(),
            kind,
            storage_path: format!("p/{secs}"),
            original_name: None,
            mime_type: Some("image/png".into()),
            size_bytes: None,
            created_at: Utc.timestamp_opt(secs, 0).single(),
        }
    }

    #[tokio::test]
    async fn list_files_orders_by_creation_time() {
        let store = MemoryRecordStore::new();
        let claim_id = Uuid::new_v4();
        store.insert_file(file(claim_id, EvidenceKind::DamagePhoto, 30)).await.unwrap();
        store.insert_file(file(claim_id, EvidenceKind::ProofOfValue, 10)).await.unwrap();
        store.insert_file(file(Uuid::new_v4(), EvidenceKind::ProofOfValue, 5)).await.unwrap();

        let files = store.list_files(claim_id).await.unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].kind, EvidenceKind::ProofOfValue);
        assert_eq!(files[1].kind, EvidenceKind::DamagePhoto);
    }

    #[tokio::test]
    async fn record_generation_freezes_narrative_once() {
        let store = MemoryRecordStore::new();
        let claim = ClaimRecord::draft(Uuid::new_v4(), Uuid::new_v4(), Carrier::Ups, IssueType::Lost);
        let id = claim.id;
        store.put_claim(claim).await;

        let first = store.record_generation(id, "first").await.unwrap();
        assert_eq!(first.narrative.as_deref(), Some("first"));
        assert_eq!(first.status, ClaimStatus::Generated);

        let second = store.record_generation(id, "second").await.unwrap();
        assert_eq!(second.narrative.as_deref(), Some("first"));
    }

    #[tokio::test]
    async fn status_never_regresses() {
        let store = MemoryRecordStore::new();
        let claim = ClaimRecord::draft(Uuid::new_v4(), Uuid::new_v4(), Carrier::Ups, IssueType::Lost);
        let id = claim.id;
        store.put_claim(claim).await;

        assert_eq!(store.set_status(id, ClaimStatus::Paid).await.unwrap(), ClaimStatus::Paid);
        store.record_generation(id, "n").await.unwrap();
        assert_eq!(store.get_claim(id).await.unwrap().unwrap().status, ClaimStatus::Paid);
    }

    #[tokio::test]
    async fn payments_upsert_by_session() {
        let store = MemoryRecordStore::new();
        let mut payment = PaymentRecord {
            claim_id: Uuid::new_v4(),
            owner_id: Uuid::new_v4(),
            status: PaymentStatus::Initiated,
            checkout_session_id: "cs_1".into(),
            payment_intent_id: None,
            amount_cents: Some(1900),
            currency: "usd".into(),
            paid_at: None,
        };
        store.upsert_payment(payment.clone()).await.unwrap();
        assert!(!store.has_paid_payment(payment.claim_id, payment.owner_id).await.unwrap());

        payment.status = PaymentStatus::Paid;
        store.upsert_payment(payment.clone()).await.unwrap();
        assert_eq!(store.payments().await.len(), 1);
        assert!(store.has_paid_payment(payment.claim_id, payment.owner_id).await.unwrap());
        assert!(!store.has_paid_payment(payment.claim_id, Uuid::new_v4()).await.unwrap());
    }

    #[tokio::test]
    async fn injected_file_write_failure() {
        let store = MemoryRecordStore::new();
        store.fail_file_writes(true);
        let err = store
            .insert_file(file(Uuid::new_v4(), EvidenceKind::DamagePhoto, 1))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Unavailable(_)));
    }

    fn location(path: &str, size: u64) -> FileLocation {
        FileLocation {
            storage_path: path.into(),
            original_name: "packet.pdf".into(),
            mime_type: "application/pdf".into(),
            size_bytes: size,
        }
    }

    #[tokio::test]
    async fn packet_upsert_updates_in_place() {
        let store = MemoryRecordStore::new();
        let claim_id = Uuid::new_v4();
        let first = store
            .upsert_packet_file(claim_id, Uuid::nil(), location("u/c/packet.pdf", 10))
            .await
            .unwrap();
        let second = store
            .upsert_packet_file(claim_id, Uuid::nil(), location("u/c/packet.pdf", 20))
            .await
            .unwrap();
        assert_eq!(first, second);

        let files = store.list_files(claim_id).await.unwrap();
        assert_eq!(files.len(), 1);
        assert_eq!(files[0].size_bytes, Some(20));
    }

    #[tokio::test]
    async fn concurrent_packet_upserts_leave_one_row() {
        let store = MemoryRecordStore::new();
        let claim_id = Uuid::new_v4();
        let (a, b) = tokio::join!(
            store.upsert_packet_file(claim_id, Uuid::nil(), location("u/c/packet.pdf", 1)),
            store.upsert_packet_file(claim_id, Uuid::nil(), location("u/c/packet.pdf", 2)),
        );
        assert_eq!(a.unwrap(), b.unwrap());
        assert_eq!(store.list_files(claim_id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_packet_row_insert_conflicts() {
        let store = MemoryRecordStore::new();
        let claim_id = Uuid::new_v4();
        store.insert_file(file(claim_id, EvidenceKind::PacketPdf, 1)).await.unwrap();
        let err = store
            .insert_file(file(claim_id, EvidenceKind::PacketPdf, 2))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::Conflict(_)));
        // Other kinds and other claims are unaffected.
        store.insert_file(file(claim_id, EvidenceKind::DamagePhoto, 3)).await.unwrap();
        store.insert_file(file(Uuid::new_v4(), EvidenceKind::PacketPdf, 4)).await.unwrap();
        assert_eq!(store.list_files(claim_id).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn content_put_get_remove() {
        let store = MemoryContentStore::new();
        store.put("b", "u/c/packet.pdf", b"%PDF".to_vec(), "application/pdf").await.unwrap();
        assert_eq!(store.get("b", "u/c/packet.pdf").await.unwrap(), b"%PDF");
        assert_eq!(store.content_type("b", "u/c/packet.pdf").await.as_deref(), Some("application/pdf"));
        assert!(store.signed_url("b", "u/c/packet.pdf", 60).await.unwrap().contains("expires_in=60"));

        store.remove("b", &["u/c/packet.pdf".to_string()]).await.unwrap();
        assert!(matches!(store.get("b", "u/c/packet.pdf").await, Err(StoreError::NotFound(_))));
        assert_eq!(store.put_count(), 1);
    }

    #[tokio::test]
    async fn content_failure_injection() {
        let store = MemoryContentStore::new();
        store.put("b", "x.png", vec![1], "image/png").await.unwrap();
        store.fail_reads_for("x.png").await;
        assert!(store.get("b", "x.png").await.is_err());

        store.fail_writes(true);
        assert!(store.put("b", "y.png", vec![1], "image/png").await.is_err());
        assert_eq!(store.object_count("b").await, 1);
    }

    #[tokio::test]
    async fn snapshot_round_trip() {
        let store = MemoryRecordStore::new();
        let claim = ClaimRecord::draft(Uuid::new_v4(), Uuid::new_v4(), Carrier::Fedex, IssueType::Damaged);
        store.put_claim(claim.clone()).await;
        store.insert_file(file(claim.id, EvidenceKind::DamagePhoto, 1)).await.unwrap();

        let restored = MemoryRecordStore::from_snapshot(store.snapshot().await).unwrap();
        let back = restored.get_claim(claim.id).await.unwrap().unwrap();
        assert_eq!(back.carrier, Carrier::Fedex);
        assert_eq!(restored.list_files(claim.id).await.unwrap().len(), 1);
    }
}
