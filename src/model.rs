//! Claim, evidence and payment records.
//!
//! The typed records ([`ClaimRecord`], [`EvidenceFile`], [`PaymentRecord`])
//! are what the pipeline works with. Stores hand back loosely typed rows
//! ([`ClaimRow`], [`EvidenceFileRow`], [`PaymentRow`]); those are converted
//! with `TryFrom` at the boundary so a malformed row is rejected before it
//! reaches the compositor.

use crate::error::ModelError;
use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

// ── Enumerations ─────────────────────────────────────────────────────────

/// Generates `as_str`, `label`, `Display` and `FromStr` for a closed
/// snake_case enumeration.
macro_rules! closed_enum {
    ($ty:ident { $($variant:ident => ($wire:literal, $label:literal)),+ $(,)? }) => {
        impl $ty {
            /// Every variant, in declaration order.
            pub const ALL: &'static [$ty] = &[$($ty::$variant),+];

            /// Stored (snake_case) representation.
            pub fn as_str(&self) -> &'static str {
                match self {
                    $($ty::$variant => $wire),+
                }
            }

            /// Human-readable label.
            pub fn label(&self) -> &'static str {
                match self {
                    $($ty::$variant => $label),+
                }
            }
        }

        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = String;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                match s {
                    $($wire => Ok($ty::$variant),)+
                    other => Err(format!("unknown {} '{}'", stringify!($ty), other)),
                }
            }
        }
    };
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Carrier {
    Ups,
    Fedex,
}

closed_enum!(Carrier {
    Ups => ("ups", "UPS"),
    Fedex => ("fedex", "FedEx"),
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueType {
    Damaged,
    Lost,
    MissingContents,
}

closed_enum!(IssueType {
    Damaged => ("damaged", "Damaged"),
    Lost => ("lost", "Lost"),
    MissingContents => ("missing_contents", "Missing contents"),
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FilerRole {
    Shipper,
    Recipient,
    ThirdParty,
}

closed_enum!(FilerRole {
    Shipper => ("shipper", "Shipper"),
    Recipient => ("recipient", "Recipient"),
    ThirdParty => ("third_party", "Third party"),
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStage {
    NewClaim,
    DeniedNeedAppeal,
}

closed_enum!(ClaimStage {
    NewClaim => ("new_claim", "New claim"),
    DeniedNeedAppeal => ("denied_need_appeal", "Denied, need appeal"),
});

/// Whether the shipment was insured, as reported by the filer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Insured {
    Yes,
    No,
    NotSure,
}

closed_enum!(Insured {
    Yes => ("yes", "Yes"),
    No => ("no", "No"),
    NotSure => ("not_sure", "Not sure"),
});

/// Claim lifecycle.
///
/// Variants are ordered so that `max` is the advance rule: status moves
/// draft → generated → paid and never back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClaimStatus {
    Draft,
    Generated,
    Paid,
}

closed_enum!(ClaimStatus {
    Draft => ("draft", "Draft"),
    Generated => ("generated", "Generated"),
    Paid => ("paid", "Paid"),
});

impl ClaimStatus {
    /// Monotonic transition: returns `next` if it is further along, else `self`.
    pub fn advance(self, next: ClaimStatus) -> ClaimStatus {
        self.max(next)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EvidenceKind {
    ProofOfValue,
    DamagePhoto,
    PackagingPhoto,
    ProofOfDelivery,
    OtherSupporting,
    /// The rendered packet itself; at most one per claim.
    PacketPdf,
}

closed_enum!(EvidenceKind {
    ProofOfValue => ("proof_of_value", "Proof of value"),
    DamagePhoto => ("damage_photo", "Damage photo"),
    PackagingPhoto => ("packaging_photo", "Packaging photo"),
    ProofOfDelivery => ("proof_of_delivery", "Proof of delivery"),
    OtherSupporting => ("other_supporting", "Other supporting"),
    PacketPdf => ("packet_pdf", "Packet PDF"),
});

impl EvidenceKind {
    /// Kinds a user may upload.
    pub fn is_uploadable(&self) -> bool {
        !matches!(self, EvidenceKind::PacketPdf)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Initiated,
    Paid,
    Failed,
    Refunded,
}

closed_enum!(PaymentStatus {
    Initiated => ("initiated", "Initiated"),
    Paid => ("paid", "Paid"),
    Failed => ("failed", "Failed"),
    Refunded => ("refunded", "Refunded"),
});

// ── Records ──────────────────────────────────────────────────────────────

/// A shipment claim, as snapshotted for one generation run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClaimRecord {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub carrier: Carrier,
    pub issue_type: IssueType,
    pub filer_role: FilerRole,
    pub claim_stage: ClaimStage,
    pub tracking_number: String,
    pub ship_date: Option<NaiveDate>,
    pub delivery_date: Option<NaiveDate>,
    pub origin: String,
    pub destination: String,
    pub service_level: Option<String>,
    pub declared_value: Option<f64>,
    pub item_description: String,
    pub item_quantity: u32,
    pub item_value_total: f64,
    pub shipping_cost: Option<f64>,
    pub tax: Option<f64>,
    pub requested_amount: f64,
    pub is_insured: Option<Insured>,
    pub user_notes: Option<String>,
    /// User-supplied or frozen narrative. `None` until first generation
    /// unless the user wrote one.
    pub narrative: Option<String>,
    pub status: ClaimStatus,
}

impl ClaimRecord {
    /// A blank draft owned by `owner_id`.
    pub fn draft(id: Uuid, owner_id: Uuid, carrier: Carrier, issue_type: IssueType) -> Self {
        Self {
            id,
            owner_id,
            carrier,
            issue_type,
            filer_role: FilerRole::Shipper,
            claim_stage: ClaimStage::NewClaim,
            tracking_number: String::new(),
            ship_date: None,
            delivery_date: None,
            origin: String::new(),
            destination: String::new(),
            service_level: None,
            declared_value: None,
            item_description: String::new(),
            item_quantity: 1,
            item_value_total: 0.0,
            shipping_cost: None,
            tax: None,
            requested_amount: 0.0,
            is_insured: None,
            user_notes: None,
            narrative: None,
            status: ClaimStatus::Draft,
        }
    }
}

/// An uploaded artifact attached to a claim.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EvidenceFile {
    pub id: Uuid,
    pub claim_id: Uuid,
    pub owner_id: Uuid,
    pub kind: EvidenceKind,
    pub storage_path: String,
    pub original_name: Option<String>,
    pub mime_type: Option<String>,
    pub size_bytes: Option<u64>,
    pub created_at: Option<DateTime<Utc>>,
}

impl EvidenceFile {
    /// True for files the compositor embeds as image pages.
    pub fn is_embeddable_image(&self) -> bool {
        self.kind != EvidenceKind::PacketPdf
            && self
                .mime_type
                .as_deref()
                .is_some_and(|m| m.starts_with("image/"))
    }

    /// Name shown in the evidence index and on image pages.
    pub fn display_name(&self) -> Option<&str> {
        self.original_name.as_deref().filter(|n| !n.trim().is_empty())
    }
}

/// Location fields rewritten when the packet row is updated in place.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileLocation {
    pub storage_path: String,
    pub original_name: String,
    pub mime_type: String,
    pub size_bytes: u64,
}

/// A payment ledger entry.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub claim_id: Uuid,
    pub owner_id: Uuid,
    pub status: PaymentStatus,
    /// Upsert key.
    pub checkout_session_id: String,
    pub payment_intent_id: Option<String>,
    pub amount_cents: Option<i64>,
    pub currency: String,
    pub paid_at: Option<DateTime<Utc>>,
}

// ── Loosely typed rows ───────────────────────────────────────────────────

/// A claim row as a database or JSON snapshot returns it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ClaimRow {
    pub id: String,
    pub user_id: String,
    pub carrier: String,
    pub issue_type: String,
    #[serde(default)]
    pub filer_role: Option<String>,
    #[serde(default)]
    pub claim_stage: Option<String>,
    #[serde(default)]
    pub tracking_number: Option<String>,
    #[serde(default)]
    pub ship_date: Option<String>,
    #[serde(default)]
    pub delivery_date: Option<String>,
    #[serde(default)]
    pub origin_text: Option<String>,
    #[serde(default)]
    pub destination_text: Option<String>,
    #[serde(default)]
    pub service_level: Option<String>,
    #[serde(default)]
    pub declared_value: Option<f64>,
    #[serde(default)]
    pub item_description: Option<String>,
    #[serde(default)]
    pub item_qty: Option<i64>,
    #[serde(default)]
    pub item_value_total: Option<f64>,
    #[serde(default)]
    pub shipping_cost: Option<f64>,
    #[serde(default)]
    pub tax: Option<f64>,
    #[serde(default)]
    pub requested_amount: Option<f64>,
    #[serde(default)]
    pub is_insured: Option<String>,
    #[serde(default)]
    pub user_notes: Option<String>,
    #[serde(default)]
    pub narrative: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

/// An evidence row as a database or JSON snapshot returns it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct EvidenceFileRow {
    pub id: String,
    pub packet_id: String,
    pub user_id: String,
    pub kind: String,
    #[serde(default)]
    pub storage_path: Option<String>,
    #[serde(default)]
    pub original_name: Option<String>,
    #[serde(default)]
    pub mime_type: Option<String>,
    #[serde(default)]
    pub size_bytes: Option<i64>,
    #[serde(default)]
    pub created_at: Option<String>,
}

/// A payment row as a database or JSON snapshot returns it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PaymentRow {
    pub packet_id: String,
    pub user_id: String,
    pub status: String,
    pub stripe_checkout_session_id: String,
    #[serde(default)]
    pub stripe_payment_intent_id: Option<String>,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub paid_at: Option<String>,
}

fn parse_uuid(field: &'static str, value: &str) -> Result<Uuid, ModelError> {
    Uuid::parse_str(value.trim()).map_err(|e| ModelError::field(field, format!("is not a UUID: {e}")))
}

fn parse_enum<T: FromStr<Err = String>>(field: &'static str, value: &str) -> Result<T, ModelError> {
    value.trim().parse().map_err(|e: String| ModelError::field(field, e))
}

fn parse_date(field: &'static str, value: Option<&str>) -> Result<Option<NaiveDate>, ModelError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => {
            // Accept plain dates and full timestamps; keep only the date part.
            let date_part = v.get(..10).unwrap_or(v);
            NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
                .map(Some)
                .map_err(|e| ModelError::field(field, format!("is not a date: {e}")))
        }
    }
}

fn parse_timestamp(field: &'static str, value: Option<&str>) -> Result<Option<DateTime<Utc>>, ModelError> {
    match value.map(str::trim).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(v) => DateTime::parse_from_rfc3339(v)
            .map(|t| Some(t.with_timezone(&Utc)))
            .map_err(|e| ModelError::field(field, format!("is not an RFC 3339 timestamp: {e}"))),
    }
}

fn non_negative(field: &'static str, value: Option<f64>) -> Result<Option<f64>, ModelError> {
    match value {
        Some(v) if !v.is_finite() || v < 0.0 => {
            Err(ModelError::field(field, format!("must be a non-negative number, got {v}")))
        }
        other => Ok(other),
    }
}

impl TryFrom<ClaimRow> for ClaimRecord {
    type Error = ModelError;

    fn try_from(row: ClaimRow) -> Result<Self, Self::Error> {
        let item_quantity = match row.item_qty {
            None => 0,
            Some(q) => u32::try_from(q)
                .map_err(|_| ModelError::field("item_qty", format!("out of range: {q}")))?,
        };

        Ok(ClaimRecord {
            id: parse_uuid("id", &row.id)?,
            owner_id: parse_uuid("user_id", &row.user_id)?,
            carrier: parse_enum("carrier", &row.carrier)?,
            issue_type: parse_enum("issue_type", &row.issue_type)?,
            filer_role: match row.filer_role.as_deref() {
                Some(v) => parse_enum("filer_role", v)?,
                None => FilerRole::Shipper,
            },
            claim_stage: match row.claim_stage.as_deref() {
                Some(v) => parse_enum("claim_stage", v)?,
                None => ClaimStage::NewClaim,
            },
            tracking_number: row.tracking_number.unwrap_or_default(),
            ship_date: parse_date("ship_date", row.ship_date.as_deref())?,
            delivery_date: parse_date("delivery_date", row.delivery_date.as_deref())?,
            origin: row.origin_text.unwrap_or_default(),
            destination: row.destination_text.unwrap_or_default(),
            service_level: row.service_level,
            declared_value: non_negative("declared_value", row.declared_value)?,
            item_description: row.item_description.unwrap_or_default(),
            item_quantity,
            item_value_total: non_negative("item_value_total", row.item_value_total)?.unwrap_or(0.0),
            shipping_cost: non_negative("shipping_cost", row.shipping_cost)?,
            tax: non_negative("tax", row.tax)?,
            requested_amount: non_negative("requested_amount", row.requested_amount)?.unwrap_or(0.0),
            is_insured: row
                .is_insured
                .as_deref()
                .map(|v| parse_enum("is_insured", v))
                .transpose()?,
            user_notes: row.user_notes,
            narrative: row.narrative.filter(|n| !n.trim().is_empty()),
            status: match row.status.as_deref() {
                Some(v) => parse_enum("status", v)?,
                None => ClaimStatus::Draft,
            },
        })
    }
}

impl From<&ClaimRecord> for ClaimRow {
    fn from(c: &ClaimRecord) -> Self {
        ClaimRow {
            id: c.id.to_string(),
            user_id: c.owner_id.to_string(),
            carrier: c.carrier.as_str().to_string(),
            issue_type: c.issue_type.as_str().to_string(),
            filer_role: Some(c.filer_role.as_str().to_string()),
            claim_stage: Some(c.claim_stage.as_str().to_string()),
            tracking_number: Some(c.tracking_number.clone()),
            ship_date: c.ship_date.map(|d| d.format("%Y-%m-%d").to_string()),
            delivery_date: c.delivery_date.map(|d| d.format("%Y-%m-%d").to_string()),
            origin_text: Some(c.origin.clone()),
            destination_text: Some(c.destination.clone()),
            service_level: c.service_level.clone(),
            declared_value: c.declared_value,
            item_description: Some(c.item_description.clone()),
            item_qty: Some(i64::from(c.item_quantity)),
            item_value_total: Some(c.item_value_total),
            shipping_cost: c.shipping_cost,
            tax: c.tax,
            requested_amount: Some(c.requested_amount),
            is_insured: c.is_insured.map(|i| i.as_str().to_string()),
            user_notes: c.user_notes.clone(),
            narrative: c.narrative.clone(),
            status: Some(c.status.as_str().to_string()),
        }
    }
}

impl TryFrom<EvidenceFileRow> for EvidenceFile {
    type Error = ModelError;

    fn try_from(row: EvidenceFileRow) -> Result<Self, Self::Error> {
        let size_bytes = match row.size_bytes {
            None => None,
            Some(s) => Some(
                u64::try_from(s).map_err(|_| ModelError::field("size_bytes", format!("is negative: {s}")))?,
            ),
        };

        Ok(EvidenceFile {
            id: parse_uuid("id", &row.id)?,
            claim_id: parse_uuid("packet_id", &row.packet_id)?,
            owner_id: parse_uuid("user_id", &row.user_id)?,
            kind: parse_enum("kind", &row.kind)?,
            storage_path: row.storage_path.unwrap_or_default(),
            original_name: row.original_name,
            mime_type: row.mime_type.filter(|m| !m.trim().is_empty()),
            size_bytes,
            created_at: parse_timestamp("created_at", row.created_at.as_deref())?,
        })
    }
}

impl From<&EvidenceFile> for EvidenceFileRow {
    fn from(f: &EvidenceFile) -> Self {
        EvidenceFileRow {
            id: f.id.to_string(),
            packet_id: f.claim_id.to_string(),
            user_id: f.owner_id.to_string(),
            kind: f.kind.as_str().to_string(),
            storage_path: Some(f.storage_path.clone()),
            original_name: f.original_name.clone(),
            mime_type: f.mime_type.clone(),
            size_bytes: f.size_bytes.and_then(|s| i64::try_from(s).ok()),
            created_at: f.created_at.map(|t| t.to_rfc3339()),
        }
    }
}

impl TryFrom<PaymentRow> for PaymentRecord {
    type Error = ModelError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        if row.stripe_checkout_session_id.trim().is_empty() {
            return Err(ModelError::field("stripe_checkout_session_id", "is empty"));
        }
        Ok(PaymentRecord {
            claim_id: parse_uuid("packet_id", &row.packet_id)?,
            owner_id: parse_uuid("user_id", &row.user_id)?,
            status: parse_enum("status", &row.status)?,
            checkout_session_id: row.stripe_checkout_session_id,
            payment_intent_id: row.stripe_payment_intent_id,
            amount_cents: row.amount,
            currency: row.currency.unwrap_or_else(|| "usd".to_string()),
            paid_at: parse_timestamp("paid_at", row.paid_at.as_deref())?,
        })
    }
}

impl From<&PaymentRecord> for PaymentRow {
    fn from(p: &PaymentRecord) -> Self {
        PaymentRow {
            packet_id: p.claim_id.to_string(),
            user_id: p.owner_id.to_string(),
            status: p.status.as_str().to_string(),
            stripe_checkout_session_id: p.checkout_session_id.clone(),
            stripe_payment_intent_id: p.payment_intent_id.clone(),
            amount: p.amount_cents,
            currency: Some(p.currency.clone()),
            paid_at: p.paid_at.map(|t| t.to_rfc3339()),
        }
    }
}
