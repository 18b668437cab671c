//! Claim completeness scoring.
//!
//! Mirrors the checklist the filer sees while building a claim: eleven
//! required fields, placeholder text counts as missing.

use crate::model::ClaimRecord;
use serde::Serialize;

const PLACEHOLDERS: &[&str] = &["tbd", "origin tbd", "destination tbd", "item description"];

/// Share of required fields that are filled in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Completeness {
    /// 0–100, rounded.
    pub percent: u8,
    /// Labels of the missing fields, in checklist order.
    pub missing: Vec<&'static str>,
}

impl Completeness {
    pub fn is_complete(&self) -> bool {
        self.missing.is_empty()
    }
}

fn text_present(value: &str) -> bool {
    let normalized = value.trim().to_lowercase();
    !normalized.is_empty() && !PLACEHOLDERS.contains(&normalized.as_str())
}

/// Score a claim against the required-field checklist.
pub fn completeness(claim: &ClaimRecord) -> Completeness {
    // Carrier, issue type and filer role are typed enums and always present.
    let checks: [(&'static str, bool); 11] = [
        ("Carrier", true),
        ("Issue type", true),
        ("Filer role", true),
        ("Tracking number", text_present(&claim.tracking_number)),
        ("Ship date", claim.ship_date.is_some()),
        ("Origin", text_present(&claim.origin)),
        ("Destination", text_present(&claim.destination)),
        ("Item description", text_present(&claim.item_description)),
        ("Item quantity", claim.item_quantity >= 1),
        ("Item value", claim.item_value_total > 0.0),
        ("Requested amount", claim.requested_amount > 0.0),
    ];

    let satisfied = checks.iter().filter(|(_, ok)| *ok).count();
    let missing = checks
        .iter()
        .filter(|(_, ok)| !*ok)
        .map(|(label, _)| *label)
        .collect();
    let percent = ((satisfied as f64 / checks.len() as f64) * 100.0).round() as u8;

    Completeness { percent, missing }
}
