//! Default claim narrative.
//!
//! When the filer did not write their own narrative, one is synthesized from
//! the claim fields. The text is frozen onto the claim the first time a
//! packet is generated, so this function must be a pure function of the
//! record: no clock, no locale, no randomness.

use crate::model::{ClaimRecord, IssueType};
use chrono::NaiveDate;

/// Long, locale-independent date form, e.g. `March 2, 2024`.
pub fn format_long_date(date: NaiveDate) -> String {
    date.format("%B %-d, %Y").to_string()
}

/// `$1234.50`-style amount, or `None` when there is nothing to claim.
pub fn format_amount(amount: f64) -> Option<String> {
    (amount.is_finite() && amount > 0.0).then(|| format!("${amount:.2}"))
}

fn or_filler<'a>(value: &'a str, filler: &'a str) -> &'a str {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        filler
    } else {
        trimmed
    }
}

fn issue_opener(issue: IssueType) -> &'static str {
    match issue {
        IssueType::Damaged => "The shipment arrived damaged despite appropriate packaging.",
        IssueType::Lost => "The shipment never arrived to the recipient.",
        IssueType::MissingContents => "The package arrived with missing contents.",
    }
}

/// Build the four-paragraph default narrative for a claim.
pub fn synthesize(claim: &ClaimRecord) -> String {
    let carrier = claim.carrier.label();
    let ship_date = claim
        .ship_date
        .map(format_long_date)
        .unwrap_or_else(|| "the ship date".to_string());
    let origin = or_filler(&claim.origin, "the origin");
    let destination = or_filler(&claim.destination, "the destination");
    let item = or_filler(&claim.item_description, "the item");
    let tracking = or_filler(&claim.tracking_number, "not provided");
    let requested =
        format_amount(claim.requested_amount).unwrap_or_else(|| "the claimed amount".to_string());

    let delivery_line = match claim.delivery_date {
        Some(date) => format!(
            "Delivery was recorded on {}, but the issue was identified at that time.",
            format_long_date(date)
        ),
        None => "Delivery has not been confirmed yet.".to_string(),
    };

    [
        format!(
            "I am filing a claim for the shipment sent via {carrier} (tracking {tracking}) on {ship_date} from {origin} to {destination}."
        ),
        format!("{} {}", issue_opener(claim.issue_type), delivery_line),
        format!(
            "The shipment contained {item}. I am requesting reimbursement of {requested} to cover the loss/damage."
        ),
        format!(
            "Please review the attached evidence supporting this {} claim and advise on next steps.",
            claim.issue_type.label().to_lowercase()
        ),
    ]
    .join("\n\n")
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Carrier;
    use uuid::Uuid;

    fn claim(issue: IssueType) -> ClaimRecord {
        let mut c = ClaimRecord::draft(Uuid::nil(), Uuid::nil(), Carrier::Ups, issue);
        c.tracking_number = "1Z999AA10123456784".into();
        c.ship_date = NaiveDate::from_ymd_opt(2024, 3, 2);
        c.origin = "Denver, CO".into();
        c.destination = "Austin, TX".into();
        c.item_description = "a ceramic table lamp".into();
        c.requested_amount = 129.0;
        c
    }

    #[test]
    fn four_paragraphs_with_fields() {
        let text = synthesize(&claim(IssueType::Damaged));
        let paragraphs: Vec<&str> = text.split("\n\n").collect();
        assert_eq!(paragraphs.len(), 4);
        assert!(paragraphs[0].contains("via UPS (tracking 1Z999AA10123456784) on March 2, 2024"));
        assert!(paragraphs[0].contains("from Denver, CO to Austin, TX"));
        assert!(paragraphs[1].starts_with("The shipment arrived damaged"));
        assert!(paragraphs[1].ends_with("Delivery has not been confirmed yet."));
        assert!(paragraphs[2].contains("$129.00"));
        assert!(paragraphs[3].contains("this damaged claim"));
    }

    #[test]
    fn opener_depends_on_issue() {
        assert!(synthesize(&claim(IssueType::Lost)).contains("never arrived"));
        let missing = synthesize(&claim(IssueType::MissingContents));
        assert!(missing.contains("missing contents."));
        assert!(missing.contains("this missing contents claim"));
    }

    #[test]
    fn missing_fields_use_filler() {
        let mut c = claim(IssueType::Damaged);
        c.ship_date = None;
        c.origin = "  ".into();
        c.destination.clear();
        c.item_description.clear();
        c.requested_amount = 0.0;
        let text = synthesize(&c);
        assert!(text.contains("on the ship date from the origin to the destination"));
        assert!(text.contains("contained the item."));
        assert!(text.contains("reimbursement of the claimed amount"));
    }

    #[test]
    fn delivery_date_is_long_form() {
        let mut c = claim(IssueType::Damaged);
        c.delivery_date = NaiveDate::from_ymd_opt(2024, 11, 15);
        assert!(synthesize(&c).contains("Delivery was recorded on November 15, 2024"));
    }

    #[test]
    fn deterministic() {
        let c = claim(IssueType::Lost);
        assert_eq!(synthesize(&c), synthesize(&c));
    }
}
