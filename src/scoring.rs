use chrono::{Duration, Utc};

use crate::models::Lead;
use crate::normalize::{is_plausible_phone, is_valid_email};

const HAS_PHONE: i64 = 25;
const PHONE_VALID: i64 = 10;
const HAS_EMAIL: i64 = 20;
const EMAIL_VALID: i64 = 10;
const HAS_WEBSITE: i64 = 15;
const HAS_ADDRESS: i64 = 10;
const HAS_LOCALITY: i64 = 5;
const FRESHNESS: i64 = 5;

/// Quality score in [0, 100] from field completeness and validity signals.
/// Pure over the lead snapshot; recomputed after every field update.
pub fn score_lead(lead: &Lead) -> i64 {
    let mut score = 0;

    if let Some(phone) = &lead.phone {
        score += HAS_PHONE;
        if is_plausible_phone(phone) {
            score += PHONE_VALID;
        }
    }

    if let Some(email) = &lead.email {
        score += HAS_EMAIL;
        if is_valid_email(email) {
            score += EMAIL_VALID;
        }
    }

    if lead.website.is_some() {
        score += HAS_WEBSITE;
    }

    if lead.has_full_address() {
        score += HAS_ADDRESS;
    }

    if lead.city.is_some() || lead.state.is_some() {
        score += HAS_LOCALITY;
    }

    if Utc::now() - lead.created_at < Duration::days(7) {
        score += FRESHNESS;
    }

    score.min(100)
}

/// Bucket a score for review screens.
pub fn classify(score: i64) -> &'static str {
    match score {
        s if s >= 80 => "Hot",
        s if s >= 60 => "Warm",
        s if s >= 40 => "Cold",
        _ => "Poor",
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lead() -> Lead {
        Lead::new(1, "Acme Inc".to_string())
    }

    #[test]
    fn empty_lead_scores_only_freshness() {
        assert_eq!(score_lead(&lead()), FRESHNESS);
    }

    #[test]
    fn complete_lead_scores_high() {
        let mut lead = lead();
        lead.phone = Some("+15551234567".to_string());
        lead.email = Some("info@acme.com".to_string());
        lead.website = Some("https://acme.com".to_string());
        lead.address = Some("12 Main St".to_string());
        lead.city = Some("Springfield".to_string());

        let score = score_lead(&lead);
        assert_eq!(score, 100);
        assert_eq!(classify(score), "Hot");
    }

    #[test]
    fn scoring_is_deterministic_for_unchanged_lead() {
        let mut lead = lead();
        lead.phone = Some("555-0199".to_string());
        lead.website = Some("https://acme.com".to_string());

        assert_eq!(score_lead(&lead), score_lead(&lead));
    }

    #[test]
    fn implausible_phone_earns_presence_points_only() {
        let mut lead = lead();
        lead.phone = Some("call us!".to_string());
        let with_junk = score_lead(&lead);

        lead.phone = Some("+15551234567".to_string());
        let with_real = score_lead(&lead);

        assert_eq!(with_real - with_junk, PHONE_VALID);
    }

    #[test]
    fn filling_a_field_raises_the_score() {
        let mut lead = lead();
        lead.phone = Some("+15551234567".to_string());
        let before = score_lead(&lead);

        lead.email = Some("a@acme.com".to_string());
        let after = score_lead(&lead);
        assert!(after > before);
    }
}
