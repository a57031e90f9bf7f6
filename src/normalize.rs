use std::sync::OnceLock;

use regex::Regex;

use crate::models::{Lead, RawRecord};
use crate::sources::Source;

fn email_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^[A-Za-z0-9._%+-]+@[A-Za-z0-9.-]+\.[A-Za-z]{2,}$").unwrap()
    })
}

/// Map a raw scraped record into a canonical lead. Returns None when the
/// record has no usable business name after trimming; that is a data-quality
/// skip, not an error.
pub fn normalize(record: &RawRecord, source: &Source) -> Option<Lead> {
    let business_name = record.get("business_name")?.trim();
    if business_name.is_empty() {
        return None;
    }

    let mut lead = Lead::new(source.id, business_name.to_string());

    lead.phone = record
        .get("phone")
        .and_then(clean_field)
        .map(|p| format_phone(&p));
    lead.email = record
        .get("email")
        .map(str::trim)
        .filter(|e| is_valid_email(e))
        .map(|e| e.to_lowercase());
    lead.website = record.get("website").and_then(clean_field);
    lead.address = record.get("address").and_then(clean_field);
    lead.city = record.get("city").and_then(clean_field);
    lead.state = record.get("state").and_then(clean_field);
    lead.category = record.get("category").and_then(clean_field);

    Some(lead)
}

fn clean_field(value: &str) -> Option<String> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

/// Best-effort E.164 formatting for US-style numbers. Inputs that do not fit
/// a known shape are kept as trimmed strings rather than rejected; scoring
/// penalizes them via `is_plausible_phone`.
pub fn format_phone(raw: &str) -> String {
    let digits = phone_digits(raw);
    match digits.len() {
        10 => format!("+1{}", digits),
        11 if digits.starts_with('1') => format!("+{}", digits),
        _ => raw.trim().to_string(),
    }
}

/// Just the digit characters of a phone field.
pub fn phone_digits(raw: &str) -> String {
    raw.chars().filter(|c| c.is_ascii_digit()).collect()
}

/// Digit identity key for dedupe. A leading US country code collapses so the
/// 10-digit and 11-digit forms of the same number compare equal.
pub fn canonical_phone_digits(raw: &str) -> String {
    let digits = phone_digits(raw);
    if digits.len() == 11 && digits.starts_with('1') {
        digits[1..].to_string()
    } else {
        digits
    }
}

pub fn is_plausible_phone(phone: &str) -> bool {
    phone_digits(phone).len() >= 10
}

/// RFC-shape check only; no network verification happens in the core.
pub fn is_valid_email(email: &str) -> bool {
    email_regex().is_match(email)
}
