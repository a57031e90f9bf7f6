use strsim::normalized_levenshtein;

use crate::config::DedupeConfig;
use crate::models::Lead;
use crate::normalize::canonical_phone_digits;

/// Classification of a candidate lead against the existing set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum DedupeDecision {
    /// No plausible match; insert as a new lead.
    New,
    /// Matches an existing lead and carries no new information; skip.
    Duplicate { index: usize },
    /// Matches an existing lead and fills at least one empty field.
    Merge { index: usize, confidence: f64 },
}

/// Decide whether `candidate` is new, an exact duplicate, or should be merged
/// into one of `existing`. Callers pass `existing` ordered by ascending lead
/// id; ties on similarity resolve to the first (lowest-id) entry, so repeated
/// runs pick the same merge target.
pub fn decide(candidate: &Lead, existing: &[Lead], policy: &DedupeConfig) -> DedupeDecision {
    let mut best: Option<(usize, f64)> = None;

    for (index, other) in existing.iter().enumerate() {
        let similarity = if shares_hard_key(candidate, other) {
            1.0
        } else {
            composite_similarity(candidate, other, policy)
        };

        // Strict comparison keeps the earliest candidate on ties.
        if best.map(|(_, s)| similarity > s).unwrap_or(true) {
            best = Some((index, similarity));
        }
    }

    match best {
        Some((index, similarity)) if similarity >= policy.merge_threshold => {
            if would_fill(&existing[index], candidate) {
                DedupeDecision::Merge {
                    index,
                    confidence: similarity,
                }
            } else {
                DedupeDecision::Duplicate { index }
            }
        }
        _ => DedupeDecision::New,
    }
}

/// Identity keys that short-circuit fuzzy comparison: two listings with the
/// same canonical phone digits, the same email, or the same normalized
/// name + city are the same business no matter how the rest compares.
fn shares_hard_key(a: &Lead, b: &Lead) -> bool {
    if let (Some(pa), Some(pb)) = (&a.phone, &b.phone) {
        let (da, db) = (canonical_phone_digits(pa), canonical_phone_digits(pb));
        if da.len() >= 7 && da == db {
            return true;
        }
    }

    if let (Some(ea), Some(eb)) = (&a.email, &b.email) {
        if ea.eq_ignore_ascii_case(eb) {
            return true;
        }
    }

    normalize_key(&a.business_name) == normalize_key(&b.business_name)
        && normalize_key(a.city.as_deref().unwrap_or(""))
            == normalize_key(b.city.as_deref().unwrap_or(""))
}

fn normalize_key(value: &str) -> String {
    value.trim().to_lowercase()
}

/// Weighted edit-distance similarity across name, phone, and address.
/// Fields absent on either side drop out and the remaining weights are
/// renormalized, so a listing without an address is not penalized for it.
pub fn composite_similarity(a: &Lead, b: &Lead, policy: &DedupeConfig) -> f64 {
    let mut weighted = 0.0;
    let mut total_weight = 0.0;

    let name_sim = normalized_levenshtein(
        &normalize_key(&a.business_name),
        &normalize_key(&b.business_name),
    );
    weighted += policy.name_weight * name_sim;
    total_weight += policy.name_weight;

    if let (Some(pa), Some(pb)) = (&a.phone, &b.phone) {
        let phone_sim =
            normalized_levenshtein(&canonical_phone_digits(pa), &canonical_phone_digits(pb));
        weighted += policy.phone_weight * phone_sim;
        total_weight += policy.phone_weight;
    }

    if let (Some(aa), Some(ab)) = (&a.address, &b.address) {
        let addr_sim = normalized_levenshtein(&normalize_key(aa), &normalize_key(ab));
        weighted += policy.address_weight * addr_sim;
        total_weight += policy.address_weight;
    }

    if total_weight == 0.0 {
        0.0
    } else {
        weighted / total_weight
    }
}

/// Whether merging `candidate` into `existing` would fill any empty field.
pub fn would_fill(existing: &Lead, candidate: &Lead) -> bool {
    fn fills(existing: &Option<String>, incoming: &Option<String>) -> bool {
        existing.is_none() && incoming.is_some()
    }

    fills(&existing.phone, &candidate.phone)
        || fills(&existing.email, &candidate.email)
        || fills(&existing.website, &candidate.website)
        || fills(&existing.address, &candidate.address)
        || fills(&existing.city, &candidate.city)
        || fills(&existing.state, &candidate.state)
        || fills(&existing.category, &candidate.category)
}

/// Fill previously-empty fields of `existing` from `candidate`. The existing
/// record keeps its id and its populated fields. Returns true when anything
/// changed; the caller must recompute the score in that case.
pub fn merge_into(existing: &mut Lead, candidate: &Lead) -> bool {
    fn fill(slot: &mut Option<String>, incoming: &Option<String>) -> bool {
        if slot.is_none() && incoming.is_some() {
            *slot = incoming.clone();
            true
        } else {
            false
        }
    }

    let mut changed = false;
    changed |= fill(&mut existing.phone, &candidate.phone);
    changed |= fill(&mut existing.email, &candidate.email);
    changed |= fill(&mut existing.website, &candidate.website);
    changed |= fill(&mut existing.address, &candidate.address);
    changed |= fill(&mut existing.city, &candidate.city);
    changed |= fill(&mut existing.state, &candidate.state);
    changed |= fill(&mut existing.category, &candidate.category);
    changed
}

#[cfg(test)]
mod tests {
    use super::*;

    fn policy() -> DedupeConfig {
        DedupeConfig::default()
    }

    fn lead(id: Option<i64>, name: &str) -> Lead {
        let mut lead = Lead::new(1, name.to_string());
        lead.id = id;
        lead
    }

    #[test]
    fn identical_phone_digits_never_classify_as_new() {
        let mut existing = lead(Some(3), "Acme Inc");
        existing.phone = Some("+15551234567".to_string());

        let mut candidate = lead(None, "Completely Different Name");
        candidate.phone = Some("(555) 123-4567".to_string());

        let decision = decide(&candidate, &[existing], &policy());
        assert_ne!(decision, DedupeDecision::New);
    }

    #[test]
    fn us_and_e164_phone_forms_share_identity() {
        let mut existing = lead(Some(3), "Acme Inc");
        existing.phone = Some("5551234567".to_string());

        let mut candidate = lead(None, "Totally Unrelated Name LLC");
        candidate.phone = Some("+1 (555) 123-4567".to_string());

        let decision = decide(&candidate, &[existing], &policy());
        assert_ne!(decision, DedupeDecision::New);
    }

    #[test]
    fn exact_record_is_a_duplicate_skip() {
        let mut existing = lead(Some(3), "Acme Inc");
        existing.phone = Some("+15551234567".to_string());
        existing.city = Some("Springfield".to_string());

        let candidate = existing.clone();
        let decision = decide(&candidate, &[existing], &policy());
        assert_eq!(decision, DedupeDecision::Duplicate { index: 0 });
    }

    #[test]
    fn near_duplicate_name_merges_when_it_adds_information() {
        let existing = lead(Some(3), "Acme Plumbing Springfield");

        let mut candidate = lead(None, "Acme Plumbing Springfeld");
        candidate.email = Some("info@acmeplumbing.com".to_string());

        match decide(&candidate, &[existing], &policy()) {
            DedupeDecision::Merge { index, confidence } => {
                assert_eq!(index, 0);
                assert!(confidence >= policy().merge_threshold);
            }
            other => panic!("expected merge, got {:?}", other),
        }
    }

    #[test]
    fn dissimilar_records_are_new() {
        let mut existing = lead(Some(3), "Zeta Bakery");
        existing.phone = Some("+15550000001".to_string());

        let mut candidate = lead(None, "Acme Plumbing");
        candidate.phone = Some("+15559999999".to_string());

        assert_eq!(decide(&candidate, &[existing], &policy()), DedupeDecision::New);
    }

    #[test]
    fn ties_resolve_to_lowest_id() {
        let mut first = lead(Some(3), "Acme Inc");
        first.phone = Some("+15551234567".to_string());
        let mut second = lead(Some(9), "Acme Inc");
        second.phone = Some("+15551234567".to_string());

        let mut candidate = lead(None, "Acme Inc");
        candidate.phone = Some("+15551234567".to_string());
        candidate.email = Some("a@acme.com".to_string());

        // Callers pass candidates ordered by id; index 0 is the lowest id.
        match decide(&candidate, &[first, second], &policy()) {
            DedupeDecision::Merge { index, .. } => assert_eq!(index, 0),
            other => panic!("expected merge, got {:?}", other),
        }
    }

    #[test]
    fn merge_fills_only_empty_fields() {
        let mut existing = lead(Some(3), "Acme Inc");
        existing.phone = Some("+15551234567".to_string());
        existing.city = Some("Springfield".to_string());

        let mut candidate = lead(None, "Acme Incorporated");
        candidate.phone = Some("+15550000000".to_string());
        candidate.email = Some("a@acme.com".to_string());
        candidate.city = Some("Shelbyville".to_string());

        let changed = merge_into(&mut existing, &candidate);
        assert!(changed);
        // Populated fields keep their original values.
        assert_eq!(existing.phone.as_deref(), Some("+15551234567"));
        assert_eq!(existing.city.as_deref(), Some("Springfield"));
        assert_eq!(existing.business_name, "Acme Inc");
        // Empty ones are filled from the candidate.
        assert_eq!(existing.email.as_deref(), Some("a@acme.com"));
    }

    #[test]
    fn composite_weights_favor_the_name_field() {
        let policy = policy();
        let mut a = lead(Some(1), "Acme Plumbing");
        a.phone = Some("+15551234567".to_string());
        let mut b = lead(Some(2), "Acme Plumbing");
        b.phone = Some("+15559876543".to_string());

        // Equal names with different phones still score above the merge band.
        let sim = composite_similarity(&a, &b, &policy);
        assert!(sim > 0.5, "sim was {}", sim);
        assert!(sim < policy.high_threshold);
    }
}
