//! Map-key normalization and the composite campaign-key codec
//!
//! Every dynamic dimension that becomes a map key in a daily aggregate row
//! goes through [`sanitize_key`] first. Campaign attribution additionally
//! packs a (bucket, campaign) pair into one collision-safe string so both
//! dimensions fit a single string-keyed map.

use crate::tracking::classify::SourceBucket;

/// Longest normalized key component.
pub const MAX_KEY_COMPONENT_LEN: usize = 64;

/// Longest composite key the storage layer accepts.
pub const MAX_COMPOSITE_KEY_LEN: usize = 128;

/// Joins bucket and campaign in a composite key. [`sanitize_key`] collapses
/// underscore runs, so the separator cannot appear inside either component.
pub const CAMPAIGN_SEPARATOR: &str = "__";

/// Campaign half of the per-bucket overflow key.
pub const OVERFLOW_CAMPAIGN: &str = "other_campaign";

/// Normalize a raw dimension value into a storage-safe map key.
///
/// Trims, case-folds, maps whitespace to `_`, keeps only `[a-z0-9_-]`,
/// collapses underscore runs, and truncates to
/// [`MAX_KEY_COMPONENT_LEN`]. Returns `None` when nothing survives —
/// the caller then drops the dimension for this event.
pub fn sanitize_key(raw: &str) -> Option<String> {
    let mut key = String::with_capacity(raw.len().min(MAX_KEY_COMPONENT_LEN));
    let mut last_was_underscore = false;

    for ch in raw.trim().to_lowercase().chars() {
        if key.len() >= MAX_KEY_COMPONENT_LEN {
            break;
        }
        let mapped = if ch.is_whitespace() { '_' } else { ch };
        match mapped {
            'a'..='z' | '0'..='9' | '-' => {
                key.push(mapped);
                last_was_underscore = false;
            }
            '_' => {
                if !last_was_underscore {
                    key.push('_');
                }
                last_was_underscore = true;
            }
            _ => {}
        }
    }

    if key.is_empty() {
        None
    } else {
        Some(key)
    }
}

/// Encode a (bucket, raw campaign) pair into a composite map key.
///
/// Returns `None` when the campaign normalizes to nothing (the event then
/// carries no campaign attribution) or when the result would be unsafe for
/// the storage layer: the JSON-path separator `.` is reserved, and keys are
/// length-capped.
pub fn encode_campaign_key(bucket: SourceBucket, campaign_raw: &str) -> Option<String> {
    let campaign = sanitize_key(campaign_raw)?;
    let key = format!("{}{}{}", bucket.as_str(), CAMPAIGN_SEPARATOR, campaign);
    if key.len() > MAX_COMPOSITE_KEY_LEN || key.contains('.') {
        return None;
    }
    Some(key)
}

/// Decode a composite key back into its (bucket, campaign) pair.
///
/// Only the closed bucket enumeration is tried as a prefix, so a campaign
/// value that happens to contain the separator cannot forge a different
/// bucket.
pub fn decode_campaign_key(key: &str) -> Option<(SourceBucket, String)> {
    for bucket in SourceBucket::ALL {
        if let Some(campaign) = key
            .strip_prefix(bucket.as_str())
            .and_then(|rest| rest.strip_prefix(CAMPAIGN_SEPARATOR))
        {
            if campaign.is_empty() {
                return None;
            }
            return Some((bucket, campaign.to_string()));
        }
    }
    None
}

/// The reserved overflow key that absorbs campaigns once the shared key
/// budget is spent. Never counted against the budget, never evicted.
pub fn overflow_campaign_key(bucket: SourceBucket) -> String {
    format!("{}{}{}", bucket.as_str(), CAMPAIGN_SEPARATOR, OVERFLOW_CAMPAIGN)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sanitize_basics() {
        assert_eq!(sanitize_key("Summer Sale!"), Some("summer_sale".to_string()));
        assert_eq!(sanitize_key("  FB "), Some("fb".to_string()));
        assert_eq!(sanitize_key("promo.2024"), Some("promo2024".to_string()));
        assert_eq!(sanitize_key("a-b_c"), Some("a-b_c".to_string()));
        assert_eq!(sanitize_key("!!!"), None);
        assert_eq!(sanitize_key(""), None);
        assert_eq!(sanitize_key("   "), None);
    }

    #[test]
    fn test_sanitize_collapses_underscore_runs() {
        assert_eq!(sanitize_key("big  launch"), Some("big_launch".to_string()));
        assert_eq!(sanitize_key("a__b"), Some("a_b".to_string()));
        assert_eq!(sanitize_key("a _ b"), Some("a_b".to_string()));
    }

    #[test]
    fn test_sanitize_truncates() {
        let long = "x".repeat(500);
        let key = sanitize_key(&long).unwrap();
        assert_eq!(key.len(), MAX_KEY_COMPONENT_LEN);
    }

    #[test]
    fn test_sanitize_is_idempotent() {
        for raw in ["Summer Sale!", "a__b", "  Mixed CASE-42  ", "x"] {
            let once = sanitize_key(raw).unwrap();
            assert_eq!(sanitize_key(&once), Some(once.clone()));
        }
    }

    #[test]
    fn test_encode_decode_round_trip_every_bucket() {
        for bucket in SourceBucket::ALL {
            for campaign in ["sale", "spring_launch", "a-b", "q4_2024"] {
                let key = encode_campaign_key(bucket, campaign).unwrap();
                assert_eq!(decode_campaign_key(&key), Some((bucket, campaign.to_string())));
            }
        }
    }

    #[test]
    fn test_encode_rejects_empty_campaign() {
        assert_eq!(encode_campaign_key(SourceBucket::Facebook, ""), None);
        assert_eq!(encode_campaign_key(SourceBucket::Facebook, " !? "), None);
    }

    #[test]
    fn test_encode_normalizes_campaign() {
        let key = encode_campaign_key(SourceBucket::Facebook, "Big  Launch").unwrap();
        assert_eq!(key, "facebook__big_launch");
    }

    #[test]
    fn test_decode_rejects_unknown_or_bare_prefixes() {
        assert_eq!(decode_campaign_key("pinterest__sale"), None);
        assert_eq!(decode_campaign_key("facebook"), None);
        assert_eq!(decode_campaign_key("facebook__"), None);
        assert_eq!(decode_campaign_key(""), None);
    }

    #[test]
    fn test_decode_is_not_spoofed_by_separator_in_campaign() {
        // A campaign containing the separator text still round-trips to the
        // encoding bucket, never to a bucket smuggled inside the campaign.
        let key = encode_campaign_key(SourceBucket::Facebook, "instagram__promo").unwrap();
        let (bucket, campaign) = decode_campaign_key(&key).unwrap();
        assert_eq!(bucket, SourceBucket::Facebook);
        assert_eq!(campaign, "instagram_promo");
    }

    #[test]
    fn test_overflow_key_decodes_to_reserved_campaign() {
        let key = overflow_campaign_key(SourceBucket::Tiktok);
        assert_eq!(key, "tiktok__other_campaign");
        let (bucket, campaign) = decode_campaign_key(&key).unwrap();
        assert_eq!(bucket, SourceBucket::Tiktok);
        assert_eq!(campaign, OVERFLOW_CAMPAIGN);
    }
}
