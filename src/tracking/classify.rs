//! Traffic-source classification
//!
//! Maps raw UTM / referrer signals onto a small closed set of source
//! buckets so per-source breakdowns stay bounded no matter what callers
//! send. Classification is total: every input combination resolves to a
//! bucket, and raw strings are normalized before any matching so the
//! function never operates on unbounded or key-unsafe data.

use std::fmt;

use url::Url;

use crate::tracking::keys::sanitize_key;

/// Longest raw referrer we bother parsing.
const MAX_REFERRER_LEN: usize = 512;

/// Closed enumeration of traffic-source buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum SourceBucket {
    Facebook,
    Instagram,
    Tiktok,
    Linkedin,
    Youtube,
    X,
    Search,
    Direct,
    OtherSocial,
    Other,
}

impl SourceBucket {
    /// Every bucket in declaration order. Composite-key decoding and the
    /// fixed-enum source maps iterate this, so the set is closed by
    /// construction.
    pub const ALL: [SourceBucket; 10] = [
        SourceBucket::Facebook,
        SourceBucket::Instagram,
        SourceBucket::Tiktok,
        SourceBucket::Linkedin,
        SourceBucket::Youtube,
        SourceBucket::X,
        SourceBucket::Search,
        SourceBucket::Direct,
        SourceBucket::OtherSocial,
        SourceBucket::Other,
    ];

    /// Stable string form used as a map key and composite-key prefix.
    pub fn as_str(&self) -> &'static str {
        match self {
            SourceBucket::Facebook => "facebook",
            SourceBucket::Instagram => "instagram",
            SourceBucket::Tiktok => "tiktok",
            SourceBucket::Linkedin => "linkedin",
            SourceBucket::Youtube => "youtube",
            SourceBucket::X => "x",
            SourceBucket::Search => "search",
            SourceBucket::Direct => "direct",
            SourceBucket::OtherSocial => "other_social",
            SourceBucket::Other => "other",
        }
    }

}

impl fmt::Display for SourceBucket {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// utm_source values that map straight to a bucket.
const SOURCE_ALIASES: &[(&str, SourceBucket)] = &[
    ("facebook", SourceBucket::Facebook),
    ("fb", SourceBucket::Facebook),
    ("meta", SourceBucket::Facebook),
    ("instagram", SourceBucket::Instagram),
    ("ig", SourceBucket::Instagram),
    ("tiktok", SourceBucket::Tiktok),
    ("tt", SourceBucket::Tiktok),
    ("linkedin", SourceBucket::Linkedin),
    ("li", SourceBucket::Linkedin),
    ("youtube", SourceBucket::Youtube),
    ("yt", SourceBucket::Youtube),
    ("x", SourceBucket::X),
    ("twitter", SourceBucket::X),
    ("google", SourceBucket::Search),
    ("bing", SourceBucket::Search),
    ("duckduckgo", SourceBucket::Search),
    ("yahoo", SourceBucket::Search),
    ("search", SourceBucket::Search),
];

/// utm_medium values that mark traffic as social without naming a network.
const SOCIAL_MEDIUMS: &[&str] = &["social", "social-media", "smm"];

/// Referrer hostname suffixes per bucket. Matching is suffix-based so
/// `www.` and regional subdomains resolve without enumeration.
const REFERRER_DOMAINS: &[(&str, SourceBucket)] = &[
    ("facebook.com", SourceBucket::Facebook),
    ("fb.com", SourceBucket::Facebook),
    ("instagram.com", SourceBucket::Instagram),
    ("tiktok.com", SourceBucket::Tiktok),
    ("linkedin.com", SourceBucket::Linkedin),
    ("lnkd.in", SourceBucket::Linkedin),
    ("youtube.com", SourceBucket::Youtube),
    ("youtu.be", SourceBucket::Youtube),
    ("twitter.com", SourceBucket::X),
    ("x.com", SourceBucket::X),
    ("t.co", SourceBucket::X),
    ("google.com", SourceBucket::Search),
    ("bing.com", SourceBucket::Search),
    ("duckduckgo.com", SourceBucket::Search),
    ("yahoo.com", SourceBucket::Search),
    ("yandex.com", SourceBucket::Search),
    ("baidu.com", SourceBucket::Search),
];

/// Classify an event's traffic source.
///
/// Priority order: utm_source alias, social utm_medium, referrer domain
/// suffix, unmatched-but-present referrer (`other`), no signal (`direct`).
pub fn classify(
    utm_source: Option<&str>,
    utm_medium: Option<&str>,
    referrer: Option<&str>,
) -> SourceBucket {
    if let Some(source) = utm_source.and_then(sanitize_key) {
        if let Some((_, bucket)) = SOURCE_ALIASES.iter().find(|(alias, _)| *alias == source) {
            return *bucket;
        }
    }

    if let Some(medium) = utm_medium.and_then(sanitize_key) {
        if SOCIAL_MEDIUMS.contains(&medium.as_str()) {
            return SourceBucket::OtherSocial;
        }
    }

    let referrer = referrer.map(str::trim).filter(|r| !r.is_empty());
    if let Some(referrer) = referrer {
        if let Some(host) = referrer_host(referrer) {
            for (domain, bucket) in REFERRER_DOMAINS {
                if host_matches(&host, domain) {
                    return *bucket;
                }
            }
        }
        // Referrer present but not recognized (or unparseable).
        return SourceBucket::Other;
    }

    SourceBucket::Direct
}

/// Extract a lowercased hostname from a raw referrer string.
///
/// Browsers send absolute URLs in `Referer`, but scheme-less values show up
/// from custom clients; those get one retry with an assumed https scheme.
pub fn referrer_host(raw: &str) -> Option<String> {
    let raw = raw.trim();
    if raw.is_empty() || raw.len() > MAX_REFERRER_LEN {
        return None;
    }

    let parsed = Url::parse(raw)
        .or_else(|_| Url::parse(&format!("https://{}", raw)))
        .ok()?;

    let host = parsed.host_str()?.trim_end_matches('.').to_ascii_lowercase();
    if host.is_empty() {
        None
    } else {
        Some(host)
    }
}

/// True when `host` equals `domain` or is a subdomain of it.
fn host_matches(host: &str, domain: &str) -> bool {
    if host == domain {
        return true;
    }
    host.len() > domain.len()
        && host.ends_with(domain)
        && host.as_bytes()[host.len() - domain.len() - 1] == b'.'
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_utm_source_alias_wins() {
        assert_eq!(classify(Some("fb"), None, None), SourceBucket::Facebook);
        assert_eq!(classify(Some("ig"), None, None), SourceBucket::Instagram);
        assert_eq!(classify(Some("google"), None, None), SourceBucket::Search);
        // utm_source outranks a referrer pointing elsewhere
        assert_eq!(
            classify(Some("tiktok"), None, Some("https://www.google.com/search?q=x")),
            SourceBucket::Tiktok
        );
    }

    #[test]
    fn test_utm_source_is_normalized_before_matching() {
        assert_eq!(classify(Some("  FB "), None, None), SourceBucket::Facebook);
        assert_eq!(classify(Some("Twitter"), None, None), SourceBucket::X);
    }

    #[test]
    fn test_social_medium_fallback() {
        assert_eq!(classify(None, Some("social"), None), SourceBucket::OtherSocial);
        assert_eq!(classify(None, Some("SMM"), None), SourceBucket::OtherSocial);
        assert_eq!(
            classify(Some("some-newsletter"), Some("social-media"), None),
            SourceBucket::OtherSocial
        );
    }

    #[test]
    fn test_referrer_domain_suffixes() {
        assert_eq!(
            classify(None, None, Some("https://www.facebook.com/profile")),
            SourceBucket::Facebook
        );
        assert_eq!(
            classify(None, None, Some("https://l.instagram.com/?u=x")),
            SourceBucket::Instagram
        );
        assert_eq!(classify(None, None, Some("https://t.co/abc")), SourceBucket::X);
        assert_eq!(
            classify(None, None, Some("https://www.google.de.example.com/")),
            SourceBucket::Other
        );
    }

    #[test]
    fn test_scheme_less_referrer() {
        assert_eq!(classify(None, None, Some("youtube.com/watch?v=1")), SourceBucket::Youtube);
    }

    #[test]
    fn test_unmatched_referrer_is_other() {
        assert_eq!(
            classify(None, None, Some("https://blog.example.org/post")),
            SourceBucket::Other
        );
        // Unparseable garbage still counts as "a referrer was present"
        assert_eq!(classify(None, None, Some("not a url at all")), SourceBucket::Other);
    }

    #[test]
    fn test_no_signal_is_direct() {
        assert_eq!(classify(None, None, None), SourceBucket::Direct);
        assert_eq!(classify(Some("   "), Some(""), Some("  ")), SourceBucket::Direct);
    }

    #[test]
    fn test_bucket_keys_are_distinct() {
        let mut keys: Vec<&str> = SourceBucket::ALL.iter().map(|b| b.as_str()).collect();
        keys.sort();
        keys.dedup();
        assert_eq!(keys.len(), SourceBucket::ALL.len());
    }

    #[test]
    fn test_host_suffix_matching_requires_label_boundary() {
        assert!(host_matches("facebook.com", "facebook.com"));
        assert!(host_matches("m.facebook.com", "facebook.com"));
        assert!(!host_matches("notfacebook.com", "facebook.com"));
        assert!(!host_matches("facebook.com.evil.net", "facebook.com"));
    }
}
