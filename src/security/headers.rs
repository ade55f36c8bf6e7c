//! Header forwarding policy at the trust boundary.
//!
//! # Responsibilities
//! - Decide, per inbound header name, whether it crosses into call metadata
//! - Forward identity headers set by the upstream authenticating proxy
//! - Forward W3C trace-context headers regardless of case
//! - Apply a configurable fallback to everything else
//!
//! # Design Decisions
//! - `decide` is a pure function of the header name
//! - Identity headers match exactly on the canonical (Title-Case) name;
//!   callers canonicalize names first, see [`canonical_header_key`]
//! - Policies are swapped as a unit (`enriched` / `minimal`), never edited
//! - Never validates identity values; that is the upstream proxy's job

use http::{HeaderMap, HeaderName};
use serde::{Deserialize, Serialize};

/// Identity headers set by the authenticating proxy.
pub const X_AUTH_REQUEST_USER: &str = "X-Auth-Request-User";
pub const X_AUTH_REQUEST_EMAIL: &str = "X-Auth-Request-Email";
pub const X_AUTH_REQUEST_GROUPS: &str = "X-Auth-Request-Groups";

const IDENTITY_HEADERS: &[&str] = &[X_AUTH_REQUEST_USER, X_AUTH_REQUEST_EMAIL, X_AUTH_REQUEST_GROUPS];

/// W3C trace-context headers.
pub const TRACEPARENT: &str = "traceparent";
pub const TRACESTATE: &str = "tracestate";

/// Prefix that marks a header as explicit call metadata.
pub const METADATA_HEADER_PREFIX: &str = "Grpc-Metadata-";

/// Prefix given to permanent HTTP headers forwarded by the standard fallback.
pub const METADATA_PREFIX: &str = "grpcgateway-";

/// Permanent HTTP request headers (canonical form) kept by the standard fallback.
const PERMANENT_HEADERS: &[&str] = &[
    "Accept",
    "Accept-Charset",
    "Accept-Language",
    "Accept-Ranges",
    "Authorization",
    "Cache-Control",
    "Content-Type",
    "Cookie",
    "Date",
    "Expect",
    "From",
    "Host",
    "If-Match",
    "If-Modified-Since",
    "If-None-Match",
    "If-Schedule-Tag-Match",
    "If-Unmodified-Since",
    "Max-Forwards",
    "Origin",
    "Pragma",
    "Referer",
    "User-Agent",
    "Via",
    "Warning",
];

/// Outcome for one header name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Disposition {
    /// Forward into metadata under this key.
    Forward(String),
    Drop,
}

/// How a rule recognises a header name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum NamePattern {
    /// Byte-for-byte match.
    Exact(String),
    /// ASCII case-insensitive match.
    CaseInsensitive(String),
}

impl NamePattern {
    fn matches(&self, name: &str) -> bool {
        match self {
            NamePattern::Exact(expected) => name == expected,
            NamePattern::CaseInsensitive(expected) => name.eq_ignore_ascii_case(expected),
        }
    }
}

/// What happens to a header that matches a rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RuleAction {
    /// Keep the inbound name.
    Forward,
    /// Forward under a different metadata key.
    Rename(String),
    Drop,
}

/// One explicit forwarding rule.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderRule {
    pub pattern: NamePattern,
    pub action: RuleAction,
}

impl HeaderRule {
    pub fn forward_exact(name: &str) -> Self {
        Self {
            pattern: NamePattern::Exact(name.to_string()),
            action: RuleAction::Forward,
        }
    }

    pub fn forward_any_case(name: &str) -> Self {
        Self {
            pattern: NamePattern::CaseInsensitive(name.to_string()),
            action: RuleAction::Forward,
        }
    }

    /// Whether a header this rule forwards could end up under `key`.
    fn produces(&self, key: &str) -> bool {
        let name = match &self.pattern {
            NamePattern::Exact(name) | NamePattern::CaseInsensitive(name) => name,
        };
        match &self.action {
            RuleAction::Forward | RuleAction::Drop => name.eq_ignore_ascii_case(key),
            RuleAction::Rename(target) => {
                name.eq_ignore_ascii_case(key) || target.eq_ignore_ascii_case(key)
            }
        }
    }

    fn apply(&self, name: &str) -> Option<Disposition> {
        if !self.pattern.matches(name) {
            return None;
        }
        Some(match &self.action {
            RuleAction::Forward => Disposition::Forward(name.to_string()),
            RuleAction::Rename(key) => Disposition::Forward(key.clone()),
            RuleAction::Drop => Disposition::Drop,
        })
    }
}

/// Which explicit rule set is active.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum PolicyVariant {
    /// Identity and trace-context rules, then the fallback.
    #[default]
    Enriched,
    /// Fallback only.
    Minimal,
}

impl std::str::FromStr for PolicyVariant {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "enriched" => Ok(PolicyVariant::Enriched),
            "minimal" => Ok(PolicyVariant::Minimal),
            other => Err(format!("unknown header policy '{other}' (expected enriched or minimal)")),
        }
    }
}

/// Treatment of headers no explicit rule matched.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Fallback {
    /// Permanent HTTP headers become `grpcgateway-<Name>`,
    /// `Grpc-Metadata-<Key>` becomes `<Key>`, the rest is dropped.
    #[default]
    Standard,
    DropAll,
}

impl Fallback {
    fn decide(self, name: &str) -> Disposition {
        match self {
            Fallback::DropAll => Disposition::Drop,
            Fallback::Standard => {
                let canonical = canonical_header_key(name);
                if PERMANENT_HEADERS.contains(&canonical.as_str()) {
                    return Disposition::Forward(format!("{METADATA_PREFIX}{canonical}"));
                }
                match canonical.strip_prefix(METADATA_HEADER_PREFIX) {
                    Some(key) if !key.is_empty() => Disposition::Forward(key.to_string()),
                    _ => Disposition::Drop,
                }
            }
        }
    }
}

/// Ordered rules plus a fallback. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeaderPolicy {
    variant: PolicyVariant,
    rules: Vec<HeaderRule>,
    fallback: Fallback,
}

impl HeaderPolicy {
    /// Identity allow-list and trace-context headers, then `fallback`.
    pub fn enriched(fallback: Fallback) -> Self {
        Self {
            variant: PolicyVariant::Enriched,
            rules: vec![
                HeaderRule::forward_exact(X_AUTH_REQUEST_USER),
                HeaderRule::forward_exact(X_AUTH_REQUEST_EMAIL),
                HeaderRule::forward_exact(X_AUTH_REQUEST_GROUPS),
                HeaderRule::forward_any_case(TRACEPARENT),
                HeaderRule::forward_any_case(TRACESTATE),
            ],
            fallback,
        }
    }

    /// No explicit rules.
    pub fn minimal(fallback: Fallback) -> Self {
        Self {
            variant: PolicyVariant::Minimal,
            rules: Vec::new(),
            fallback,
        }
    }

    pub fn new(variant: PolicyVariant, fallback: Fallback) -> Self {
        match variant {
            PolicyVariant::Enriched => Self::enriched(fallback),
            PolicyVariant::Minimal => Self::minimal(fallback),
        }
    }

    pub fn variant(&self) -> PolicyVariant {
        self.variant
    }

    pub fn fallback(&self) -> Fallback {
        self.fallback
    }

    /// First matching rule wins; otherwise the fallback decides.
    ///
    /// The fallback never yields a key that an explicit rule or the identity
    /// allow-list owns, so `Grpc-Metadata-X-Auth-Request-User` cannot stand
    /// in for the header the authenticating proxy sets.
    pub fn decide(&self, name: &str) -> Disposition {
        if let Some(disposition) = self.rules.iter().find_map(|rule| rule.apply(name)) {
            return disposition;
        }
        match self.fallback.decide(name) {
            Disposition::Forward(key) if self.owns(&key) => {
                tracing::debug!(header = %name, key = %key, "Dropping header that shadows a protected key");
                Disposition::Drop
            }
            disposition => disposition,
        }
    }

    /// Whether `key` is reserved for an explicit rule or an identity header.
    fn owns(&self, key: &str) -> bool {
        IDENTITY_HEADERS
            .iter()
            .any(|identity| identity.eq_ignore_ascii_case(key))
            || self.rules.iter().any(|rule| rule.produces(key))
    }

    /// Build outgoing metadata from inbound headers.
    ///
    /// Names are canonicalized before `decide`; forwarded keys are lower-cased.
    /// Values of repeated headers are all kept, in order.
    pub fn forward(&self, headers: &HeaderMap) -> HeaderMap {
        let mut metadata = HeaderMap::new();
        for name in headers.keys() {
            let canonical = canonical_header_key(name.as_str());
            let key = match self.decide(&canonical) {
                Disposition::Forward(key) => key,
                Disposition::Drop => continue,
            };
            let key = match HeaderName::from_bytes(key.to_ascii_lowercase().as_bytes()) {
                Ok(key) => key,
                Err(_) => {
                    tracing::debug!(header = %canonical, "Dropping header with invalid metadata key");
                    continue;
                }
            };
            for value in headers.get_all(name) {
                metadata.append(key.clone(), value.clone());
            }
        }
        metadata
    }
}

impl Default for HeaderPolicy {
    fn default() -> Self {
        Self::enriched(Fallback::default())
    }
}

/// MIME canonical form: first letter and letters after `-` upper-cased,
/// everything else lower-cased. Names with bytes outside the token set
/// are returned unchanged.
pub fn canonical_header_key(name: &str) -> String {
    let valid = !name.is_empty()
        && name
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b"!#$%&'*+-.^_`|~".contains(&b));
    if !valid {
        return name.to_string();
    }

    let mut upper = true;
    name.chars()
        .map(|c| {
            let out = if upper {
                c.to_ascii_uppercase()
            } else {
                c.to_ascii_lowercase()
            };
            upper = c == '-';
            out
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use http::HeaderValue;

    fn forwarded(name: &str) -> Disposition {
        Disposition::Forward(name.to_string())
    }

    #[test]
    fn identity_headers_forward_unchanged() {
        let policy = HeaderPolicy::enriched(Fallback::DropAll);
        for name in [X_AUTH_REQUEST_USER, X_AUTH_REQUEST_EMAIL, X_AUTH_REQUEST_GROUPS] {
            assert_eq!(policy.decide(name), forwarded(name));
        }
    }

    #[test]
    fn identity_match_is_case_sensitive_in_decide() {
        let policy = HeaderPolicy::enriched(Fallback::DropAll);
        assert_eq!(policy.decide("x-auth-request-user"), Disposition::Drop);
    }

    #[test]
    fn identity_headers_forward_regardless_of_inbound_case() {
        let policy = HeaderPolicy::enriched(Fallback::DropAll);
        let mut headers = HeaderMap::new();
        headers.insert("x-auth-request-user", HeaderValue::from_static("alice"));
        headers.append("x-auth-request-groups", HeaderValue::from_static("admins"));
        headers.append("x-auth-request-groups", HeaderValue::from_static("ops"));

        let metadata = policy.forward(&headers);
        assert_eq!(metadata["x-auth-request-user"], "alice");
        let groups: Vec<_> = metadata.get_all("x-auth-request-groups").iter().collect();
        assert_eq!(groups, vec!["admins", "ops"]);
    }

    #[test]
    fn trace_headers_match_any_case() {
        let policy = HeaderPolicy::enriched(Fallback::DropAll);
        for name in ["traceparent", "TraceParent", "TRACEPARENT"] {
            assert_eq!(policy.decide(name), forwarded(name));
        }
        for name in ["tracestate", "Tracestate", "TRACESTATE"] {
            assert_eq!(policy.decide(name), forwarded(name));
        }
    }

    #[test]
    fn standard_fallback() {
        let policy = HeaderPolicy::enriched(Fallback::Standard);
        assert_eq!(policy.decide("Content-Type"), forwarded("grpcgateway-Content-Type"));
        assert_eq!(policy.decide("user-agent"), forwarded("grpcgateway-User-Agent"));
        assert_eq!(policy.decide("Grpc-Metadata-Tenant"), forwarded("Tenant"));
        assert_eq!(policy.decide("X-Custom"), Disposition::Drop);
        assert_eq!(policy.decide("Grpc-Metadata-"), Disposition::Drop);
    }

    #[test]
    fn metadata_prefix_cannot_shadow_identity_headers() {
        for variant in [PolicyVariant::Enriched, PolicyVariant::Minimal] {
            let policy = HeaderPolicy::new(variant, Fallback::Standard);
            for name in [
                "Grpc-Metadata-X-Auth-Request-User",
                "Grpc-Metadata-X-Auth-Request-Email",
                "grpc-metadata-x-auth-request-groups",
            ] {
                assert_eq!(policy.decide(name), Disposition::Drop, "{variant:?} {name}");
            }
        }

        let enriched = HeaderPolicy::enriched(Fallback::Standard);
        assert_eq!(enriched.decide("Grpc-Metadata-Traceparent"), Disposition::Drop);
        assert_eq!(enriched.decide("Grpc-Metadata-Tenant"), forwarded("Tenant"));
    }

    #[test]
    fn forged_identity_never_reaches_metadata() {
        let policy = HeaderPolicy::default();
        let mut headers = HeaderMap::new();
        headers.insert("grpc-metadata-x-auth-request-email", HeaderValue::from_static("admin@evil"));
        headers.insert("x-auth-request-email", HeaderValue::from_static("alice@real"));

        let metadata = policy.forward(&headers);
        let emails: Vec<_> = metadata.get_all("x-auth-request-email").iter().collect();
        assert_eq!(emails, vec!["alice@real"]);
        assert_eq!(metadata["x-auth-request-email"], "alice@real");
    }

    #[test]
    fn renamed_rule_targets_are_protected() {
        let policy = HeaderPolicy {
            variant: PolicyVariant::Enriched,
            rules: vec![HeaderRule {
                pattern: NamePattern::Exact("X-Tenant".into()),
                action: RuleAction::Rename("tenant-id".into()),
            }],
            fallback: Fallback::Standard,
        };
        assert_eq!(policy.decide("X-Tenant"), forwarded("tenant-id"));
        assert_eq!(policy.decide("Grpc-Metadata-Tenant-Id"), Disposition::Drop);
    }

    #[test]
    fn minimal_policy_uses_only_fallback() {
        let minimal = HeaderPolicy::minimal(Fallback::Standard);
        assert_eq!(minimal.decide(X_AUTH_REQUEST_USER), Disposition::Drop);
        assert_eq!(minimal.decide("traceparent"), Disposition::Drop);
        assert_eq!(minimal.decide("Accept"), forwarded("grpcgateway-Accept"));

        let closed = HeaderPolicy::minimal(Fallback::DropAll);
        for name in ["Accept", "Grpc-Metadata-Tenant", X_AUTH_REQUEST_EMAIL] {
            assert_eq!(closed.decide(name), Disposition::Drop);
        }
    }

    #[test]
    fn unmatched_headers_follow_fallback_in_both_variants() {
        for variant in [PolicyVariant::Enriched, PolicyVariant::Minimal] {
            let policy = HeaderPolicy::new(variant, Fallback::Standard);
            for name in ["Accept-Language", "X-Forwarded-Proto", "Grpc-Metadata-Zone"] {
                assert_eq!(policy.decide(name), Fallback::Standard.decide(name));
            }
        }
    }

    #[test]
    fn forwarded_keys_are_lower_case() {
        let policy = HeaderPolicy::default();
        let mut headers = HeaderMap::new();
        headers.insert("content-type", HeaderValue::from_static("application/json"));
        headers.insert("x-unrelated", HeaderValue::from_static("nope"));
        headers.insert("traceparent", HeaderValue::from_static("00-abc-def-01"));

        let metadata = policy.forward(&headers);
        assert_eq!(metadata["grpcgateway-content-type"], "application/json");
        assert_eq!(metadata["traceparent"], "00-abc-def-01");
        assert!(metadata.get("x-unrelated").is_none());
    }

    #[test]
    fn rule_actions() {
        let rename = HeaderRule {
            pattern: NamePattern::Exact("X-Tenant".into()),
            action: RuleAction::Rename("tenant-id".into()),
        };
        assert_eq!(rename.apply("X-Tenant"), Some(forwarded("tenant-id")));
        assert_eq!(rename.apply("X-Other"), None);

        let drop = HeaderRule {
            pattern: NamePattern::CaseInsensitive("cookie".into()),
            action: RuleAction::Drop,
        };
        assert_eq!(drop.apply("Cookie"), Some(Disposition::Drop));
    }

    #[test]
    fn canonical_keys() {
        assert_eq!(canonical_header_key("x-auth-request-user"), "X-Auth-Request-User");
        assert_eq!(canonical_header_key("CONTENT-TYPE"), "Content-Type");
        assert_eq!(canonical_header_key("traceparent"), "Traceparent");
        assert_eq!(canonical_header_key("bad header"), "bad header");
    }

    #[test]
    fn variant_parses_from_env_strings() {
        assert_eq!("Minimal".parse::<PolicyVariant>(), Ok(PolicyVariant::Minimal));
        assert_eq!(" enriched ".parse::<PolicyVariant>(), Ok(PolicyVariant::Enriched));
        assert!("open".parse::<PolicyVariant>().is_err());
    }
}
