use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::{BTreeMap, BTreeSet};

/// OAuth credential shared by every service adapter.
///
/// Serialized form carries exactly these four fields; `expiry` round-trips with
/// sub-second precision via RFC 3339.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Credential {
    pub access_token: String,
    #[serde(default)]
    pub refresh_token: Option<String>,
    pub expiry: DateTime<Utc>,
    #[serde(default)]
    pub granted_scopes: BTreeSet<String>,
}

impl Credential {
    /// True if the token expires within `skew` of `now`.
    pub fn expires_within(&self, now: DateTime<Utc>, skew: Duration) -> bool {
        self.expiry <= now + skew
    }

    /// Scopes from `required` that this credential was not granted, in sorted order.
    pub fn missing_scopes<'a, I>(&self, required: I) -> Vec<String>
    where
        I: IntoIterator<Item = &'a String>,
    {
        let mut missing: Vec<String> = required
            .into_iter()
            .filter(|s| !self.granted_scopes.contains(*s))
            .cloned()
            .collect();
        missing.sort();
        missing.dedup();
        missing
    }
}

/// How sure the classifier is about an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    None,
    Low,
    Medium,
    High,
}

impl Confidence {
    pub fn from_score(score: f64) -> Self {
        if score >= 0.8 {
            Confidence::High
        } else if score >= 0.5 {
            Confidence::Medium
        } else if score > 0.0 {
            Confidence::Low
        } else {
            Confidence::None
        }
    }
}

impl std::fmt::Display for Confidence {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Confidence::None => "none",
            Confidence::Low => "low",
            Confidence::Medium => "medium",
            Confidence::High => "high",
        };
        f.write_str(s)
    }
}

/// Which classifier stage produced an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum IntentSource {
    Remote,
    Keyword,
    None,
}

/// A structured guess at what the user asked for. Produced and consumed within one turn.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub service_id: Option<String>,
    pub operation_name: Option<String>,
    #[serde(default)]
    pub parameters: BTreeMap<String, Value>,
    pub confidence: Confidence,
    pub raw_text: String,
    pub source: IntentSource,
    /// Conversational answer when the utterance was chat, not a command.
    #[serde(default)]
    pub reply: Option<String>,
    /// Why the intent is unresolved, e.g. the ambiguous candidates.
    #[serde(default)]
    pub note: Option<String>,
}

impl Intent {
    pub fn unresolved(raw_text: &str) -> Self {
        Self {
            service_id: None,
            operation_name: None,
            parameters: BTreeMap::new(),
            confidence: Confidence::None,
            raw_text: raw_text.to_string(),
            source: IntentSource::None,
            reply: None,
            note: None,
        }
    }

    pub fn resolved(
        raw_text: &str,
        service_id: &str,
        operation_name: &str,
        parameters: BTreeMap<String, Value>,
        confidence: Confidence,
        source: IntentSource,
    ) -> Self {
        Self {
            service_id: Some(service_id.to_string()),
            operation_name: Some(operation_name.to_string()),
            parameters,
            confidence,
            raw_text: raw_text.to_string(),
            source,
            reply: None,
            note: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.service_id.is_some()
            && self.operation_name.is_some()
            && self.confidence != Confidence::None
    }

    pub fn with_note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }
}

/// Per-session conversational state. Never persisted.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionContext {
    pub active_service_id: Option<String>,
    pub last_result_handles: Vec<String>,
}

impl SessionContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Resolve a 1-based positional reference against the last listed items.
    pub fn handle_at(&self, position: usize) -> Option<&str> {
        if position == 0 {
            return None;
        }
        self.last_result_handles.get(position - 1).map(String::as_str)
    }

    pub fn record_list(&mut self, mut handles: Vec<String>, cap: usize) {
        handles.truncate(cap);
        self.last_result_handles = handles;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cred(scopes: &[&str]) -> Credential {
        Credential {
            access_token: "at".into(),
            refresh_token: Some("rt".into()),
            expiry: Utc::now() + Duration::hours(1),
            granted_scopes: scopes.iter().map(|s| s.to_string()).collect(),
        }
    }

    #[test]
    fn test_credential_roundtrip_exact() {
        let c = cred(&["a", "b"]);
        let json = serde_json::to_string(&c).unwrap();
        let back: Credential = serde_json::from_str(&json).unwrap();
        assert_eq!(c, back);
        let v: Value = serde_json::from_str(&json).unwrap();
        assert_eq!(v.as_object().unwrap().len(), 4);
    }

    #[test]
    fn test_missing_scopes() {
        let c = cred(&["a"]);
        let required: Vec<String> = vec!["b".into(), "a".into(), "c".into()];
        assert_eq!(c.missing_scopes(&required), vec!["b".to_string(), "c".to_string()]);
    }

    #[test]
    fn test_expires_within() {
        let mut c = cred(&[]);
        let now = Utc::now();
        c.expiry = now + Duration::seconds(30);
        assert!(c.expires_within(now, Duration::seconds(60)));
        assert!(!c.expires_within(now, Duration::seconds(10)));
    }

    #[test]
    fn test_confidence_from_score() {
        assert_eq!(Confidence::from_score(0.95), Confidence::High);
        assert_eq!(Confidence::from_score(0.6), Confidence::Medium);
        assert_eq!(Confidence::from_score(0.2), Confidence::Low);
        assert_eq!(Confidence::from_score(0.0), Confidence::None);
    }

    #[test]
    fn test_handle_at() {
        let mut ctx = SessionContext::new();
        ctx.record_list(vec!["h1".into(), "h2".into(), "h3".into()], 20);
        assert_eq!(ctx.handle_at(2), Some("h2"));
        assert_eq!(ctx.handle_at(0), None);
        assert_eq!(ctx.handle_at(5), None);
    }

    #[test]
    fn test_record_list_caps() {
        let mut ctx = SessionContext::new();
        ctx.record_list((0..10).map(|i| format!("h{}", i)).collect(), 3);
        assert_eq!(ctx.last_result_handles.len(), 3);
    }

    #[test]
    fn test_intent_resolution_flags() {
        assert!(!Intent::unresolved("x").is_resolved());
        let i = Intent::resolved("x", "gmail", "list", BTreeMap::new(), Confidence::Low, IntentSource::Keyword);
        assert!(i.is_resolved());
    }
}
