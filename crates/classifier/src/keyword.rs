use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use serde_json::Value;
use std::collections::BTreeMap;
use tracing::debug;
use workdesk_core::{Confidence, Intent, IntentSource, Result};
use workdesk_services::{OperationSpec, ParamKind, ServiceDescriptor};

use crate::{Classifier, ClassifyInput};

static QUOTED_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#""([^"]+)"|“([^”]+)”|(?:^|\s)'([^']+)'"#).expect("valid quote regex")
});
static EMAIL_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"[A-Za-z0-9._%+\-]+@[A-Za-z0-9\-]+(?:\.[A-Za-z0-9\-]+)+").expect("valid email regex")
});
static DATE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(\d{4}-\d{2}-\d{2}|today|tomorrow)\b").expect("valid date regex")
});
static REFERENCE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)(?:\b(?:item|number)\s*#?\s*|#\s*)(\d+)\b").expect("valid reference regex")
});
static RANGE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\b((?:[A-Za-z0-9_]+!)?[A-Za-z]{1,3}\d+:[A-Za-z]{1,3}\d+)\b").expect("valid range regex")
});
static PATH_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?:^|\s)(\S*/\S+|\S+\.[A-Za-z0-9]{1,5})(?:\s|$)").expect("valid path regex")
});
static PHONE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(\+?\d[\d\s().\-]{5,}\d)").expect("valid phone regex"));
static ROLE_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)\b(reader|commenter|writer)\b").expect("valid role regex"));
static LAYOUT_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(title and two columns|title and body|title only|section header|blank)\b")
        .expect("valid layout regex")
});
static COUNT_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\b(\d{1,3})\b").expect("valid count regex"));
static COLON_RE: Lazy<Regex> = Lazy::new(|| Regex::new(r":\s+(.+)$").expect("valid colon regex"));
static STRONG_CUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:called|named|titled|saying)\s+(.+)$").expect("valid cue regex")
});
static WEAK_CUE_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"(?i)\b(?:about|for|subject)\s+(.+)$").expect("valid cue regex")
});

/// Slots recognised by name rather than kind, in extraction order.
const NAMED_SLOTS: [&str; 6] = ["range", "path", "phone", "role", "layout", "max_results"];

/// Words dropped from the end of free text, e.g. "pay rent for" -> "pay rent".
const TRAILING_FILLER: [&str; 10] = ["on", "at", "to", "for", "by", "due", "in", "with", "and", "from"];

const NAMED_SERVICE_BONUS: usize = 100;
const ACTIVE_SERVICE_BONUS: usize = 50;

fn named_slot_pattern(name: &str) -> Option<&'static Regex> {
    match name {
        "range" => Some(&*RANGE_RE),
        "path" => Some(&*PATH_RE),
        "phone" => Some(&*PHONE_RE),
        "role" => Some(&*ROLE_RE),
        "layout" => Some(&*LAYOUT_RE),
        "max_results" => Some(&*COUNT_RE),
        _ => None,
    }
}

/// A scored (service, operation) guess.
#[derive(Debug, Clone)]
pub struct Candidate<'a> {
    pub service_id: &'a str,
    pub operation: &'a OperationSpec,
    pub score: usize,
}

impl Candidate<'_> {
    pub fn label(&self) -> String {
        format!("{}.{}", self.service_id, self.operation.name)
    }
}

/// Deterministic fallback: matches service keywords and operation phrases.
///
/// A candidate scores the length of its longest matched phrase, plus a large
/// bonus when its service is named and a smaller one when it is the active
/// service and no service is named. Only a strict maximum resolves.
#[derive(Debug, Default, Clone)]
pub struct KeywordClassifier;

impl KeywordClassifier {
    pub fn new() -> Self {
        Self
    }

    /// Every candidate, best first; ties ordered by (service, operation).
    pub fn rank<'a>(
        &self,
        raw_text: &str,
        services: &[&'a ServiceDescriptor],
        active_service: Option<&str>,
    ) -> Vec<Candidate<'a>> {
        let stripped = EMAIL_RE.replace_all(&QUOTED_RE.replace_all(raw_text, " "), " ").into_owned();
        let text = normalize(&stripped);

        let named: Vec<&str> = services
            .iter()
            .filter(|d| {
                contains_phrase(&text, d.service_id)
                    || d.keywords.iter().any(|k| contains_phrase(&text, k))
            })
            .map(|d| d.service_id)
            .collect();

        let mut candidates = Vec::new();
        for &d in services {
            let is_named = named.contains(&d.service_id);
            let bonus = if is_named {
                NAMED_SERVICE_BONUS
            } else if named.is_empty() && active_service == Some(d.service_id) {
                ACTIVE_SERVICE_BONUS
            } else {
                0
            };

            let before = candidates.len();
            for op in &d.operations {
                let spoken = op.name.replace('_', " ");
                let best = std::iter::once(spoken.as_str())
                    .chain(op.synonyms.iter().copied())
                    .filter(|p| contains_phrase(&text, p))
                    .map(|p| p.chars().count())
                    .max();
                if let Some(len) = best {
                    candidates.push(Candidate {
                        service_id: d.service_id,
                        operation: op,
                        score: len + bonus,
                    });
                }
            }
            if candidates.len() == before && is_named {
                if let Some(first) = d.operations.first() {
                    candidates.push(Candidate {
                        service_id: d.service_id,
                        operation: first,
                        score: bonus,
                    });
                }
            }
        }

        candidates.sort_by(|a, b| {
            b.score
                .cmp(&a.score)
                .then_with(|| a.service_id.cmp(b.service_id))
                .then_with(|| a.operation.name.cmp(b.operation.name))
        });
        candidates
    }
}

#[async_trait]
impl Classifier for KeywordClassifier {
    fn name(&self) -> &'static str {
        "keyword"
    }

    async fn classify(&self, input: &ClassifyInput<'_>) -> Result<Intent> {
        let active = input.context.active_service_id.as_deref();
        let ranked = self.rank(input.raw_text, input.services, active);

        let mut unresolved = Intent::unresolved(input.raw_text);
        unresolved.source = IntentSource::Keyword;

        let Some(top) = ranked.first() else {
            debug!(text = %input.raw_text, "No keyword match");
            return Ok(unresolved);
        };
        let tied: Vec<String> = ranked
            .iter()
            .take_while(|c| c.score == top.score)
            .map(Candidate::label)
            .collect();
        if tied.len() > 1 {
            debug!(candidates = ?tied, score = top.score, "Ambiguous keyword match");
            return Ok(unresolved.with_note(format!("ambiguous: {}", tied.join(", "))));
        }

        let parameters = extract_parameters(input.raw_text, top.operation);
        debug!(
            service = top.service_id,
            operation = top.operation.name,
            score = top.score,
            params = parameters.len(),
            "Keyword match"
        );
        Ok(Intent::resolved(
            input.raw_text,
            top.service_id,
            top.operation.name,
            parameters,
            Confidence::Low,
            IntentSource::Keyword,
        ))
    }
}

/// Lowercase words separated by single spaces, padded with a space on each side.
fn normalize(text: &str) -> String {
    let cleaned: String = text
        .to_lowercase()
        .chars()
        .map(|c| if c.is_alphanumeric() || c == '\'' { c } else { ' ' })
        .collect();
    format!(" {} ", cleaned.split_whitespace().collect::<Vec<_>>().join(" "))
}

fn contains_phrase(normalized: &str, phrase: &str) -> bool {
    let phrase = normalize(phrase);
    !phrase.trim().is_empty() && normalized.contains(&phrase)
}

/// Remove up to `limit` matches of `re` from `rest`, returning capture group 1 of each.
fn take_matches(re: &Regex, rest: &mut String, limit: usize) -> Vec<String> {
    if limit == 0 {
        return Vec::new();
    }
    let found: Vec<(String, String)> = re
        .captures_iter(rest.as_str())
        .take(limit)
        .filter_map(|caps| {
            let whole = caps.get(0)?.as_str().to_string();
            let value = caps.get(1).unwrap_or(caps.get(0)?).as_str().trim().to_string();
            Some((whole, value))
        })
        .collect();
    for (whole, _) in &found {
        *rest = rest.replacen(whole.as_str(), " ", 1);
    }
    found.into_iter().map(|(_, value)| value).collect()
}

fn trim_filler(text: &str) -> String {
    let mut words: Vec<&str> = text
        .trim_matches(|c: char| c.is_whitespace() || ".,!?;:".contains(c))
        .split_whitespace()
        .collect();
    while words
        .last()
        .is_some_and(|w| TRAILING_FILLER.contains(&w.to_lowercase().as_str()))
    {
        words.pop();
    }
    words.join(" ")
}

/// Heuristic slot filling for one operation.
pub fn extract_parameters(raw_text: &str, op: &OperationSpec) -> BTreeMap<String, Value> {
    let mut params = BTreeMap::new();
    let mut rest = raw_text.to_string();

    let mut pool: Vec<String> = QUOTED_RE
        .captures_iter(raw_text)
        .filter_map(|caps| caps.iter().skip(1).flatten().next())
        .map(|m| m.as_str().trim().to_string())
        .filter(|s| !s.is_empty())
        .collect();
    rest = QUOTED_RE.replace_all(&rest, " ").into_owned();

    let slots_of = |kind: ParamKind| -> Vec<&'static str> {
        op.slots()
            .filter(|s| s.kind == kind && named_slot_pattern(s.name).is_none())
            .map(|s| s.name)
            .collect()
    };

    for (kind, re) in [
        (ParamKind::Email, &*EMAIL_RE),
        (ParamKind::Handle, &*REFERENCE_RE),
        (ParamKind::Date, &*DATE_RE),
    ] {
        let names = slots_of(kind);
        let values = take_matches(re, &mut rest, names.len());
        for (name, value) in names.iter().zip(values) {
            let value = match kind {
                ParamKind::Handle => format!("item {}", value),
                ParamKind::Date => value.to_lowercase(),
                _ => value,
            };
            params.insert(name.to_string(), Value::String(value));
        }
    }

    for name in NAMED_SLOTS {
        let (Some(_), Some(re)) = (op.slot(name), named_slot_pattern(name)) else {
            continue;
        };
        if let Some(value) = take_matches(re, &mut rest, 1).pop() {
            params.insert(name.to_string(), Value::String(value));
        }
    }

    let free: Vec<&'static str> = op
        .slots()
        .filter(|s| matches!(s.kind, ParamKind::Text | ParamKind::Values))
        .filter(|s| named_slot_pattern(s.name).is_none())
        .map(|s| s.name)
        .collect();
    if !free.is_empty() {
        pool.extend(take_matches(&COLON_RE, &mut rest, 1));
        let cue = take_matches(&STRONG_CUE_RE, &mut rest, 1)
            .pop()
            .or_else(|| take_matches(&WEAK_CUE_RE, &mut rest, 1).pop());
        pool.extend(cue);
    }
    let pool = pool.iter().map(|s| trim_filler(s)).filter(|s| !s.is_empty());
    for (name, value) in free.iter().zip(pool) {
        params.insert(name.to_string(), Value::String(value));
    }
    params
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use workdesk_core::SessionContext;
    use workdesk_services::{calendar, contacts, docs, drive, forms, gmail, sheets, slides, tasks};

    fn all() -> Vec<ServiceDescriptor> {
        vec![
            calendar::descriptor(),
            gmail::descriptor(),
            drive::descriptor(),
            docs::descriptor(),
            sheets::descriptor(),
            slides::descriptor(),
            tasks::descriptor(),
            contacts::descriptor(),
            forms::descriptor(),
        ]
    }

    async fn classify(text: &str, active: Option<&str>) -> Intent {
        let owned = all();
        let services: Vec<&ServiceDescriptor> = owned.iter().collect();
        let mut ctx = SessionContext::new();
        ctx.active_service_id = active.map(str::to_string);
        let input = ClassifyInput {
            raw_text: text,
            services: &services,
            context: &ctx,
            today: NaiveDate::from_ymd_opt(2026, 3, 1).unwrap(),
        };
        KeywordClassifier::new().classify(&input).await.unwrap()
    }

    fn target(intent: &Intent) -> (Option<&str>, Option<&str>) {
        (intent.service_id.as_deref(), intent.operation_name.as_deref())
    }

    #[tokio::test]
    async fn test_replace_text_and_download() {
        let intent = classify("replace \"Q1\" with \"Q2\" in doc item 1", None).await;
        assert_eq!(target(&intent), (Some("docs"), Some("replace_text")));
        assert_eq!(intent.parameters["document_id"], "item 1");
        assert_eq!(intent.parameters["find"], "Q1");
        assert_eq!(intent.parameters["replace"], "Q2");

        let intent = classify("download item 2 from drive", None).await;
        assert_eq!(target(&intent), (Some("drive"), Some("download")));
        assert_eq!(intent.parameters["file_id"], "item 2");
        assert!(!intent.parameters.contains_key("path"));
    }

    #[tokio::test]
    async fn test_send_email() {
        let intent = classify("send email to a@b.com about the meeting", None).await;
        assert_eq!(target(&intent), (Some("gmail"), Some("send")));
        assert_eq!(intent.confidence, Confidence::Low);
        assert_eq!(intent.source, IntentSource::Keyword);
        assert_eq!(intent.parameters["to"], "a@b.com");
        assert_eq!(intent.parameters["subject"], "the meeting");
        assert!(intent.parameters.get("body").is_none());
    }

    #[tokio::test]
    async fn test_gibberish_is_unresolved() {
        let intent = classify("asdkj qwer", None).await;
        assert!(!intent.is_resolved());
        assert_eq!(intent.confidence, Confidence::None);
        assert!(intent.note.is_none());
    }

    #[tokio::test]
    async fn test_tie_lists_candidates_in_order() {
        let intent = classify("delete item 1", None).await;
        assert!(!intent.is_resolved());
        assert_eq!(
            intent.note.as_deref(),
            Some("ambiguous: calendar.delete, contacts.delete, drive.delete, gmail.trash, tasks.delete")
        );
    }

    #[tokio::test]
    async fn test_active_service_breaks_tie() {
        let intent = classify("delete item 1", Some("tasks")).await;
        assert_eq!(target(&intent), (Some("tasks"), Some("delete")));
        assert_eq!(intent.parameters["task_id"], "item 1");
    }

    #[tokio::test]
    async fn test_named_service_beats_active() {
        let intent = classify("show my emails", Some("tasks")).await;
        assert_eq!(target(&intent), (Some("gmail"), Some("list")));
    }

    #[tokio::test]
    async fn test_longer_phrase_wins() {
        let intent = classify("show my task lists", None).await;
        assert_eq!(target(&intent), (Some("tasks"), Some("lists")));
        let intent = classify("what's on my calendar today", None).await;
        assert_eq!(target(&intent), (Some("calendar"), Some("list")));
    }

    #[tokio::test]
    async fn test_named_service_without_operation_uses_first() {
        let intent = classify("inbox", None).await;
        assert_eq!(target(&intent), (Some("gmail"), Some("list")));
    }

    #[tokio::test]
    async fn test_create_task_with_due_date() {
        let intent = classify("create a task called pay rent for tomorrow", None).await;
        assert_eq!(target(&intent), (Some("tasks"), Some("create")));
        assert_eq!(intent.parameters["title"], "pay rent");
        assert_eq!(intent.parameters["due"], "tomorrow");
    }

    #[tokio::test]
    async fn test_search_query_after_for() {
        let intent = classify("search email for invoices", None).await;
        assert_eq!(target(&intent), (Some("gmail"), Some("search")));
        assert_eq!(intent.parameters["query"], "invoices");
    }

    #[tokio::test]
    async fn test_append_row_values_after_colon() {
        let intent = classify("add row to item 2: milk, 3", None).await;
        assert_eq!(target(&intent), (Some("sheets"), Some("append")));
        assert_eq!(intent.parameters["spreadsheet_id"], "item 2");
        assert_eq!(intent.parameters["values"], "milk, 3");
    }

    #[test]
    fn test_extract_share() {
        let d = drive::descriptor();
        let op = d.operation("share").unwrap();
        let params = extract_parameters("share #1 with bob@x.com as writer", op);
        assert_eq!(params["file_id"], "item 1");
        assert_eq!(params["email"], "bob@x.com");
        assert_eq!(params["role"], "writer");
    }

    #[test]
    fn test_extract_quoted_titles() {
        let d = docs::descriptor();
        let op = d.operation("append").unwrap();
        let params = extract_parameters("append \"Next steps\" to number 3", op);
        assert_eq!(params["document_id"], "item 3");
        assert_eq!(params["text"], "Next steps");

        let d = calendar::descriptor();
        let op = d.operation("create").unwrap();
        let params = extract_parameters("schedule 'Dentist' on 2026-04-02", op);
        assert_eq!(params["title"], "Dentist");
        assert_eq!(params["date"], "2026-04-02");
    }

    #[test]
    fn test_extract_upload_path_and_range() {
        let d = drive::descriptor();
        let params = extract_parameters("upload ~/reports/q1.pdf to drive", d.operation("upload").unwrap());
        assert_eq!(params["path"], "~/reports/q1.pdf");

        let d = sheets::descriptor();
        let params = extract_parameters("read item 1 range B2:D9", d.operation("read").unwrap());
        assert_eq!(params["range"], "B2:D9");
        assert_eq!(params["spreadsheet_id"], "item 1");
    }

    #[test]
    fn test_normalize_and_phrases() {
        assert_eq!(normalize("What's ON, my  Calendar?"), " what's on my calendar ");
        assert!(contains_phrase(" send email to bob ", "email to"));
        assert!(!contains_phrase(" emails ", "email"));
        assert!(!contains_phrase(" x ", ""));
    }
}
