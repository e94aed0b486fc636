use serde::Serialize;

/// One row of a list-shaped result. `handle` is the remote id later
/// referenced positionally ("item 2").
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ListItem {
    pub handle: String,
    pub label: String,
    pub detail: Option<String>,
}

impl ListItem {
    pub fn new(handle: impl Into<String>, label: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            label: label.into(),
            detail: None,
        }
    }

    pub fn with_detail(mut self, detail: impl Into<String>) -> Self {
        let detail = detail.into();
        if !detail.is_empty() {
            self.detail = Some(detail);
        }
        self
    }
}

/// Normalized adapter result.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum OperationOutput {
    List { items: Vec<ListItem> },
    Record { title: String, fields: Vec<(String, String)> },
    Ack { message: String },
}

impl OperationOutput {
    pub fn list(items: Vec<ListItem>) -> Self {
        OperationOutput::List { items }
    }

    pub fn ack(message: impl Into<String>) -> Self {
        OperationOutput::Ack {
            message: message.into(),
        }
    }

    pub fn record(title: impl Into<String>) -> RecordBuilder {
        RecordBuilder {
            title: title.into(),
            fields: Vec::new(),
        }
    }

    /// Handles of a list result, in display order.
    pub fn handles(&self) -> Option<Vec<String>> {
        match self {
            OperationOutput::List { items } => {
                Some(items.iter().map(|i| i.handle.clone()).collect())
            }
            _ => None,
        }
    }
}

pub struct RecordBuilder {
    title: String,
    fields: Vec<(String, String)>,
}

impl RecordBuilder {
    pub fn field(mut self, name: &str, value: impl Into<String>) -> Self {
        self.fields.push((name.to_string(), value.into()));
        self
    }

    /// Skips empty values.
    pub fn field_opt(self, name: &str, value: Option<&str>) -> Self {
        match value {
            Some(v) if !v.is_empty() => self.field(name, v),
            _ => self,
        }
    }

    pub fn build(self) -> OperationOutput {
        OperationOutput::Record {
            title: self.title,
            fields: self.fields,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_handles_only_for_lists() {
        let list = OperationOutput::list(vec![ListItem::new("a", "A"), ListItem::new("b", "B")]);
        assert_eq!(list.handles(), Some(vec!["a".to_string(), "b".to_string()]));
        assert_eq!(OperationOutput::ack("ok").handles(), None);
    }

    #[test]
    fn test_record_builder_skips_empty() {
        let rec = OperationOutput::record("Doc")
            .field("id", "123")
            .field_opt("url", None)
            .field_opt("owner", Some(""))
            .build();
        match rec {
            OperationOutput::Record { title, fields } => {
                assert_eq!(title, "Doc");
                assert_eq!(fields.len(), 1);
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_empty_detail_dropped() {
        assert_eq!(ListItem::new("h", "l").with_detail("").detail, None);
    }
}
