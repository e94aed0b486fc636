use workdesk_core::{Error, ErrorKind, Intent};
use workdesk_services::OperationOutput;

const HELP_HINT: &str = "Type `help` to see what I can do.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    Succeeded,
    Failed(ErrorKind),
    Unresolved,
    Status,
    Chat,
}

/// What one turn shows the user.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenderedResult {
    pub outcome: Outcome,
    pub text: String,
}

impl RenderedResult {
    pub fn new(outcome: Outcome, text: impl Into<String>) -> Self {
        Self {
            outcome,
            text: text.into(),
        }
    }

    pub fn is_success(&self) -> bool {
        self.outcome == Outcome::Succeeded
    }

    pub fn cancelled() -> Self {
        Self::new(Outcome::Unresolved, "Cancelled.")
    }
}

/// Numbered list, titled record, or the acknowledgement message.
pub fn output(display_name: &str, output: &OperationOutput) -> RenderedResult {
    let text = match output {
        OperationOutput::List { items } if items.is_empty() => {
            format!("{}: nothing found.", display_name)
        }
        OperationOutput::List { items } => {
            let mut lines = Vec::with_capacity(items.len() + 1);
            lines.push(format!("{} ({}):", display_name, items.len()));
            for (i, item) in items.iter().enumerate() {
                match &item.detail {
                    Some(detail) => lines.push(format!("  {}. {} - {}", i + 1, item.label, detail)),
                    None => lines.push(format!("  {}. {}", i + 1, item.label)),
                }
            }
            lines.join("\n")
        }
        OperationOutput::Record { title, fields } => {
            let width = fields.iter().map(|(k, _)| k.chars().count()).max().unwrap_or(0);
            let mut lines = vec![title.clone()];
            for (name, value) in fields {
                lines.push(format!("  {:<width$}  {}", name, value, width = width));
            }
            lines.join("\n")
        }
        OperationOutput::Ack { message } => format!("✓ {}", message),
    };
    RenderedResult::new(Outcome::Succeeded, text)
}

/// A single-line failure report.
pub fn error(err: &Error) -> RenderedResult {
    let message = one_line(&err.to_string());
    let text = match err.kind() {
        ErrorKind::AuthInsufficientScope => {
            format!("✗ {}. Run `workdesk login` to grant them.", message)
        }
        ErrorKind::AuthExpired => format!("✗ {}. Try again to re-authorize.", message),
        ErrorKind::IntentUnresolved => format!("{}. {}", message, HELP_HINT),
        _ => format!("✗ {}", message),
    };
    RenderedResult::new(Outcome::Failed(err.kind()), text)
}

/// Chat reply when the classifier gave one, otherwise "didn't understand".
pub fn unresolved(intent: &Intent) -> RenderedResult {
    if let Some(reply) = &intent.reply {
        return RenderedResult::new(Outcome::Chat, reply.trim());
    }
    let message = Error::IntentUnresolved(intent.note.clone().unwrap_or_default()).to_string();
    RenderedResult::new(Outcome::Unresolved, format!("{}. {}", message, HELP_HINT))
}

fn one_line(text: &str) -> String {
    text.split_whitespace().collect::<Vec<_>>().join(" ")
}

/// Scope URLs shortened for display.
pub fn short_scope(scope: &str) -> &str {
    scope
        .strip_prefix("https://www.googleapis.com/auth/")
        .unwrap_or(scope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use workdesk_services::ListItem;

    #[test]
    fn test_list_numbered() {
        let out = OperationOutput::list(vec![
            ListItem::new("h1", "Buy milk").with_detail("due 2026-04-01"),
            ListItem::new("h2", "Call Ann"),
        ]);
        let r = output("Google Tasks", &out);
        assert!(r.is_success());
        assert_eq!(
            r.text,
            "Google Tasks (2):\n  1. Buy milk - due 2026-04-01\n  2. Call Ann"
        );
        assert_eq!(output("Gmail", &OperationOutput::list(vec![])).text, "Gmail: nothing found.");
    }

    #[test]
    fn test_record_aligned() {
        let out = OperationOutput::record("Plan")
            .field("id", "d1")
            .field("url", "https://x")
            .build();
        assert_eq!(output("Google Docs", &out).text, "Plan\n  id   d1\n  url  https://x");
    }

    #[test]
    fn test_error_single_line() {
        let err = Error::remote("drive", "500 Backend\nError");
        let r = error(&err);
        assert_eq!(r.outcome, Outcome::Failed(ErrorKind::RemoteOperationFailed));
        assert_eq!(r.text, "✗ drive request failed: 500 Backend Error");
        assert!(!r.text.contains('\n'));
    }

    #[test]
    fn test_scope_error_hint() {
        let err = Error::AuthInsufficientScope {
            service: "gmail".into(),
            missing: vec!["https://www.googleapis.com/auth/gmail.modify".into()],
        };
        assert!(error(&err).text.contains("workdesk login"));
    }

    #[test]
    fn test_unresolved_and_chat() {
        let r = unresolved(&Intent::unresolved("asdkj qwer"));
        assert_eq!(r.outcome, Outcome::Unresolved);
        assert!(r.text.starts_with("Sorry, I didn't understand that."));

        let mut chat = Intent::unresolved("hi");
        chat.reply = Some(" Hello! ".into());
        let r = unresolved(&chat);
        assert_eq!(r.outcome, Outcome::Chat);
        assert_eq!(r.text, "Hello!");
    }

    #[test]
    fn test_short_scope() {
        assert_eq!(short_scope("https://www.googleapis.com/auth/drive"), "drive");
        assert_eq!(short_scope("openid"), "openid");
    }
}
