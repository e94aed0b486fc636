use std::future::Future;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, AsyncWrite, AsyncWriteExt};
use tracing::{debug, info};
use workdesk_core::Result;

use crate::dispatcher::Dispatcher;
use crate::render::RenderedResult;

const PROMPT: &str = "> ";

/// Line-oriented loop over a dispatcher. Ends on an exit command, EOF or
/// Ctrl-C at the prompt; a turn's error never ends it.
pub struct Session {
    dispatcher: Dispatcher,
    exit_commands: Vec<String>,
}

impl Session {
    pub fn new(dispatcher: Dispatcher, exit_commands: Vec<String>) -> Self {
        Self {
            dispatcher,
            exit_commands: exit_commands
                .into_iter()
                .map(|c| c.trim().to_lowercase())
                .collect(),
        }
    }

    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    pub fn is_exit(&self, line: &str) -> bool {
        let line = line.trim().to_lowercase();
        self.exit_commands.iter().any(|c| *c == line)
    }

    /// One command: reserved words first, otherwise a dispatched turn that
    /// Ctrl-C abandons.
    pub async fn respond(&mut self, line: &str) -> RenderedResult {
        self.respond_until(line, interrupted()).await
    }

    /// Like `respond`, but the turn is abandoned when `cancel` completes.
    /// The in-flight turn is dropped before it touches the session context.
    pub async fn respond_until<F>(&mut self, line: &str, cancel: F) -> RenderedResult
    where
        F: Future<Output = ()>,
    {
        match line.trim().to_lowercase().as_str() {
            "status" => self.dispatcher.status().await,
            "help" | "?" => self.dispatcher.help(),
            _ => {
                tokio::select! {
                    rendered = self.dispatcher.handle(line) => rendered,
                    _ = cancel => {
                        info!("Turn cancelled");
                        RenderedResult::cancelled()
                    }
                }
            }
        }
    }

    pub async fn run<R, W>(&mut self, input: R, mut output: W) -> Result<()>
    where
        R: AsyncBufRead + Unpin,
        W: AsyncWrite + Unpin,
    {
        let mut lines = input.lines();
        loop {
            output.write_all(PROMPT.as_bytes()).await?;
            output.flush().await?;

            let line = tokio::select! {
                line = lines.next_line() => line?,
                _ = interrupted() => None,
            };
            let Some(line) = line else {
                debug!("Input closed");
                output.write_all(b"\n").await?;
                break;
            };

            let command = line.trim();
            if command.is_empty() {
                continue;
            }
            if self.is_exit(command) {
                break;
            }

            let rendered = self.respond(command).await;
            debug!(outcome = ?rendered.outcome, "Turn finished");
            output.write_all(rendered.text.as_bytes()).await?;
            output.write_all(b"\n").await?;
            output.flush().await?;
        }
        output.write_all(b"Goodbye!\n").await?;
        output.flush().await?;
        Ok(())
    }
}

/// Resolves on Ctrl-C. Pends forever if the signal cannot be installed.
async fn interrupted() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        debug!(error = %e, "Ctrl-C handler unavailable");
        std::future::pending::<()>().await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{NaiveDate, Utc};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use std::time::Duration;
    use workdesk_auth::{CredentialStore, MemoryTokenStore, UnconfiguredProvider};
    use workdesk_classifier::{IntentBridge, KeywordClassifier};
    use workdesk_core::Credential;
    use workdesk_services::{
        tasks, AdapterSettings, ListItem, OperationOutput, Params, ServiceAdapter, ServiceDescriptor,
        ServiceRegistry,
    };

    /// Answers the first call with a list, then never answers again.
    struct StallingAdapter {
        descriptor: ServiceDescriptor,
        calls: AtomicUsize,
    }

    #[async_trait]
    impl ServiceAdapter for StallingAdapter {
        fn descriptor(&self) -> &ServiceDescriptor {
            &self.descriptor
        }

        async fn invoke(
            &self,
            _operation: &str,
            _credential: &Credential,
            _params: &Params,
        ) -> workdesk_core::Result<OperationOutput> {
            if self.calls.fetch_add(1, Ordering::SeqCst) == 0 {
                return Ok(OperationOutput::list(vec![
                    ListItem::new("h1", "first"),
                    ListItem::new("h2", "second"),
                ]));
            }
            std::future::pending().await
        }
    }

    /// The real tasks adapter pointed at an unreachable base, so every call fails fast.
    fn session() -> Session {
        let settings = AdapterSettings {
            api_base: Some("http://127.0.0.1:9".into()),
            timeout_secs: 2,
            ..AdapterSettings::default()
        };
        session_with(Arc::new(tasks::TasksAdapter::new(&settings).unwrap()))
    }

    fn session_with(adapter: Arc<dyn ServiceAdapter>) -> Session {
        let mut registry = ServiceRegistry::new();
        registry.register(adapter);
        let credential = Credential {
            access_token: "at".into(),
            refresh_token: Some("rt".into()),
            expiry: Utc::now() + chrono::Duration::hours(1),
            granted_scopes: registry.union_scopes(),
        };
        let credentials = Arc::new(CredentialStore::new(
            Arc::new(MemoryTokenStore::with_credential(credential)),
            Arc::new(UnconfiguredProvider::new("no client secrets")),
            registry.union_scopes(),
            chrono::Duration::seconds(60),
        ));
        let bridge = IntentBridge::new(None, Some(Arc::new(KeywordClassifier::new())));
        let dispatcher = Dispatcher::new(credentials, registry, bridge, 20)
            .with_today(NaiveDate::from_ymd_opt(2026, 3, 1).unwrap());
        Session::new(dispatcher, vec!["quit".into(), "Exit".into(), "q".into()])
    }

    async fn run(input: &str) -> String {
        let mut session = session();
        let mut out = Vec::new();
        session.run(input.as_bytes(), &mut out).await.unwrap();
        String::from_utf8(out).unwrap()
    }

    #[tokio::test]
    async fn test_quit_stops_reading() {
        let out = run("help\nquit\nstatus\n").await;
        assert!(out.contains("tasks"));
        assert!(!out.contains("Token:"));
        assert!(out.ends_with("Goodbye!\n"));
    }

    #[tokio::test]
    async fn test_eof_exits() {
        let out = run("status").await;
        assert!(out.contains("Token:      ✓ present"));
        assert!(out.ends_with("Goodbye!\n"));
    }

    #[tokio::test]
    async fn test_errors_do_not_end_session() {
        let out = run("\n   \nasdkj qwer\nshow my tasks\ndelete item 4\nstatus\nEXIT\n").await;
        assert!(out.contains("didn't understand"));
        assert!(out.contains("tasks request failed"));
        assert!(out.contains("No item 4 in the last result (0 available)"));
        assert!(out.contains("Classifier: keyword matching"));
    }

    #[tokio::test]
    async fn test_cancelled_turn_leaves_context_untouched() {
        let mut session = session_with(Arc::new(StallingAdapter {
            descriptor: tasks::descriptor(),
            calls: AtomicUsize::new(0),
        }));
        let listed = session.respond("show my tasks").await;
        assert!(listed.is_success(), "{}", listed.text);
        let before = session.dispatcher().context().clone();
        assert_eq!(before.last_result_handles, vec!["h1", "h2"]);

        let r = session
            .respond_until("show my task lists", tokio::time::sleep(Duration::from_millis(50)))
            .await;
        assert_eq!(r, RenderedResult::cancelled());
        assert_eq!(session.dispatcher().context(), &before);
        assert_eq!(before.active_service_id.as_deref(), Some("tasks"));

        // The session keeps going after a cancelled turn.
        assert!(session.respond("help").await.text.contains("tasks"));
    }

    #[test]
    fn test_exit_commands_case_insensitive() {
        let session = session();
        assert!(session.is_exit(" QUIT "));
        assert!(session.is_exit("exit"));
        assert!(!session.is_exit("quit now"));
    }
}
