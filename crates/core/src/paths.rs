use std::path::PathBuf;

#[derive(Debug, Clone)]
pub struct Paths {
    pub base: PathBuf,
}

impl Paths {
    /// `$WORKDESK_HOME`, falling back to `~/.workdesk`.
    pub fn new() -> Self {
        if let Ok(home) = std::env::var("WORKDESK_HOME") {
            if !home.trim().is_empty() {
                return Self { base: PathBuf::from(home) };
            }
        }
        let base = dirs::home_dir()
            .map(|h| h.join(".workdesk"))
            .unwrap_or_else(|| PathBuf::from(".workdesk"));
        Self { base }
    }

    pub fn with_base(base: PathBuf) -> Self {
        Self { base }
    }

    pub fn config_file(&self) -> PathBuf {
        self.base.join("config.json")
    }

    pub fn token_file(&self) -> PathBuf {
        self.base.join("token.json")
    }

    pub fn client_secrets_file(&self) -> PathBuf {
        self.base.join("credentials.json")
    }

    /// Resolve a configured path: absolute paths and `~/` are honoured,
    /// anything else is relative to the base directory.
    pub fn resolve(&self, configured: &str) -> PathBuf {
        if let Some(rest) = configured.strip_prefix("~/") {
            if let Some(home) = dirs::home_dir() {
                return home.join(rest);
            }
        }
        let p = PathBuf::from(configured);
        if p.is_absolute() {
            p
        } else {
            self.base.join(p)
        }
    }

    pub fn ensure_dirs(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(&self.base)
    }
}

impl Default for Paths {
    fn default() -> Self {
        Self::new()
    }
}
