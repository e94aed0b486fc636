use workdesk_core::{Config, Paths};

/// Show the effective configuration as pretty-printed JSON.
pub fn show() -> anyhow::Result<()> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let json = serde_json::to_value(config.masked())?;

    println!();
    println!("Current configuration");
    println!("  File: {}", paths.config_file().display());
    println!();
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

pub fn init(force: bool) -> anyhow::Result<()> {
    let paths = Paths::new();
    let path = paths.config_file();
    if path.exists() && !force {
        println!("Config already exists at {} (use --force to overwrite).", path.display());
        return Ok(());
    }
    paths.ensure_dirs()?;
    Config::default().save(&path)?;
    println!("✓ Wrote default config to {}", path.display());
    println!(
        "  Put your OAuth client secrets at {}",
        paths.resolve(&Config::default().oauth.client_secrets_file).display()
    );
    Ok(())
}
