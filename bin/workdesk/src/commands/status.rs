pub async fn run() -> anyhow::Result<()> {
    let (paths, config, dispatcher) = super::load()?;
    let config_path = paths.config_file();

    println!("workdesk status");
    println!("===============");
    println!();
    println!(
        "Config:     {} {}",
        config_path.display(),
        if config_path.exists() { "✓" } else { "✗ (defaults)" }
    );
    let secrets = paths.resolve(&config.oauth.client_secrets_file);
    println!(
        "Secrets:    {} {}",
        secrets.display(),
        if secrets.exists() { "✓" } else { "✗ (not found)" }
    );
    println!("{}", dispatcher.status().await.text);

    if !secrets.exists() {
        println!();
        println!("Download an OAuth client (Desktop app) from the Google Cloud console");
        println!("and save it as {}.", secrets.display());
    }
    Ok(())
}
