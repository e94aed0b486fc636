use workdesk_agent::render::short_scope;

pub async fn login() -> anyhow::Result<()> {
    let (_, _, dispatcher) = super::load()?;
    let credential = dispatcher.credentials().login().await?;
    let granted: Vec<&str> = credential
        .granted_scopes
        .iter()
        .map(|s| short_scope(s))
        .collect();
    println!("✓ Signed in. Token expires {}.", credential.expiry.format("%Y-%m-%d %H:%M UTC"));
    println!("  Granted: {}", granted.join(", "));
    Ok(())
}

pub async fn logout() -> anyhow::Result<()> {
    let (_, _, dispatcher) = super::load()?;
    if dispatcher.credentials().revoke().await? {
        println!("✓ Token revoked and deleted.");
    } else {
        println!("No stored token.");
    }
    Ok(())
}
