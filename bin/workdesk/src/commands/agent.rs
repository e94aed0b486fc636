use tokio::io::BufReader;
use workdesk_agent::Session;

pub async fn run(message: Option<String>) -> anyhow::Result<()> {
    let (_paths, config, dispatcher) = super::load()?;
    let mut session = Session::new(dispatcher, config.session.exit_commands.clone());

    if let Some(message) = message {
        let rendered = session.respond(&message).await;
        println!("{}", rendered.text);
        return Ok(());
    }

    println!("workdesk interactive mode");
    println!(
        "Services: {}",
        session.dispatcher().registry().service_ids().join(", ")
    );
    println!(
        "Commands: status | help | {}",
        config.session.exit_commands.join(" / ")
    );
    println!();

    session
        .run(BufReader::new(tokio::io::stdin()), tokio::io::stdout())
        .await?;
    Ok(())
}
