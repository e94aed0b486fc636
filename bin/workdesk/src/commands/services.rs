use workdesk_agent::render::short_scope;
use workdesk_core::{Config, Paths};
use workdesk_services::ServiceRegistry;

pub fn run() -> anyhow::Result<()> {
    let config = Config::load_or_default(&Paths::new())?;
    let registry = ServiceRegistry::from_config(&config)?;

    for d in registry.descriptors() {
        let scopes: Vec<&str> = d.required_scopes.iter().map(|s| short_scope(s)).collect();
        println!("{} ({}) [{}]", d.display_name, d.service_id, scopes.join(", "));
        for op in &d.operations {
            let mut slots: Vec<String> = op
                .required
                .iter()
                .map(|s| format!("{}: {:?}", s.name, s.kind))
                .collect();
            slots.extend(op.optional.iter().map(|s| format!("[{}: {:?}]", s.name, s.kind)));
            println!("  {:<16} {:<40} {}", op.name, slots.join(", "), op.description);
        }
        println!();
    }
    Ok(())
}
