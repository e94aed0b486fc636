pub mod agent;
pub mod auth;
pub mod config_cmd;
pub mod services;
pub mod status;

use workdesk_agent::Dispatcher;
use workdesk_core::{Config, Paths};

/// Config and a dispatcher wired from it.
pub fn load() -> anyhow::Result<(Paths, Config, Dispatcher)> {
    let paths = Paths::new();
    let config = Config::load_or_default(&paths)?;
    let dispatcher = Dispatcher::from_config(&config, &paths)?;
    Ok((paths, config, dispatcher))
}
