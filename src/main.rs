use anyhow::Context;
use support_chat::config::{self, ClientConfig};
use tracing_subscriber::EnvFilter;

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("support_chat=info,warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

fn main() -> anyhow::Result<()> {
    config::load_env();
    init_tracing();
    let config = ClientConfig::from_env().context("reading support-chat configuration")?;
    tracing::info!(base_url = %config.base_url, "starting support chat");
    support_chat::ui::launch(config);
    Ok(())
}
