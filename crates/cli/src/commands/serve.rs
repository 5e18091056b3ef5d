//! `talk2sql serve`: start the HTTP API server.

use talk2sql_config::AppConfig;

pub async fn run(port_override: Option<u16>) -> Result<(), Box<dyn std::error::Error>> {
    let mut config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;

    if let Some(port) = port_override {
        config.gateway.port = port;
    }

    println!("Talk2SQL Gateway");
    println!("   Listening: {}:{}", config.gateway.host, config.gateway.port);
    println!("   Provider:  {} ({})", config.provider.name, config.provider.model);
    println!("   Data dir:  {}", config.storage.data_dir.display());

    talk2sql_gateway::start(config).await?;

    Ok(())
}
