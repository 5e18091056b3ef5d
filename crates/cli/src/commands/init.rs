//! `talk2sql init`: first-time setup.

use talk2sql_config::AppConfig;

pub async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let config_dir = AppConfig::config_dir();
    let config_path = config_dir.join("config.toml");

    println!("Talk2SQL Setup");
    println!("==============\n");

    if !config_dir.exists() {
        std::fs::create_dir_all(&config_dir)?;
        println!("Created config directory: {}", config_dir.display());
    } else {
        println!("  Config directory exists: {}", config_dir.display());
    }

    if config_path.exists() {
        println!("\nConfig already exists at: {}", config_path.display());
        println!("   Edit it manually or delete and re-run init.\n");
    } else {
        std::fs::write(&config_path, AppConfig::default_toml())?;
        println!("Created config.toml at: {}", config_path.display());
    }

    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    for dir in [config.storage.memory_dir(), config.storage.db_dir()] {
        std::fs::create_dir_all(&dir)?;
        println!("  Data directory: {}", dir.display());
    }

    if !config.has_api_key() {
        println!("\nNext steps:");
        println!("   1. Set GOOGLE_API_KEY (or api_key in {})", config_path.display());
        println!("   2. Run: talk2sql ask --conversation demo --db my.db \"How many rows?\"\n");
    }

    Ok(())
}
