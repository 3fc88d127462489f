//! `atlas config`: print configuration.

use atlas_config::AppConfig;

pub fn run(default: bool) -> Result<(), Box<dyn std::error::Error>> {
    if default {
        println!("{}", AppConfig::default_toml());
        return Ok(());
    }

    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("# {}", AppConfig::config_dir().join("config.toml").display());
    println!("{}", config.to_toml());
    Ok(())
}
