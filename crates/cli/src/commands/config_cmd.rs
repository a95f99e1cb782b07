//! `copilot config`: Inspect the effective configuration.

use copilot_config::AppConfig;

const REDACTED: &str = "[REDACTED]";

pub async fn show() -> Result<(), Box<dyn std::error::Error>> {
    let config = AppConfig::load().map_err(|e| format!("Failed to load config: {e}"))?;
    println!("{}", render(&config)?);
    Ok(())
}

pub async fn validate() -> Result<(), Box<dyn std::error::Error>> {
    println!("🔍 Validating configuration...");

    let config = match AppConfig::load() {
        Ok(config) => config,
        Err(e) => {
            println!("   ❌ Config error: {e}");
            return Err(e.into());
        }
    };
    println!("   ✅ Config parsed successfully");

    let mut warnings = Vec::new();
    if !config.has_api_key() {
        warnings.push("No API key set (set COPILOT_API_KEY or ANTHROPIC_API_KEY)".to_string());
    }
    if !config.catalog.root.is_dir() {
        warnings.push(format!(
            "Catalog root {} is not a directory",
            config.catalog.root.display()
        ));
    }

    if warnings.is_empty() {
        println!("   ✅ All checks passed");
    } else {
        println!();
        for w in &warnings {
            println!("   ⚠️  {w}");
        }
    }

    println!();
    println!("   Provider:  {}", config.provider);
    println!("   Model:     {}", config.model_for(&config.provider));
    println!("   Assistant: {}", config.assistant.name);
    println!("   Catalog:   {}", config.catalog.root.display());
    Ok(())
}

pub async fn path() -> Result<(), Box<dyn std::error::Error>> {
    println!("{}", AppConfig::config_dir().join("config.toml").display());
    Ok(())
}

/// The config as TOML with every secret replaced.
fn render(config: &AppConfig) -> Result<String, toml::ser::Error> {
    let mut config = config.clone();
    if config.api_key.is_some() {
        config.api_key = Some(REDACTED.into());
    }
    for provider in config.providers.values_mut() {
        if provider.api_key.is_some() {
            provider.api_key = Some(REDACTED.into());
        }
    }
    toml::to_string_pretty(&config)
}
