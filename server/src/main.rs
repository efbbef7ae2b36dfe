//! Gablarski Player – Einstiegspunkt
//!
//! Laedt die Konfiguration, initialisiert das Logging und startet den Player.

use anyhow::Result;
use gablarski_player::{config::PlayerConfig, Player};

#[tokio::main]
async fn main() -> Result<()> {
    // Konfigurationsdatei-Pfad aus Umgebungsvariable oder Standard
    let config_pfad = std::env::var("GABLARSKI_CONFIG").unwrap_or_else(|_| "gablarski.toml".into());

    // Konfiguration laden (Standardwerte falls Datei fehlt)
    let config = PlayerConfig::laden(&config_pfad)?;

    gablarski_observability::logging_initialisieren(&config.logging.level, &config.logging.format)?;

    tracing::info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_pfad,
        "Gablarski Player wird initialisiert"
    );

    let player = Player::neu(config)?;
    player.starten().await?;

    Ok(())
}
