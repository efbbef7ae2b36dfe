//! Player-Konfiguration
//!
//! Wird beim Start aus einer TOML-Datei geladen. Alle Felder haben
//! sinnvolle Standardwerte, sodass der Player ohne Konfigurationsdatei
//! lauffaehig ist.

use gablarski_core::GablarskiError;
use gablarski_voice::{
    FehlendStrategie, OrchestratorConfig, SourceKind, VoicePoolConfig,
};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Vollstaendige Player-Konfiguration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PlayerConfig {
    /// Jitter Buffer und Tick
    pub wiedergabe: WiedergabeEinstellungen,
    /// Stimmen-Pool
    pub stimmen: StimmenEinstellungen,
    /// Logging-Einstellungen
    pub logging: LoggingEinstellungen,
    /// Observability-Einstellungen (Metriken, Health)
    pub observability: ObservabilityEinstellungen,
}

/// Wiedergabe-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WiedergabeEinstellungen {
    /// Samples pro Frame (960 = 20 ms bei 48 kHz)
    pub span: u32,
    /// Frames, die vor der Wiedergabe gepuffert werden
    pub verzoegerung_frames: usize,
    /// Obergrenze gepufferter Pakete pro Quelle
    pub max_pakete: usize,
    /// Abstand zwischen zwei Ticks
    pub tick_intervall_ms: u64,
    /// Quellen ohne Paket fuer diese Dauer werden abgebaut
    pub inaktiv_timeout_ms: u64,
    pub fehlend_strategie: FehlendStrategie,
    /// Art unbekannter Quellen beim ersten Paket
    pub standard_art: SourceKind,
}

impl Default for WiedergabeEinstellungen {
    fn default() -> Self {
        Self {
            span: 960,
            verzoegerung_frames: 2,
            max_pakete: 50,
            tick_intervall_ms: 20,
            inaktiv_timeout_ms: 2000,
            fehlend_strategie: FehlendStrategie::Stille,
            standard_art: SourceKind::Sprache,
        }
    }
}

/// Stimmen-Pool-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StimmenEinstellungen {
    /// Kapazitaet in Einheiten (Mono 1, Stereo 2)
    pub gesamt: u32,
    /// Intervall des Aufraeum-Sweeps
    pub sweep_intervall_ms: u64,
    /// Obergrenze offener Stimmen im Speicher-Backend (leer = unbegrenzt)
    pub hardware_limit: Option<usize>,
}

impl Default for StimmenEinstellungen {
    fn default() -> Self {
        Self {
            gesamt: 16,
            sweep_intervall_ms: 100,
            hardware_limit: None,
        }
    }
}

/// Logging-Einstellungen
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingEinstellungen {
    /// Log-Level oder Filter-Direktive, z.B. "info" oder "gablarski_voice=debug"
    pub level: String,
    /// Format: "json" oder "text"
    pub format: String,
}

impl Default for LoggingEinstellungen {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "text".into(),
        }
    }
}

/// Observability-Einstellungen (Metriken + Health-Check)
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityEinstellungen {
    /// Aktiviert den Observability-Server
    pub aktiviert: bool,
    pub bind_adresse: String,
    /// Port fuer Metriken und Health (Standard: 9300)
    pub port: u16,
    /// Intervall, in dem Metriken aus den Statistiken nachgefuehrt werden
    pub aktualisierung_ms: u64,
}

impl Default for ObservabilityEinstellungen {
    fn default() -> Self {
        Self {
            aktiviert: true,
            bind_adresse: "127.0.0.1".into(),
            port: 9300,
            aktualisierung_ms: 1000,
        }
    }
}

impl PlayerConfig {
    /// Laedt die Konfiguration aus einer TOML-Datei.
    /// Gibt die Standardkonfiguration zurueck wenn die Datei nicht existiert.
    pub fn laden(pfad: &str) -> anyhow::Result<Self> {
        let config = match std::fs::read_to_string(pfad) {
            Ok(inhalt) => Self::aus_toml(&inhalt)
                .map_err(|e| anyhow::anyhow!("Konfigurationsfehler in '{pfad}': {e}"))?,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                tracing::warn!(
                    pfad = pfad,
                    "Konfigurationsdatei nicht gefunden, verwende Standardwerte"
                );
                Self::default()
            }
            Err(e) => {
                return Err(anyhow::anyhow!(
                    "Konfigurationsdatei '{pfad}' nicht lesbar: {e}"
                ))
            }
        };
        config.validieren()?;
        Ok(config)
    }

    /// Parst eine Konfiguration aus einem TOML-String (ohne Validierung)
    pub fn aus_toml(inhalt: &str) -> Result<Self, GablarskiError> {
        toml::from_str(inhalt).map_err(|e| GablarskiError::Konfiguration(e.to_string()))
    }

    /// Prueft Werte, die der Wiedergabekern nicht verarbeiten kann
    pub fn validieren(&self) -> Result<(), GablarskiError> {
        let w = &self.wiedergabe;
        if w.span == 0 {
            return Err(GablarskiError::ungueltig("wiedergabe.span", "muss > 0 sein"));
        }
        if w.tick_intervall_ms == 0 {
            return Err(GablarskiError::ungueltig(
                "wiedergabe.tick_intervall_ms",
                "muss > 0 sein",
            ));
        }
        if w.max_pakete == 0 || w.max_pakete < w.verzoegerung_frames {
            return Err(GablarskiError::ungueltig(
                "wiedergabe.max_pakete",
                format!(
                    "muss > 0 und >= verzoegerung_frames ({}) sein",
                    w.verzoegerung_frames
                ),
            ));
        }
        if self.stimmen.gesamt == 0 {
            return Err(GablarskiError::ungueltig("stimmen.gesamt", "muss > 0 sein"));
        }
        if self.stimmen.sweep_intervall_ms == 0 {
            return Err(GablarskiError::ungueltig(
                "stimmen.sweep_intervall_ms",
                "muss > 0 sein",
            ));
        }
        if !matches!(self.logging.format.as_str(), "text" | "json") {
            return Err(GablarskiError::ungueltig(
                "logging.format",
                format!("'{}' ist weder 'text' noch 'json'", self.logging.format),
            ));
        }
        Ok(())
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        let w = &self.wiedergabe;
        OrchestratorConfig {
            span: w.span,
            verzoegerung_frames: w.verzoegerung_frames,
            max_pakete: w.max_pakete,
            inaktiv_timeout: Duration::from_millis(w.inaktiv_timeout_ms),
            fehlend_strategie: w.fehlend_strategie,
            standard_art: w.standard_art,
        }
    }

    pub fn pool_config(&self) -> VoicePoolConfig {
        VoicePoolConfig {
            total_voices: self.stimmen.gesamt,
            sweep_intervall: Duration::from_millis(self.stimmen.sweep_intervall_ms),
        }
    }

    pub fn tick_intervall(&self) -> Duration {
        Duration::from_millis(self.wiedergabe.tick_intervall_ms)
    }

    /// Gibt die Bind-Adresse fuer den Observability-Server zurueck
    pub fn observability_bind_adresse(&self) -> String {
        format!(
            "{}:{}",
            self.observability.bind_adresse, self.observability.port
        )
    }
}
