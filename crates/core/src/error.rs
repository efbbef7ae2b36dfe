//! Fehlertypen fuer Gablarski
//!
//! Zentraler Fehler-Enum fuer alles, was ausserhalb des Voice-Kerns schiefgehen
//! kann. Der Voice-Kern selbst hat einen eigenen `VoiceError`.

use thiserror::Error;

/// Globaler Result-Alias fuer Gablarski
pub type Result<T> = std::result::Result<T, GablarskiError>;

/// Alle Fehler, die bis an die Anwendungsgrenze gelangen koennen
#[derive(Debug, Error)]
pub enum GablarskiError {
    #[error("Konfigurationsfehler: {0}")]
    Konfiguration(String),

    #[error("Ungueltiger Konfigurationswert '{feld}': {grund}")]
    UngueltigerWert { feld: String, grund: String },
}

impl GablarskiError {
    /// Erstellt einen Fehler fuer einen ungueltigen Konfigurationswert
    pub fn ungueltig(feld: impl Into<String>, grund: impl Into<String>) -> Self {
        Self::UngueltigerWert {
            feld: feld.into(),
            grund: grund.into(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fehler_anzeige() {
        let e = GablarskiError::Konfiguration("Datei kaputt".into());
        assert_eq!(e.to_string(), "Konfigurationsfehler: Datei kaputt");
    }

    #[test]
    fn ungueltiger_wert_enthaelt_feld() {
        let e = GablarskiError::ungueltig("stimmen.gesamt", "muss > 0 sein");
        let text = e.to_string();
        assert!(text.contains("stimmen.gesamt"));
        assert!(text.contains("muss > 0 sein"));
    }
}
