//! Quellen-Registry
//!
//! Ordnet jeder SourceId einen [`AudioSource`]-Deskriptor zu. Welche Eigenschaften
//! eine Quelle hat, haengt nur an ihrer [`SourceKind`]; die Zuordnung Art ->
//! Konstruktor steht fest in [`fabrik`].

use dashmap::DashMap;
use gablarski_core::types::SourceId;
use serde::{Deserialize, Serialize};

// ---------------------------------------------------------------------------
// Typen
// ---------------------------------------------------------------------------

/// Art einer logischen Audio-Quelle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    /// Sprecher im Kanal (Mono, kodiert)
    #[default]
    Sprache,
    /// Musik-Bot o.ae. (Stereo, kodiert)
    Musik,
    /// Lokale Hinweistoene (Mono, bereits PCM)
    Benachrichtigung,
}

/// Deskriptor einer registrierten Quelle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioSource {
    pub id: SourceId,
    pub kind: SourceKind,
    pub stereo: bool,
    /// Abtastrate, mit der Frames an das Backend gehen
    pub sample_rate: u32,
    /// Pakete dieser Quelle muessen dekodiert werden
    pub kodiert: bool,
}

impl AudioSource {
    pub fn kanaele(&self) -> u16 {
        if self.stereo {
            2
        } else {
            1
        }
    }
}

fn sprache(id: SourceId) -> AudioSource {
    AudioSource {
        id,
        kind: SourceKind::Sprache,
        stereo: false,
        sample_rate: 48_000,
        kodiert: true,
    }
}

fn musik(id: SourceId) -> AudioSource {
    AudioSource {
        id,
        kind: SourceKind::Musik,
        stereo: true,
        sample_rate: 48_000,
        kodiert: true,
    }
}

fn benachrichtigung(id: SourceId) -> AudioSource {
    AudioSource {
        id,
        kind: SourceKind::Benachrichtigung,
        stereo: false,
        sample_rate: 44_100,
        kodiert: false,
    }
}

/// Konstruktor fuer eine Quellen-Art
pub fn fabrik(kind: SourceKind) -> fn(SourceId) -> AudioSource {
    match kind {
        SourceKind::Sprache => sprache,
        SourceKind::Musik => musik,
        SourceKind::Benachrichtigung => benachrichtigung,
    }
}

// ---------------------------------------------------------------------------
// SourceRegistry
// ---------------------------------------------------------------------------

/// Registry aller bekannten Quellen – thread-sicher via DashMap
pub struct SourceRegistry {
    quellen: DashMap<SourceId, AudioSource>,
}

impl SourceRegistry {
    /// Erstellt eine neue leere Registry
    pub fn neu() -> Self {
        Self {
            quellen: DashMap::new(),
        }
    }

    /// Registriert (oder ersetzt) eine Quelle der Art `kind`
    pub fn registrieren(&self, id: SourceId, kind: SourceKind) -> AudioSource {
        let quelle = fabrik(kind)(id);
        if let Some(alt) = self.quellen.insert(id, quelle.clone()) {
            if alt.kind != kind {
                tracing::debug!(quelle = %id, alt = ?alt.kind, neu = ?kind, "Quellen-Art geaendert");
            }
        }
        quelle
    }

    /// Liefert die Quelle oder registriert sie mit `standard`
    pub fn holen_oder_registrieren(&self, id: SourceId, standard: SourceKind) -> AudioSource {
        self.quellen
            .entry(id)
            .or_insert_with(|| fabrik(standard)(id))
            .value()
            .clone()
    }

    pub fn per_id(&self, id: SourceId) -> Option<AudioSource> {
        self.quellen.get(&id).map(|q| q.clone())
    }

    /// Entfernt eine Quelle aus der Registry
    pub fn entfernen(&self, id: SourceId) -> Option<AudioSource> {
        self.quellen.remove(&id).map(|(_, q)| q)
    }

    /// Alle registrierten Quellen
    pub fn alle(&self) -> Vec<AudioSource> {
        self.quellen.iter().map(|q| q.value().clone()).collect()
    }

    pub fn anzahl(&self) -> usize {
        self.quellen.len()
    }
}

impl Default for SourceRegistry {
    fn default() -> Self {
        Self::neu()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fabrik_pro_art() {
        let s = fabrik(SourceKind::Sprache)(SourceId(1));
        assert!(!s.stereo);
        assert!(s.kodiert);

        let m = fabrik(SourceKind::Musik)(SourceId(2));
        assert!(m.stereo);
        assert_eq!(m.kanaele(), 2);

        let b = fabrik(SourceKind::Benachrichtigung)(SourceId(3));
        assert!(!b.kodiert);
        assert_eq!(b.kind, SourceKind::Benachrichtigung);
    }

    #[test]
    fn registrieren_und_finden() {
        let reg = SourceRegistry::neu();
        reg.registrieren(SourceId(7), SourceKind::Musik);
        assert_eq!(reg.per_id(SourceId(7)).map(|q| q.kind), Some(SourceKind::Musik));
        assert_eq!(reg.anzahl(), 1);
        assert!(reg.per_id(SourceId(8)).is_none());
    }

    #[test]
    fn holen_oder_registrieren_behaelt_bestehende() {
        let reg = SourceRegistry::neu();
        reg.registrieren(SourceId(1), SourceKind::Musik);
        let q = reg.holen_oder_registrieren(SourceId(1), SourceKind::Sprache);
        assert_eq!(q.kind, SourceKind::Musik);

        let neu = reg.holen_oder_registrieren(SourceId(2), SourceKind::Sprache);
        assert_eq!(neu.kind, SourceKind::Sprache);
        assert_eq!(reg.anzahl(), 2);
    }

    #[test]
    fn entfernen() {
        let reg = SourceRegistry::neu();
        reg.registrieren(SourceId(1), SourceKind::Sprache);
        assert!(reg.entfernen(SourceId(1)).is_some());
        assert!(reg.entfernen(SourceId(1)).is_none());
        assert!(reg.alle().is_empty());
    }

    #[test]
    fn art_aus_toml_string() {
        #[derive(Deserialize)]
        struct Wrapper {
            art: SourceKind,
        }
        let w: Wrapper = serde_json::from_str(r#"{"art":"benachrichtigung"}"#).unwrap();
        assert_eq!(w.art, SourceKind::Benachrichtigung);
    }
}
