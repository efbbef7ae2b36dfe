//! Gemeinsame Identifikationstypen fuer Gablarski
//!
//! Alle IDs verwenden das Newtype-Pattern um Verwechslungen zwischen logischer
//! Quelle und Hardware-Stimme zur Compilezeit auszuschliessen.

use serde::{Deserialize, Serialize};

/// ID einer logischen Audio-Quelle (ein Sprecher bzw. Stream)
///
/// Die Quelle ist unabhaengig davon, welche Hardware-Stimme sie gerade
/// wiedergibt.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct SourceId(pub i32);

impl SourceId {
    /// Gibt den inneren Wert zurueck
    pub fn inner(&self) -> i32 {
        self.0
    }
}

impl From<i32> for SourceId {
    fn from(id: i32) -> Self {
        Self(id)
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "source:{}", self.0)
    }
}

/// Opaker Handle einer Hardware-Wiedergabestimme
///
/// Wird ausschliesslich vom `AudioBackend` vergeben; der Kern interpretiert
/// den Wert nie.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct VoiceHandle(pub u32);

impl VoiceHandle {
    /// Gibt den inneren Wert zurueck
    pub fn inner(&self) -> u32 {
        self.0
    }
}

impl std::fmt::Display for VoiceHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "voice:{}", self.0)
    }
}
