//! Fehlertypen fuer den Wiedergabekern

use thiserror::Error;

/// Fehler des Voice-Kerns
///
/// Keiner dieser Fehler verlaesst den Orchestrator: er protokolliert sie und
/// baut bei Bedarf den Zustand der betroffenen Quelle neu auf.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum VoiceError {
    #[error("Ungueltiges Argument: {0}")]
    UngueltigesArgument(String),

    #[error("Interner Fehler: {0}")]
    InternerFehler(String),

    #[error("Instanz wurde bereits freigegeben")]
    Freigegeben,

    #[error("Backend-Fehler: {0}")]
    Backend(String),

    #[error("Codec-Fehler: {0}")]
    Codec(String),

    #[error("Worker-Fehler: {0}")]
    Worker(String),
}

impl VoiceError {
    /// Gibt true zurueck wenn die Instanz nach diesem Fehler unbrauchbar ist
    /// und vom Aufrufer neu erstellt werden muss
    pub fn ist_fatal_fuer_instanz(&self) -> bool {
        matches!(self, Self::UngueltigesArgument(_) | Self::InternerFehler(_))
    }
}

pub type VoiceResult<T> = Result<T, VoiceError>;
