//! gablarski-core – Gemeinsame Typen und Fehlertypen
//!
//! Dieses Crate stellt die Bausteine bereit, die von Voice-Kern, Observability
//! und Player gemeinsam genutzt werden.

pub mod error;
pub mod types;

// Re-Exporte fuer bequemen Zugriff
pub use error::{GablarskiError, Result};
pub use types::{SourceId, VoiceHandle};
