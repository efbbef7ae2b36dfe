//! gablarski-voice – Wiedergabekern auf Empfaengerseite
//!
//! Nimmt Audio-Pakete beliebiger Reihenfolge entgegen, ordnet sie pro Quelle
//! und spielt sie ueber eine begrenzte Menge von Hardware-Stimmen ab.
//!
//! ## Module
//! - [`jitter_buffer`] – Umordnung und Verzoegerung pro Quelle
//! - [`pool`] – Begrenzter Stimmen-Pool mit Aufraeum-Sweep
//! - [`orchestrator`] – Periodischer Tick: Buffer -> Decoder -> Stimme
//! - [`backend`] – Hardware-Abstraktion und In-Memory-Backend
//! - [`codec`] – Decoder-Schnittstelle fuer kodierte Quellen
//! - [`plc`] – Packet Loss Concealment
//! - [`sources`] – Registry der logischen Quellen
//! - [`worker`] – Periodische Hintergrund-Threads

pub mod backend;
pub mod codec;
pub mod error;
pub mod jitter_buffer;
pub mod orchestrator;
pub mod plc;
pub mod pool;
pub mod sources;
pub mod worker;

pub use backend::{AudioBackend, PlaybackState, SpeicherBackend, VoiceConfig};
pub use codec::{DecoderFactory, FrameDecoder, PassthroughDecoder, PassthroughFactory};
pub use error::{VoiceError, VoiceResult};
pub use jitter_buffer::{AudioPacket, JitterBuffer, JitterBufferConfig, PullErgebnis, PullStatus, PushErgebnis};
pub use orchestrator::{FehlendStrategie, OrchestratorConfig, OrchestratorStatistik, PlaybackOrchestrator};
pub use pool::{PoolStatistik, VoiceAssignment, VoicePool, VoicePoolConfig};
pub use sources::{AudioSource, SourceKind, SourceRegistry};
