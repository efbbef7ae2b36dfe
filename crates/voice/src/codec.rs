//! Decoder-Abstraktion fuer kodierte Quellen
//!
//! Der Kern kennt keinen konkreten Codec. Kodierte Pakete laufen vor der
//! Wiedergabe durch einen [`FrameDecoder`], den eine [`DecoderFactory`] pro
//! Quelle erzeugt. Ergebnis ist immer PCM i16 little-endian, interleaved.

use gablarski_core::types::SourceId;

use crate::error::{VoiceError, VoiceResult};

/// Dekodiert Frames einer einzelnen Quelle
///
/// Decoder sind zustandsbehaftet (z.B. Opus) und gehoeren genau einer Quelle.
pub trait FrameDecoder: Send {
    /// Dekodiert einen Frame zu PCM
    fn decode(&mut self, payload: &[u8]) -> VoiceResult<Vec<u8>>;

    /// Codec-eigene Verlustverdeckung fuer `span` Samples
    ///
    /// `None` heisst: der Codec kann nichts beitragen, der Aufrufer nimmt
    /// seine eigene PLC.
    fn conceal(&mut self, _span: u32) -> Option<Vec<u8>> {
        None
    }
}

/// Erzeugt Decoder fuer neue Quellen
pub trait DecoderFactory: Send + Sync {
    fn erstellen(&self, source: SourceId, kanaele: u16) -> VoiceResult<Box<dyn FrameDecoder>>;
}

// ---------------------------------------------------------------------------
// Passthrough
// ---------------------------------------------------------------------------

/// Decoder fuer Payloads, die bereits PCM enthalten
#[derive(Debug, Default)]
pub struct PassthroughDecoder;

impl FrameDecoder for PassthroughDecoder {
    fn decode(&mut self, payload: &[u8]) -> VoiceResult<Vec<u8>> {
        if payload.len() % 2 != 0 {
            return Err(VoiceError::Codec(format!(
                "PCM-Frame mit ungerader Laenge {}",
                payload.len()
            )));
        }
        Ok(payload.to_vec())
    }
}

/// Factory fuer [`PassthroughDecoder`]
#[derive(Debug, Default, Clone, Copy)]
pub struct PassthroughFactory;

impl DecoderFactory for PassthroughFactory {
    fn erstellen(&self, _source: SourceId, _kanaele: u16) -> VoiceResult<Box<dyn FrameDecoder>> {
        Ok(Box::new(PassthroughDecoder))
    }
}
