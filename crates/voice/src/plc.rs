//! Packet Loss Concealment (PLC)
//!
//! Fuellt Frames, die der Jitter Buffer als fehlend meldet, mit Ersatz-Audio.
//!
//! ## Strategien
//! 1. **Wiederholung mit Fade**: Der letzte gueltige PCM-Frame wird wiederholt,
//!    jedes Mal leiser (Faktor `FADE_FAKTOR`).
//! 2. **Stille**: Nach `MAX_WIEDERHOLUNGEN` aufeinanderfolgenden Verlusten,
//!    oder wenn noch nie ein Frame ankam.
//!
//! Frames sind PCM i16 little-endian, interleaved.

/// Maximale Anzahl von Wiederholungen vor dem Uebergang zu Stille
pub const MAX_WIEDERHOLUNGEN: u32 = 3;

/// Fade-Faktor pro Wiederholung (0.75 = 25% leiser pro Frame)
pub const FADE_FAKTOR: f32 = 0.75;

/// Erzeugt einen stillen PCM-Frame fuer `span` Samples pro Kanal
pub fn stille_frame(span: u32, kanaele: u16) -> Vec<u8> {
    vec![0u8; span as usize * kanaele as usize * 2]
}

// ---------------------------------------------------------------------------
// PLC-Ergebnis
// ---------------------------------------------------------------------------

/// Ergebnis einer Verdeckung
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PlcErgebnis {
    /// Letzter Frame, abgeschwaecht
    Wiederholung(Vec<u8>),
    /// Stille
    Stille(Vec<u8>),
}

impl PlcErgebnis {
    /// Der Ersatz-Frame
    pub fn frame(&self) -> &[u8] {
        match self {
            Self::Wiederholung(f) | Self::Stille(f) => f,
        }
    }

    pub fn into_frame(self) -> Vec<u8> {
        match self {
            Self::Wiederholung(f) | Self::Stille(f) => f,
        }
    }
}

// ---------------------------------------------------------------------------
// Statistiken
// ---------------------------------------------------------------------------

/// PLC-Statistiken
#[derive(Debug, Clone, Default)]
pub struct PlcStatistik {
    /// Originale Frames (kein Verlust)
    pub originale: u64,
    /// Wiederholte Frames
    pub wiederholungen: u64,
    /// Stille-Frames eingefuegt
    pub stille_eingefuegt: u64,
    /// Verdeckte Frames gesamt
    pub gesamt_verloren: u64,
}

impl PlcStatistik {
    /// Verlustrate (0.0–1.0)
    pub fn verlust_rate(&self) -> f64 {
        let gesamt = self.originale + self.gesamt_verloren;
        if gesamt == 0 {
            0.0
        } else {
            self.gesamt_verloren as f64 / gesamt as f64
        }
    }
}

// ---------------------------------------------------------------------------
// PacketLossConcealer
// ---------------------------------------------------------------------------

/// Verdeckt Paketverluste einer Quelle im Wiedergabe-Pfad
///
/// Nicht thread-safe; lebt im Zustand der Quelle und wird nur vom Tick-Thread
/// benutzt.
pub struct PacketLossConcealer {
    /// Letzter erfolgreich abgespielter Frame
    letzter_frame: Option<Vec<u8>>,
    aufeinanderfolgende_verluste: u32,
    aktueller_fade: f32,
    statistik: PlcStatistik,
}

impl PacketLossConcealer {
    pub fn new() -> Self {
        Self {
            letzter_frame: None,
            aufeinanderfolgende_verluste: 0,
            aktueller_fade: 1.0,
            statistik: PlcStatistik::default(),
        }
    }

    /// Meldet einen echten Frame; setzt die Verlust-Kette zurueck
    pub fn original(&mut self, frame: &[u8]) {
        self.aufeinanderfolgende_verluste = 0;
        self.aktueller_fade = 1.0;
        self.statistik.originale += 1;
        self.letzter_frame = Some(frame.to_vec());
    }

    /// Erzeugt einen Ersatz-Frame mit `frame_bytes` Bytes
    pub fn verdecken(&mut self, frame_bytes: usize) -> PlcErgebnis {
        self.aufeinanderfolgende_verluste += 1;
        self.statistik.gesamt_verloren += 1;

        let letzter = match &self.letzter_frame {
            Some(f) if self.aufeinanderfolgende_verluste <= MAX_WIEDERHOLUNGEN => f,
            _ => {
                self.statistik.stille_eingefuegt += 1;
                tracing::trace!(
                    verluste = self.aufeinanderfolgende_verluste,
                    "PLC: Stille eingefuegt"
                );
                return PlcErgebnis::Stille(vec![0u8; frame_bytes]);
            }
        };

        self.aktueller_fade *= FADE_FAKTOR;
        let mut frame = pcm_skalieren(letzter, self.aktueller_fade);
        frame.resize(frame_bytes, 0);

        self.statistik.wiederholungen += 1;
        tracing::trace!(fade = self.aktueller_fade, "PLC: Wiederholung mit Fade");
        PlcErgebnis::Wiederholung(frame)
    }

    /// Gibt die aktuellen Statistiken zurueck
    pub fn statistik(&self) -> &PlcStatistik {
        &self.statistik
    }
}

impl Default for PacketLossConcealer {
    fn default() -> Self {
        Self::new()
    }
}

/// Skaliert i16-LE-Samples mit `faktor`
fn pcm_skalieren(frame: &[u8], faktor: f32) -> Vec<u8> {
    let mut aus = Vec::with_capacity(frame.len());
    for sample in frame.chunks_exact(2) {
        let wert = i16::from_le_bytes([sample[0], sample[1]]) as f32 * faktor;
        let wert = wert.clamp(i16::MIN as f32, i16::MAX as f32) as i16;
        aus.extend_from_slice(&wert.to_le_bytes());
    }
    aus
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
