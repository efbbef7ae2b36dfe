//! Audio-Backend-Abstraktion
//!
//! Der Kern spricht Hardware ausschliesslich ueber [`AudioBackend`] an. Jede
//! Implementierung (OpenAL, Plattform-API, Test-Attrappe) ist austauschbar,
//! solange sie Stimmen oeffnen, befuellen, abfragen und schliessen kann.
//!
//! [`SpeicherBackend`] ist eine vollstaendige In-Memory-Implementierung. Sie
//! merkt sich alle eingereichten Frames und laesst den Aufrufer das Ende der
//! Wiedergabe explizit ausloesen. Im verwerfenden Modus
//! ([`SpeicherBackend::verwerfend`]) werden Frames nur gezaehlt und gelten
//! sofort als abgespielt.

use gablarski_core::types::VoiceHandle;
use parking_lot::Mutex;
use std::collections::HashMap;

use crate::error::{VoiceError, VoiceResult};

// ---------------------------------------------------------------------------
// Typen
// ---------------------------------------------------------------------------

/// Geraete-Konfiguration beim Oeffnen einer Stimme
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VoiceConfig {
    /// Stereo-Wiedergabe (belegt zwei Kapazitaetseinheiten)
    pub stereo: bool,
}

impl VoiceConfig {
    /// Anzahl der Kanaele
    pub fn kanaele(&self) -> u16 {
        if self.stereo {
            2
        } else {
            1
        }
    }

    /// Kapazitaetskosten im Stimmen-Pool
    pub fn kosten(&self) -> u32 {
        u32::from(self.kanaele())
    }
}

/// Wiedergabezustand einer Stimme (Ergebnis von [`AudioBackend::query`])
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PlaybackState {
    /// Anzahl noch nicht abgespielter Puffer
    pub ausstehend: usize,
    /// Spielt die Stimme gerade?
    pub spielt: bool,
}

impl PlaybackState {
    /// Alles abgespielt und gestoppt – die Stimme kann zurueck in den Pool
    pub fn ist_fertig(&self) -> bool {
        self.ausstehend == 0 && !self.spielt
    }
}

// ---------------------------------------------------------------------------
// AudioBackend
// ---------------------------------------------------------------------------

/// Faehigkeiten, die der Kern von einer Audio-Hardware benoetigt
///
/// Alle Methoden werden aus verschiedenen Threads aufgerufen (Tick-Worker,
/// Aufraeum-Worker), daher `Send + Sync`.
pub trait AudioBackend: Send + Sync {
    /// Oeffnet eine neue Wiedergabestimme
    fn open(&self, config: &VoiceConfig) -> VoiceResult<VoiceHandle>;

    /// Reiht einen PCM-Frame (i16 little-endian, interleaved) zur Wiedergabe ein
    fn submit(&self, voice: VoiceHandle, pcm: &[u8], sample_rate: u32) -> VoiceResult<()>;

    /// Fragt den aktuellen Wiedergabezustand ab
    fn query(&self, voice: VoiceHandle) -> VoiceResult<PlaybackState>;

    /// Schliesst die Stimme endgueltig
    fn close(&self, voice: VoiceHandle);
}

// ---------------------------------------------------------------------------
// SpeicherBackend
// ---------------------------------------------------------------------------

/// Zustand einer Stimme im [`SpeicherBackend`]
#[derive(Debug, Clone)]
pub struct SpeicherStimme {
    pub config: VoiceConfig,
    /// Alle eingereichten Frames in Reihenfolge
    pub eingereicht: Vec<Vec<u8>>,
    /// Letzte gemeldete Abtastrate
    pub sample_rate: u32,
    pub zustand: PlaybackState,
}

struct SpeicherInner {
    naechster_handle: u32,
    stimmen: HashMap<VoiceHandle, SpeicherStimme>,
    /// Hardware-Obergrenze offener Stimmen (None = unbegrenzt)
    max_stimmen: Option<usize>,
    /// Frames speichern und als ausstehend fuehren
    aufzeichnen: bool,
    /// Eingereichte Frames ueber alle Stimmen, auch bereits geschlossene
    gesamt: usize,
}

/// In-Memory Audio-Backend
///
/// Eingereichte Frames gelten als "ausstehend", bis
/// [`SpeicherBackend::abspielen_beenden`] aufgerufen wird.
pub struct SpeicherBackend {
    inner: Mutex<SpeicherInner>,
}

impl SpeicherBackend {
    /// Erstellt ein Backend ohne Hardware-Obergrenze
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(SpeicherInner {
                naechster_handle: 1,
                stimmen: HashMap::new(),
                max_stimmen: None,
                aufzeichnen: true,
                gesamt: 0,
            }),
        }
    }

    /// Erstellt ein Backend, das hoechstens `max` Stimmen gleichzeitig oeffnet
    pub fn mit_limit(max: usize) -> Self {
        let backend = Self::new();
        backend.inner.lock().max_stimmen = Some(max);
        backend
    }

    /// Erstellt ein Backend, das Frames nur zaehlt
    ///
    /// Jede Stimme ist nach dem Einreichen sofort wieder fertig. Gedacht fuer
    /// den Betrieb ohne Audio-Geraet, damit der Speicher nicht waechst.
    pub fn verwerfend(max: Option<usize>) -> Self {
        let backend = Self::new();
        {
            let mut inner = backend.inner.lock();
            inner.max_stimmen = max;
            inner.aufzeichnen = false;
        }
        backend
    }

    /// Simuliert das Ende der Wiedergabe einer Stimme
    pub fn abspielen_beenden(&self, voice: VoiceHandle) {
        if let Some(stimme) = self.inner.lock().stimmen.get_mut(&voice) {
            stimme.zustand = PlaybackState::default();
        }
    }

    /// Simuliert das Ende der Wiedergabe aller Stimmen
    pub fn alle_beenden(&self) {
        for stimme in self.inner.lock().stimmen.values_mut() {
            stimme.zustand = PlaybackState::default();
        }
    }

    /// Kopie aller an eine Stimme eingereichten Frames
    pub fn eingereicht(&self, voice: VoiceHandle) -> Vec<Vec<u8>> {
        self.inner
            .lock()
            .stimmen
            .get(&voice)
            .map(|s| s.eingereicht.clone())
            .unwrap_or_default()
    }

    /// Gesamtzahl eingereichter Frames ueber alle Stimmen
    pub fn eingereicht_gesamt(&self) -> usize {
        self.inner.lock().gesamt
    }

    /// Anzahl aktuell offener Stimmen
    pub fn offene_stimmen(&self) -> usize {
        self.inner.lock().stimmen.len()
    }

    /// Prueft ob eine Stimme offen ist
    pub fn ist_offen(&self, voice: VoiceHandle) -> bool {
        self.inner.lock().stimmen.contains_key(&voice)
    }
}

impl Default for SpeicherBackend {
    fn default() -> Self {
        Self::new()
    }
}

impl AudioBackend for SpeicherBackend {
    fn open(&self, config: &VoiceConfig) -> VoiceResult<VoiceHandle> {
        let mut inner = self.inner.lock();
        if let Some(max) = inner.max_stimmen {
            if inner.stimmen.len() >= max {
                return Err(VoiceError::Backend(format!(
                    "Hardware-Limit von {max} Stimmen erreicht"
                )));
            }
        }

        let handle = VoiceHandle(inner.naechster_handle);
        inner.naechster_handle += 1;
        inner.stimmen.insert(
            handle,
            SpeicherStimme {
                config: *config,
                eingereicht: Vec::new(),
                sample_rate: 0,
                zustand: PlaybackState::default(),
            },
        );
        tracing::trace!(voice = %handle, stereo = config.stereo, "Speicher-Stimme geoeffnet");
        Ok(handle)
    }

    fn submit(&self, voice: VoiceHandle, pcm: &[u8], sample_rate: u32) -> VoiceResult<()> {
        let mut inner = self.inner.lock();
        let aufzeichnen = inner.aufzeichnen;
        let stimme = inner
            .stimmen
            .get_mut(&voice)
            .ok_or_else(|| VoiceError::Backend(format!("Unbekannte Stimme {voice}")))?;
        stimme.sample_rate = sample_rate;
        if aufzeichnen {
            stimme.eingereicht.push(pcm.to_vec());
            stimme.zustand.ausstehend += 1;
            stimme.zustand.spielt = true;
        }
        inner.gesamt += 1;
        Ok(())
    }

    fn query(&self, voice: VoiceHandle) -> VoiceResult<PlaybackState> {
        self.inner
            .lock()
            .stimmen
            .get(&voice)
            .map(|s| s.zustand)
            .ok_or_else(|| VoiceError::Backend(format!("Unbekannte Stimme {voice}")))
    }

    fn close(&self, voice: VoiceHandle) {
        if self.inner.lock().stimmen.remove(&voice).is_some() {
            tracing::trace!(voice = %voice, "Speicher-Stimme geschlossen");
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const MONO: VoiceConfig = VoiceConfig { stereo: false };

    #[test]
    fn kosten_nach_kanaelen() {
        assert_eq!(MONO.kosten(), 1);
        assert_eq!(VoiceConfig { stereo: true }.kosten(), 2);
    }

    #[test]
    fn submit_setzt_stimme_auf_spielend() {
        let backend = SpeicherBackend::new();
        let h = backend.open(&MONO).unwrap();
        assert!(backend.query(h).unwrap().ist_fertig());

        backend.submit(h, &[0, 0, 1, 0], 48000).unwrap();
        let zustand = backend.query(h).unwrap();
        assert_eq!(zustand.ausstehend, 1);
        assert!(zustand.spielt);

        backend.abspielen_beenden(h);
        assert!(backend.query(h).unwrap().ist_fertig());
        assert_eq!(backend.eingereicht(h).len(), 1);
    }

    #[test]
    fn limit_wird_eingehalten() {
        let backend = SpeicherBackend::mit_limit(1);
        let h = backend.open(&MONO).unwrap();
        assert!(backend.open(&MONO).is_err());
        backend.close(h);
        assert!(backend.open(&MONO).is_ok());
    }

    #[test]
    fn verwerfend_zaehlt_nur() {
        let backend = SpeicherBackend::verwerfend(Some(1));
        let h = backend.open(&MONO).unwrap();
        assert!(backend.open(&MONO).is_err());

        backend.submit(h, &[0, 0], 48000).unwrap();
        backend.submit(h, &[0, 0], 48000).unwrap();
        assert!(backend.query(h).unwrap().ist_fertig());
        assert!(backend.eingereicht(h).is_empty());
        assert_eq!(backend.eingereicht_gesamt(), 2);
    }

    #[test]
    fn unbekannte_stimme_ist_fehler() {
        let backend = SpeicherBackend::new();
        assert!(backend.submit(VoiceHandle(99), &[], 48000).is_err());
        assert!(backend.query(VoiceHandle(99)).is_err());
        // Schliessen einer unbekannten Stimme ist kein Fehler
        backend.close(VoiceHandle(99));
    }
}
