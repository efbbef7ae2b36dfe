//! Wiedergabe-Orchestrator
//!
//! Verbindet Jitter Buffer, Stimmen-Pool und Backend. Netzwerk-Threads liefern
//! Pakete ueber [`PlaybackOrchestrator::on_packet_arrived`]; ein periodischer
//! Tick holt pro aktiver Quelle einen Frame ab und reicht ihn an die
//! zugewiesene Stimme weiter.
//!
//! Fehler verlassen den Orchestrator nie. Sie werden protokolliert und in
//! [`OrchestratorStatistik`] gezaehlt; ein defekter Buffer wird neu erstellt,
//! ohne andere Quellen zu beruehren.
//!
//! Die Quellen-Tabelle ist eine `DashMap`. Vor jedem Buffer-Aufruf wird der
//! Eintrag herauskopiert, waehrend `pull` wird kein Map-Guard gehalten.

use bytes::Bytes;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use gablarski_core::types::SourceId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::AudioBackend;
use crate::codec::{DecoderFactory, FrameDecoder, PassthroughFactory};
use crate::error::{VoiceError, VoiceResult};
use crate::jitter_buffer::{
    AudioPacket, JitterBuffer, JitterBufferConfig, JitterBufferStatistik, PullStatus, PushErgebnis,
};
use crate::plc::{self, PacketLossConcealer};
use crate::pool::VoicePool;
use crate::sources::{AudioSource, SourceKind, SourceRegistry};
use crate::worker::PeriodischerWorker;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Was bei einem verlorenen Frame abgespielt wird
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FehlendStrategie {
    /// Stiller Frame
    #[default]
    Stille,
    /// Letzten Frame mit Fade wiederholen, danach Stille
    Wiederholung,
    /// Nichts einreichen
    Auslassen,
}

/// Konfiguration des Orchestrators
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Samples pro Frame und Tick
    pub span: u32,
    pub verzoegerung_frames: usize,
    pub max_pakete: usize,
    /// Quellen ohne Paket fuer diese Dauer werden abgebaut
    pub inaktiv_timeout: Duration,
    pub fehlend_strategie: FehlendStrategie,
    /// Art fuer Quellen, die beim ersten Paket noch nicht registriert sind
    pub standard_art: SourceKind,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            span: 960,
            verzoegerung_frames: 2,
            max_pakete: 50,
            inaktiv_timeout: Duration::from_secs(2),
            fehlend_strategie: FehlendStrategie::Stille,
            standard_art: SourceKind::Sprache,
        }
    }
}

impl OrchestratorConfig {
    fn buffer_config(&self) -> JitterBufferConfig {
        JitterBufferConfig {
            verzoegerung_frames: self.verzoegerung_frames,
            max_pakete: self.max_pakete,
        }
    }
}

// ---------------------------------------------------------------------------
// Statistiken
// ---------------------------------------------------------------------------

/// Statistiken des Orchestrators (Snapshot)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OrchestratorStatistik {
    pub pakete_empfangen: u64,
    pub pakete_verspaetet: u64,
    pub pakete_duplikat: u64,
    /// An eine Stimme eingereichte Original-Frames
    pub frames_abgespielt: u64,
    /// Vom Jitter Buffer als verloren gemeldete Frames
    pub frames_fehlend: u64,
    /// Eingereichte Ersatz-Frames (Stille oder PLC)
    pub frames_verdeckt: u64,
    /// Frames ohne freie Stimme
    pub frames_verworfen: u64,
    pub decoder_fehler: u64,
    pub backend_fehler: u64,
    pub buffer_neu_erstellt: u64,
    pub quellen_entfernt: u64,
    pub aktive_quellen: usize,
}

#[derive(Default)]
struct Zaehler {
    pakete_empfangen: AtomicU64,
    pakete_verspaetet: AtomicU64,
    pakete_duplikat: AtomicU64,
    frames_abgespielt: AtomicU64,
    frames_fehlend: AtomicU64,
    frames_verdeckt: AtomicU64,
    frames_verworfen: AtomicU64,
    decoder_fehler: AtomicU64,
    backend_fehler: AtomicU64,
    buffer_neu_erstellt: AtomicU64,
    quellen_entfernt: AtomicU64,
}

fn erhoehen(zaehler: &AtomicU64) {
    zaehler.fetch_add(1, Ordering::Relaxed);
}

// ---------------------------------------------------------------------------
// Quellen-Zustand
// ---------------------------------------------------------------------------

/// Nur vom Tick benutzt
struct Wiedergabe {
    /// Wird beim ersten kodierten Frame erzeugt
    decoder: Option<Box<dyn FrameDecoder>>,
    plc: PacketLossConcealer,
}

#[derive(Clone)]
struct QuellenZustand {
    buffer: Arc<JitterBuffer>,
    wiedergabe: Arc<Mutex<Wiedergabe>>,
    quelle: AudioSource,
    /// Zeitpunkt des letzten eingefuegten Pakets
    letztes_paket: Instant,
    /// Warnung wegen abweichendem Span bereits ausgegeben
    span_gewarnt: bool,
}

// ---------------------------------------------------------------------------
// PlaybackOrchestrator
// ---------------------------------------------------------------------------

/// Treibt die Wiedergabe aller aktiven Quellen
pub struct PlaybackOrchestrator {
    config: OrchestratorConfig,
    pool: Arc<VoicePool>,
    backend: Arc<dyn AudioBackend>,
    registry: Arc<SourceRegistry>,
    decoder_factory: Arc<dyn DecoderFactory>,
    quellen: DashMap<SourceId, QuellenZustand>,
    zaehler: Zaehler,
    worker: Mutex<Option<PeriodischerWorker>>,
    /// Serialisiert Ticks aus Worker und direkten Aufrufen
    tick_sperre: Mutex<()>,
    freigegeben: AtomicBool,
}

impl PlaybackOrchestrator {
    /// Erstellt einen Orchestrator mit leerer Registry und Passthrough-Decoder
    pub fn new(
        config: OrchestratorConfig,
        pool: Arc<VoicePool>,
        backend: Arc<dyn AudioBackend>,
    ) -> Self {
        Self {
            config,
            pool,
            backend,
            registry: Arc::new(SourceRegistry::neu()),
            decoder_factory: Arc::new(PassthroughFactory),
            quellen: DashMap::new(),
            zaehler: Zaehler::default(),
            worker: Mutex::new(None),
            tick_sperre: Mutex::new(()),
            freigegeben: AtomicBool::new(false),
        }
    }

    /// Verwendet eine gemeinsame Quellen-Registry
    pub fn mit_registry(mut self, registry: Arc<SourceRegistry>) -> Self {
        self.registry = registry;
        self
    }

    /// Verwendet einen eigenen Decoder fuer kodierte Pakete
    pub fn mit_decoder_factory(mut self, factory: Arc<dyn DecoderFactory>) -> Self {
        self.decoder_factory = factory;
        self
    }

    // -----------------------------------------------------------------------
    // Eingang
    // -----------------------------------------------------------------------

    /// Nimmt ein PCM-Paket einer Quelle entgegen
    pub fn on_packet_arrived(
        &self,
        source: SourceId,
        sequence: u32,
        span: u32,
        payload: impl Into<Bytes>,
    ) -> PushErgebnis {
        self.paket_einreihen(AudioPacket::neu(source, sequence, span, payload))
    }

    /// Nimmt ein kodiertes Paket entgegen; es wird erst beim Tick dekodiert
    pub fn on_packet_arrived_encoded(
        &self,
        source: SourceId,
        sequence: u32,
        span: u32,
        payload: impl Into<Bytes>,
    ) -> PushErgebnis {
        self.paket_einreihen(AudioPacket::kodiert(source, sequence, span, payload))
    }

    fn paket_einreihen(&self, paket: AudioPacket) -> PushErgebnis {
        if self.ist_freigegeben() {
            return PushErgebnis::Freigegeben;
        }
        erhoehen(&self.zaehler.pakete_empfangen);

        let id = paket.source_id;
        let mut ergebnis = PushErgebnis::Freigegeben;
        // Zweiter Versuch, falls der Tick den Buffer gerade abgebaut oder neu
        // erstellt hat
        for _ in 0..2 {
            let buffer = self.buffer_fuer(id, paket.span);

            // dispose() kann zwischen Pruefung und Einfuegen gelaufen sein
            if self.ist_freigegeben() {
                buffer.dispose();
                self.quellen.remove(&id);
                return PushErgebnis::Freigegeben;
            }

            ergebnis = buffer.push(paket.clone());
            match ergebnis {
                PushErgebnis::Eingefuegt => {
                    // Nur abspielbare Pakete halten die Quelle am Leben
                    self.aktivitaet_stempeln(id, &buffer);
                    break;
                }
                PushErgebnis::Verspaetet => {
                    erhoehen(&self.zaehler.pakete_verspaetet);
                    break;
                }
                PushErgebnis::Duplikat => {
                    erhoehen(&self.zaehler.pakete_duplikat);
                    break;
                }
                PushErgebnis::Freigegeben => {}
            }
        }
        ergebnis
    }

    /// Buffer der Quelle; legt den Zustand beim ersten Paket an
    fn buffer_fuer(&self, id: SourceId, span: u32) -> Arc<JitterBuffer> {
        let mut eintrag = match self.quellen.entry(id) {
            Entry::Occupied(eintrag) => eintrag.into_ref(),
            Entry::Vacant(frei) => {
                let zustand = self.zustand_erstellen(id);
                tracing::debug!(
                    quelle = %id,
                    art = ?zustand.quelle.kind,
                    stereo = zustand.quelle.stereo,
                    "Neue Quelle"
                );
                frei.insert(zustand)
            }
        };
        if span != self.config.span && !eintrag.span_gewarnt {
            eintrag.span_gewarnt = true;
            tracing::warn!(
                quelle = %id,
                span,
                erwartet = self.config.span,
                "Quelle sendet abweichenden Span, Wiedergabe-Takt passt nicht"
            );
        }
        Arc::clone(&eintrag.buffer)
    }

    fn aktivitaet_stempeln(&self, id: SourceId, buffer: &Arc<JitterBuffer>) {
        if let Some(mut eintrag) = self.quellen.get_mut(&id) {
            if Arc::ptr_eq(&eintrag.buffer, buffer) {
                eintrag.letztes_paket = Instant::now();
            }
        }
    }

    fn zustand_erstellen(&self, id: SourceId) -> QuellenZustand {
        QuellenZustand {
            buffer: Arc::new(JitterBuffer::new(self.config.buffer_config())),
            wiedergabe: Arc::new(Mutex::new(Wiedergabe {
                decoder: None,
                plc: PacketLossConcealer::new(),
            })),
            quelle: self
                .registry
                .holen_oder_registrieren(id, self.config.standard_art),
            letztes_paket: Instant::now(),
            span_gewarnt: false,
        }
    }

    // -----------------------------------------------------------------------
    // Tick
    // -----------------------------------------------------------------------

    /// Ein Wiedergabe-Schritt fuer alle aktiven Quellen
    pub fn tick(&self) {
        self.tick_zu(Instant::now());
    }

    /// Wie [`tick`](Self::tick), mit vorgegebenem Zeitpunkt fuer den
    /// Inaktivitaets-Timeout
    pub fn tick_zu(&self, jetzt: Instant) {
        if self.ist_freigegeben() {
            return;
        }
        let _tick = self.tick_sperre.lock();

        self.inaktive_abbauen(jetzt);

        let aktive: Vec<(SourceId, QuellenZustand)> = self
            .quellen
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect();

        for (id, zustand) in aktive {
            self.quelle_ticken(id, &zustand);
        }
    }

    fn inaktive_abbauen(&self, jetzt: Instant) {
        let timeout = self.config.inaktiv_timeout;
        let ist_inaktiv = |z: &QuellenZustand| jetzt.saturating_duration_since(z.letztes_paket) > timeout;

        let kandidaten: Vec<SourceId> = self
            .quellen
            .iter()
            .filter(|e| ist_inaktiv(e.value()))
            .map(|e| *e.key())
            .collect();

        for id in kandidaten {
            // Erneut pruefen: zwischenzeitlich kann ein Paket angekommen sein
            if let Some((_, zustand)) = self.quellen.remove_if(&id, |_, z| ist_inaktiv(z)) {
                zustand.buffer.dispose();
                erhoehen(&self.zaehler.quellen_entfernt);
                tracing::debug!(quelle = %id, "Quelle inaktiv, abgebaut");
            }
        }
    }

    fn quelle_ticken(&self, id: SourceId, zustand: &QuellenZustand) {
        match zustand.buffer.pull(self.config.span) {
            Ok(ergebnis) => match (ergebnis.status, ergebnis.paket, ergebnis.verlust) {
                (PullStatus::Ok | PullStatus::Insertion, Some(paket), _) => {
                    self.frame_abspielen(id, zustand, &paket);
                }
                (PullStatus::Missing, _, true) => {
                    self.fehlend_behandeln(id, zustand);
                }
                (PullStatus::Missing, _, false) => {
                    // Puffern oder Unterlauf: nichts einreichen, die Stimme
                    // laeuft leer und geht per Sweep zurueck in den Pool
                }
                (status, None, _) => {
                    tracing::warn!(quelle = %id, ?status, "Pull ohne Paket");
                }
            },
            Err(VoiceError::Freigegeben) => {
                // Parallel abgebaut; nur den eigenen, veralteten Eintrag entfernen
                self.quellen
                    .remove_if(&id, |_, akt| Arc::ptr_eq(&akt.buffer, &zustand.buffer));
            }
            Err(fehler) if fehler.ist_fatal_fuer_instanz() => {
                tracing::warn!(quelle = %id, fehler = %fehler, "Jitter Buffer defekt, wird neu erstellt");
                self.buffer_neu_erstellen(id, zustand);
            }
            Err(fehler) => {
                tracing::warn!(quelle = %id, fehler = %fehler, "Pull fehlgeschlagen");
            }
        }
    }

    fn buffer_neu_erstellen(&self, id: SourceId, zustand: &QuellenZustand) {
        if let Some(mut eintrag) = self.quellen.get_mut(&id) {
            if Arc::ptr_eq(&eintrag.buffer, &zustand.buffer) {
                eintrag.buffer = Arc::new(JitterBuffer::new(self.config.buffer_config()));
            }
        }
        zustand.buffer.dispose();
        erhoehen(&self.zaehler.buffer_neu_erstellt);
    }

    fn frame_abspielen(&self, id: SourceId, zustand: &QuellenZustand, paket: &AudioPacket) {
        let mut wiedergabe = zustand.wiedergabe.lock();

        let pcm = if paket.encoded {
            if wiedergabe.decoder.is_none() {
                match self.decoder_factory.erstellen(id, zustand.quelle.kanaele()) {
                    Ok(decoder) => wiedergabe.decoder = Some(decoder),
                    Err(fehler) => {
                        erhoehen(&self.zaehler.decoder_fehler);
                        tracing::warn!(quelle = %id, fehler = %fehler, "Decoder konnte nicht erstellt werden");
                        return;
                    }
                }
            }
            let Some(decoder) = wiedergabe.decoder.as_mut() else {
                return;
            };
            match decoder.decode(&paket.payload) {
                Ok(pcm) => pcm,
                Err(fehler) => {
                    erhoehen(&self.zaehler.decoder_fehler);
                    tracing::warn!(
                        quelle = %id,
                        sequenz = paket.sequence,
                        fehler = %fehler,
                        "Frame nicht dekodierbar, verworfen"
                    );
                    return;
                }
            }
        } else {
            paket.payload.to_vec()
        };

        wiedergabe.plc.original(&pcm);
        drop(wiedergabe);

        if self.einreichen(id, zustand, &pcm) {
            erhoehen(&self.zaehler.frames_abgespielt);
        }
    }

    fn fehlend_behandeln(&self, id: SourceId, zustand: &QuellenZustand) {
        erhoehen(&self.zaehler.frames_fehlend);

        let span = self.config.span;
        let kanaele = zustand.quelle.kanaele();
        let frame = match self.config.fehlend_strategie {
            FehlendStrategie::Auslassen => return,
            FehlendStrategie::Stille => plc::stille_frame(span, kanaele),
            FehlendStrategie::Wiederholung => {
                let mut wiedergabe = zustand.wiedergabe.lock();
                let vom_codec = wiedergabe.decoder.as_mut().and_then(|d| d.conceal(span));
                match vom_codec {
                    Some(frame) => frame,
                    None => {
                        let frame_bytes = span as usize * kanaele as usize * 2;
                        wiedergabe.plc.verdecken(frame_bytes).into_frame()
                    }
                }
            }
        };

        if self.einreichen(id, zustand, &frame) {
            erhoehen(&self.zaehler.frames_verdeckt);
        }
    }

    /// Reicht einen Frame an die Stimme der Quelle; false wenn er verworfen wurde
    fn einreichen(&self, id: SourceId, zustand: &QuellenZustand, pcm: &[u8]) -> bool {
        let eingereicht = self.pool.mit_stimme(id, zustand.quelle.stereo, |voice| {
            (voice, self.backend.submit(voice, pcm, zustand.quelle.sample_rate))
        });
        let Some((voice, ergebnis)) = eingereicht else {
            erhoehen(&self.zaehler.frames_verworfen);
            tracing::trace!(quelle = %id, "Keine Stimme frei, Frame verworfen");
            return false;
        };

        match ergebnis {
            Ok(()) => true,
            Err(fehler) => {
                erhoehen(&self.zaehler.backend_fehler);
                tracing::warn!(quelle = %id, voice = %voice, fehler = %fehler, "Frame konnte nicht eingereicht werden");
                false
            }
        }
    }

    // -----------------------------------------------------------------------
    // Lebenszyklus
    // -----------------------------------------------------------------------

    /// Baut eine Quelle explizit ab; die Stimme laeuft leer und geht per Sweep
    /// zurueck in den Pool
    pub fn remove_source(&self, source: SourceId) -> bool {
        match self.quellen.remove(&source) {
            Some((_, zustand)) => {
                zustand.buffer.dispose();
                erhoehen(&self.zaehler.quellen_entfernt);
                tracing::debug!(quelle = %source, "Quelle entfernt");
                true
            }
            None => false,
        }
    }

    /// Startet den periodischen Tick; mehrfacher Aufruf ist ein No-Op
    pub fn start(self: &Arc<Self>, tick_intervall: Duration) -> VoiceResult<()> {
        let mut slot = self.worker.lock();
        if slot.is_some() {
            return Ok(());
        }
        if self.ist_freigegeben() {
            return Err(VoiceError::Freigegeben);
        }

        let orchestrator = Arc::downgrade(self);
        let worker = PeriodischerWorker::starten("gablarski-voice-tick", tick_intervall, move || {
            match orchestrator.upgrade() {
                Some(o) => {
                    o.tick();
                    ControlFlow::Continue(())
                }
                None => ControlFlow::Break(()),
            }
        })?;
        *slot = Some(worker);

        tracing::info!(
            tick_ms = tick_intervall.as_millis() as u64,
            span = self.config.span,
            "Wiedergabe-Tick gestartet"
        );
        Ok(())
    }

    /// Stoppt den Tick (mit Join) und gibt alle Buffer frei; idempotent
    pub fn dispose(&self) {
        if self.freigegeben.swap(true, Ordering::SeqCst) {
            return;
        }
        if let Some(mut worker) = self.worker.lock().take() {
            worker.stoppen();
        }

        let ids: Vec<SourceId> = self.quellen.iter().map(|e| *e.key()).collect();
        for id in &ids {
            if let Some((_, zustand)) = self.quellen.remove(id) {
                zustand.buffer.dispose();
            }
        }
        tracing::info!(quellen = ids.len(), "Orchestrator freigegeben");
    }

    // -----------------------------------------------------------------------
    // Abfragen
    // -----------------------------------------------------------------------

    pub fn ist_freigegeben(&self) -> bool {
        self.freigegeben.load(Ordering::SeqCst)
    }

    pub fn laeuft(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(|w| w.laeuft())
    }

    pub fn aktive_quellen(&self) -> usize {
        self.quellen.len()
    }

    /// Statistik des Jitter Buffers einer Quelle
    pub fn buffer_statistik(&self, source: SourceId) -> Option<JitterBufferStatistik> {
        let buffer = self.quellen.get(&source).map(|z| Arc::clone(&z.buffer))?;
        Some(buffer.statistik())
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Snapshot der Statistiken
    pub fn statistik(&self) -> OrchestratorStatistik {
        let z = &self.zaehler;
        let laden = |a: &AtomicU64| a.load(Ordering::Relaxed);
        OrchestratorStatistik {
            pakete_empfangen: laden(&z.pakete_empfangen),
            pakete_verspaetet: laden(&z.pakete_verspaetet),
            pakete_duplikat: laden(&z.pakete_duplikat),
            frames_abgespielt: laden(&z.frames_abgespielt),
            frames_fehlend: laden(&z.frames_fehlend),
            frames_verdeckt: laden(&z.frames_verdeckt),
            frames_verworfen: laden(&z.frames_verworfen),
            decoder_fehler: laden(&z.decoder_fehler),
            backend_fehler: laden(&z.backend_fehler),
            buffer_neu_erstellt: laden(&z.buffer_neu_erstellt),
            quellen_entfernt: laden(&z.quellen_entfernt),
            aktive_quellen: self.quellen.len(),
        }
    }
}

impl Drop for PlaybackOrchestrator {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::SpeicherBackend;
    use crate::pool::VoicePoolConfig;
    use gablarski_core::types::VoiceHandle;

    const SPAN: u32 = 4;

    struct Aufbau {
        orchestrator: PlaybackOrchestrator,
        pool: Arc<VoicePool>,
        backend: Arc<SpeicherBackend>,
    }

    fn aufbau(strategie: FehlendStrategie, kapazitaet: u32) -> Aufbau {
        let backend = Arc::new(SpeicherBackend::new());
        let pool = VoicePool::new(
            VoicePoolConfig {
                total_voices: kapazitaet,
                sweep_intervall: Duration::from_millis(10),
            },
            backend.clone(),
        );
        let orchestrator = PlaybackOrchestrator::new(
            OrchestratorConfig {
                span: SPAN,
                verzoegerung_frames: 1,
                max_pakete: 16,
                inaktiv_timeout: Duration::from_millis(500),
                fehlend_strategie: strategie,
                standard_art: SourceKind::Benachrichtigung,
            },
            pool.clone(),
            backend.clone(),
        );
        Aufbau {
            orchestrator,
            pool,
            backend,
        }
    }

    /// Mono-Frame mit SPAN Samples, alle auf `wert`
    fn frame(wert: i16) -> Vec<u8> {
        (0..SPAN).flat_map(|_| wert.to_le_bytes()).collect()
    }

    fn voice(a: &Aufbau, id: i32) -> VoiceHandle {
        a.pool.zuweisung(SourceId(id)).unwrap().voice
    }

    #[test]
    fn pakete_werden_in_reihenfolge_eingereicht() {
        let a = aufbau(FehlendStrategie::Stille, 4);
        let q = SourceId(1);
        a.orchestrator.on_packet_arrived(q, 1, SPAN, frame(2));
        a.orchestrator.on_packet_arrived(q, 0, SPAN, frame(1));

        a.orchestrator.tick();
        a.orchestrator.tick();

        let eingereicht = a.backend.eingereicht(voice(&a, 1));
        assert_eq!(eingereicht, vec![frame(1), frame(2)]);
        assert_eq!(a.orchestrator.statistik().frames_abgespielt, 2);
    }

    #[test]
    fn verlust_mit_stille_auffuellen() {
        let a = aufbau(FehlendStrategie::Stille, 4);
        let q = SourceId(1);
        a.orchestrator.on_packet_arrived(q, 0, SPAN, frame(5));
        a.orchestrator.on_packet_arrived(q, 2, SPAN, frame(7));

        for _ in 0..3 {
            a.orchestrator.tick();
        }

        let eingereicht = a.backend.eingereicht(voice(&a, 1));
        assert_eq!(eingereicht, vec![frame(5), frame(0), frame(7)]);
        let stat = a.orchestrator.statistik();
        assert_eq!(stat.frames_fehlend, 1);
        assert_eq!(stat.frames_verdeckt, 1);
    }

    #[test]
    fn verlust_mit_wiederholung_verdecken() {
        let a = aufbau(FehlendStrategie::Wiederholung, 4);
        let q = SourceId(1);
        a.orchestrator.on_packet_arrived(q, 0, SPAN, frame(1000));
        a.orchestrator.on_packet_arrived(q, 2, SPAN, frame(10));

        for _ in 0..3 {
            a.orchestrator.tick();
        }

        let eingereicht = a.backend.eingereicht(voice(&a, 1));
        assert_eq!(eingereicht[1], frame(750));
    }

    #[test]
    fn verlust_auslassen_reicht_nichts_ein() {
        let a = aufbau(FehlendStrategie::Auslassen, 4);
        let q = SourceId(1);
        a.orchestrator.on_packet_arrived(q, 0, SPAN, frame(1));
        a.orchestrator.on_packet_arrived(q, 2, SPAN, frame(3));

        for _ in 0..3 {
            a.orchestrator.tick();
        }
        assert_eq!(a.backend.eingereicht(voice(&a, 1)).len(), 2);
        assert_eq!(a.orchestrator.statistik().frames_fehlend, 1);
    }

    #[test]
    fn unterlauf_reicht_nichts_ein() {
        let a = aufbau(FehlendStrategie::Stille, 4);
        let q = SourceId(1);
        a.orchestrator.on_packet_arrived(q, 0, SPAN, frame(1));
        for _ in 0..5 {
            a.orchestrator.tick();
        }
        assert_eq!(a.backend.eingereicht_gesamt(), 1);
        assert_eq!(a.orchestrator.statistik().frames_fehlend, 0);
    }

    #[test]
    fn ohne_stimme_wird_verworfen() {
        let a = aufbau(FehlendStrategie::Stille, 1);
        a.orchestrator.on_packet_arrived(SourceId(1), 0, SPAN, frame(1));
        a.orchestrator.on_packet_arrived(SourceId(2), 0, SPAN, frame(2));

        a.orchestrator.tick();

        let stat = a.orchestrator.statistik();
        assert_eq!(stat.frames_abgespielt, 1);
        assert_eq!(stat.frames_verworfen, 1);
        assert_eq!(a.backend.eingereicht_gesamt(), 1);
    }

    #[test]
    fn defekter_buffer_wird_neu_erstellt() {
        let a = aufbau(FehlendStrategie::Stille, 4);
        let q = SourceId(1);
        // Cursor-Ueberlauf erzwingen
        a.orchestrator.paket_einreihen(
            AudioPacket::neu(q, 0, SPAN, frame(1)).mit_timestamp(u32::MAX - 1),
        );
        a.orchestrator.on_packet_arrived(SourceId(2), 0, SPAN, frame(2));

        a.orchestrator.tick();

        let stat = a.orchestrator.statistik();
        assert_eq!(stat.buffer_neu_erstellt, 1);
        assert_eq!(stat.frames_abgespielt, 1, "Andere Quelle ist nicht betroffen");

        // Neuer Buffer nimmt wieder Pakete an
        a.orchestrator.on_packet_arrived(q, 10, SPAN, frame(3));
        a.orchestrator.tick();
        assert_eq!(a.orchestrator.statistik().frames_abgespielt, 2);
    }

    #[test]
    fn kodierte_pakete_werden_dekodiert() {
        struct Verdoppler;
        impl FrameDecoder for Verdoppler {
            fn decode(&mut self, payload: &[u8]) -> VoiceResult<Vec<u8>> {
                if payload.is_empty() {
                    return Err(VoiceError::Codec("leerer Frame".into()));
                }
                Ok(payload.iter().flat_map(|b| [*b, *b]).collect())
            }
        }
        struct Fabrik;
        impl DecoderFactory for Fabrik {
            fn erstellen(&self, _: SourceId, _: u16) -> VoiceResult<Box<dyn FrameDecoder>> {
                Ok(Box::new(Verdoppler))
            }
        }

        let a = aufbau(FehlendStrategie::Stille, 4);
        let orchestrator = a.orchestrator.mit_decoder_factory(Arc::new(Fabrik));
        orchestrator.on_packet_arrived_encoded(SourceId(1), 0, SPAN, vec![1, 2]);
        orchestrator.on_packet_arrived_encoded(SourceId(1), 1, SPAN, Vec::new());
        orchestrator.tick();
        orchestrator.tick();

        let v = a.pool.zuweisung(SourceId(1)).unwrap().voice;
        assert_eq!(a.backend.eingereicht(v), vec![vec![1, 1, 2, 2]]);
        let stat = orchestrator.statistik();
        assert_eq!(stat.decoder_fehler, 1);
        assert_eq!(stat.frames_abgespielt, 1);
    }

    #[test]
    fn stereo_quelle_bekommt_stereo_stimme() {
        let a = aufbau(FehlendStrategie::Stille, 4);
        a.orchestrator
            .registry()
            .registrieren(SourceId(9), SourceKind::Musik);
        // Musik ist kodiert; Passthrough reicht PCM unveraendert durch
        a.orchestrator
            .on_packet_arrived_encoded(SourceId(9), 0, SPAN, vec![0; 16]);
        a.orchestrator.tick();

        assert!(a.pool.zuweisung(SourceId(9)).unwrap().stereo);
        assert_eq!(a.pool.belegt(), 2);
    }

    #[test]
    fn inaktive_quelle_wird_abgebaut() {
        let a = aufbau(FehlendStrategie::Stille, 4);
        a.orchestrator.on_packet_arrived(SourceId(1), 0, SPAN, frame(1));
        a.orchestrator.tick();
        assert_eq!(a.orchestrator.aktive_quellen(), 1);

        a.orchestrator.tick_zu(Instant::now() + Duration::from_secs(1));
        assert_eq!(a.orchestrator.aktive_quellen(), 0);
        assert_eq!(a.orchestrator.statistik().quellen_entfernt, 1);

        // Stimme bleibt bis zum Sweep zugewiesen
        assert!(a.pool.zuweisung(SourceId(1)).is_some());
        a.backend.alle_beenden();
        assert_eq!(a.pool.reclaim(), 1);
    }

    #[test]
    fn verspaetete_pakete_halten_quelle_nicht_am_leben() {
        let a = aufbau(FehlendStrategie::Stille, 4);
        let q = SourceId(1);
        for seq in 100..103 {
            a.orchestrator.on_packet_arrived(q, seq, SPAN, frame(1));
            a.orchestrator.tick();
        }

        // Sender startet bei 0 neu: alles liegt hinter dem Cursor
        std::thread::sleep(Duration::from_millis(300));
        assert_eq!(
            a.orchestrator.on_packet_arrived(q, 0, SPAN, frame(2)),
            PushErgebnis::Verspaetet
        );

        // 300 ms nach dem verspaeteten Paket, aber ueber 600 ms nach dem letzten
        // eingefuegten: die Quelle gilt als inaktiv
        a.orchestrator
            .tick_zu(Instant::now() + Duration::from_millis(300));
        assert_eq!(a.orchestrator.aktive_quellen(), 0);

        // Neuer Zustand spielt den neu gestarteten Strom ab
        assert_eq!(
            a.orchestrator.on_packet_arrived(q, 0, SPAN, frame(2)),
            PushErgebnis::Eingefuegt
        );
        a.orchestrator.tick();
        assert_eq!(a.orchestrator.statistik().frames_abgespielt, 4);
        assert_eq!(a.backend.eingereicht(voice(&a, 1)).last(), Some(&frame(2)));
    }

    #[test]
    fn abweichender_span_wird_einmal_gemeldet() {
        let a = aufbau(FehlendStrategie::Stille, 4);
        a.orchestrator
            .on_packet_arrived(SourceId(1), 0, SPAN * 2, frame(1));
        assert!(a.orchestrator.quellen.get(&SourceId(1)).unwrap().span_gewarnt);
        a.orchestrator
            .on_packet_arrived(SourceId(1), 1, SPAN * 2, frame(1));

        a.orchestrator.on_packet_arrived(SourceId(2), 0, SPAN, frame(1));
        assert!(!a.orchestrator.quellen.get(&SourceId(2)).unwrap().span_gewarnt);
    }

    #[test]
    fn remove_source_und_dispose() {
        let a = aufbau(FehlendStrategie::Stille, 4);
        a.orchestrator.on_packet_arrived(SourceId(1), 0, SPAN, frame(1));
        a.orchestrator.on_packet_arrived(SourceId(2), 0, SPAN, frame(1));

        assert!(a.orchestrator.remove_source(SourceId(1)));
        assert!(!a.orchestrator.remove_source(SourceId(1)));
        assert_eq!(a.orchestrator.aktive_quellen(), 1);

        a.orchestrator.dispose();
        a.orchestrator.dispose();
        assert!(a.orchestrator.ist_freigegeben());
        assert_eq!(a.orchestrator.aktive_quellen(), 0);
        assert_eq!(
            a.orchestrator.on_packet_arrived(SourceId(3), 0, SPAN, frame(1)),
            PushErgebnis::Freigegeben
        );
        a.orchestrator.tick();
        assert_eq!(a.backend.eingereicht_gesamt(), 0);
    }

    #[test]
    fn verspaetete_und_doppelte_pakete_gezaehlt() {
        let a = aufbau(FehlendStrategie::Stille, 4);
        let q = SourceId(1);
        a.orchestrator.on_packet_arrived(q, 1, SPAN, frame(1));
        a.orchestrator.on_packet_arrived(q, 1, SPAN, frame(1));
        a.orchestrator.tick();
        assert_eq!(
            a.orchestrator.on_packet_arrived(q, 0, SPAN, frame(1)),
            PushErgebnis::Verspaetet
        );

        let stat = a.orchestrator.statistik();
        assert_eq!(stat.pakete_empfangen, 3);
        assert_eq!(stat.pakete_duplikat, 1);
        assert_eq!(stat.pakete_verspaetet, 1);
    }
}
