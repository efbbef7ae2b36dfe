//! Jitter Buffer fuer Audio-Pakete einer logischen Quelle
//!
//! Nimmt Pakete in beliebiger Reihenfolge entgegen (Netzwerk-Thread) und gibt
//! sie beim Abholen (Tick-Thread) streng aufsteigend nach Timestamp wieder
//! aus. Fehlende Frames werden als [`PullStatus::Missing`] gemeldet, damit der
//! Aufrufer Stille oder PLC einsetzen kann.
//!
//! ## Phasen
//! - **Puffern**: Es wird gewartet, bis `verzoegerung_frames` Pakete vorliegen.
//!   Gilt beim Start und nach jedem Unterlauf (Puffer leergelaufen).
//! - **Abspielen**: Pro `pull` rueckt der Wiedergabe-Cursor um den
//!   angeforderten Span vor.
//!
//! ## Status-Politik
//! - `Ok`: Paket liegt genau auf dem Cursor.
//! - `Insertion`: Cursor wird sofort auf ein Paket neu ausgerichtet, das nicht
//!   an der erwarteten Position liegt (innerhalb des Fensters oder beim
//!   Wiederanlauf nach einem Unterlauf). Keine Interpolation.
//! - `Missing`: Kein Paket fuer das Fenster. Liegen spaetere Pakete vor, rueckt
//!   der Cursor trotzdem vor (Verlust). Ist der Puffer leer, bleibt der Cursor
//!   stehen (Unterlauf).
//! - Sequenzsprung: Ist das frueheste Paket weiter als `max_pakete` Frames
//!   entfernt oder der Puffer voll, springt der Cursor direkt dorthin
//!   (`Insertion`). Sonst wuerde der Ueberlauf jedes Paket verdraengen, bevor
//!   der Cursor es erreicht.
//!
//! ## Nebenlaeufigkeit
//! Ein `parking_lot::Mutex` pro Instanz; `push` und `pull` duerfen aus
//! verschiedenen Threads kommen. Nach [`JitterBuffer::dispose`] sind alle
//! Aufrufe No-Ops.

use bytes::Bytes;
use gablarski_core::types::SourceId;
use parking_lot::Mutex;
use std::collections::BTreeMap;

use crate::error::{VoiceError, VoiceResult};

// ---------------------------------------------------------------------------
// Paket
// ---------------------------------------------------------------------------

/// Ein Audio-Frame einer Quelle
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AudioPacket {
    pub source_id: SourceId,
    /// Monoton steigend pro Quelle, Luecken bedeuten Verlust
    pub sequence: u32,
    /// `sequence * span`
    pub timestamp: u32,
    /// Frame-Dauer in Samples
    pub span: u32,
    pub payload: Bytes,
    /// Payload muss vor der Wiedergabe noch dekodiert werden
    pub encoded: bool,
}

impl AudioPacket {
    /// Erstellt ein PCM-Paket; der Timestamp wird aus Sequenz und Span abgeleitet
    pub fn neu(source_id: SourceId, sequence: u32, span: u32, payload: impl Into<Bytes>) -> Self {
        Self {
            source_id,
            sequence,
            timestamp: sequence.wrapping_mul(span),
            span,
            payload: payload.into(),
            encoded: false,
        }
    }

    /// Wie [`AudioPacket::neu`], aber mit kodiertem Payload
    pub fn kodiert(
        source_id: SourceId,
        sequence: u32,
        span: u32,
        payload: impl Into<Bytes>,
    ) -> Self {
        Self {
            encoded: true,
            ..Self::neu(source_id, sequence, span, payload)
        }
    }

    /// Ueberschreibt den Timestamp (fuer Quellen mit eigener Zeitbasis)
    pub fn mit_timestamp(mut self, timestamp: u32) -> Self {
        self.timestamp = timestamp;
        self
    }
}

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration fuer den Jitter Buffer
///
/// Wird nur bei der Erstellung gelesen; eine Aenderung mitten im Stream
/// wuerde einen neuen Cursor erfordern.
#[derive(Debug, Clone)]
pub struct JitterBufferConfig {
    /// Pakete, die vor der ersten Ausgabe (und nach jedem Unterlauf)
    /// vorliegen muessen. 0 wird wie 1 behandelt.
    pub verzoegerung_frames: usize,
    /// Obergrenze gepufferter Pakete; bei Ueberlauf faellt das aelteste raus
    pub max_pakete: usize,
}

impl Default for JitterBufferConfig {
    fn default() -> Self {
        Self {
            verzoegerung_frames: 2,
            max_pakete: 50,
        }
    }
}

// ---------------------------------------------------------------------------
// Ergebnisse
// ---------------------------------------------------------------------------

/// Ergebnis von [`JitterBuffer::push`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushErgebnis {
    /// Paket wurde gepuffert
    Eingefuegt,
    /// Timestamp liegt vor dem Cursor – kann nie mehr abgespielt werden
    Verspaetet,
    /// Timestamp ist bereits gepuffert
    Duplikat,
    /// Instanz wurde freigegeben, Paket ignoriert
    Freigegeben,
}

/// Status eines `pull`
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PullStatus {
    Ok,
    Missing,
    Insertion,
}

/// Ergebnis von [`JitterBuffer::pull`]
#[derive(Debug, Clone)]
pub struct PullErgebnis {
    pub paket: Option<AudioPacket>,
    pub status: PullStatus,
    /// Nach dem Pull noch gepufferte Pakete
    pub gepuffert: usize,
    /// `Missing` wegen echtem Verlust (Cursor ist vorgerueckt). Falsch,
    /// solange nur auf die Puffer-Verzoegerung gewartet wird.
    pub verlust: bool,
}

impl PullErgebnis {
    fn fehlend(gepuffert: usize) -> Self {
        Self {
            paket: None,
            status: PullStatus::Missing,
            gepuffert,
            verlust: false,
        }
    }

    /// Fehlend, weil der Puffer leer ist (kein Verlust, sondern Pause)
    pub fn ist_unterlauf(&self) -> bool {
        self.status == PullStatus::Missing && self.gepuffert == 0
    }
}

// ---------------------------------------------------------------------------
// Statistiken
// ---------------------------------------------------------------------------

/// Statistiken des Jitter Buffers (Snapshot)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct JitterBufferStatistik {
    /// Anzahl empfangener Pakete gesamt
    pub empfangen: u64,
    /// Anzahl ausgegebener Pakete
    pub abgespielt: u64,
    /// Zu spaet angekommene Pakete
    pub verspaetet: u64,
    /// Verworfene Duplikate
    pub duplikate: u64,
    /// Frames ohne Paket bzw. durch Ueberlauf verdraengte Pakete
    pub verloren: u64,
    /// Cursor-Neuausrichtungen
    pub einfuegungen: u64,
    /// Leergelaufene Puffer
    pub unterlaeufe: u64,
    /// Neuausrichtungen nach einem Sequenzsprung
    pub spruenge: u64,
    /// Aktueller Fuellstand in Paketen
    pub fuellstand: usize,
}

// ---------------------------------------------------------------------------
// JitterBuffer
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Puffern,
    Abspielen,
}

struct Zustand {
    /// Gepufferte Pakete, sortiert nach Timestamp
    pakete: BTreeMap<u32, AudioPacket>,
    /// Naechster erwarteter Timestamp (None bis zur ersten Ausgabe)
    cursor: Option<u32>,
    phase: Phase,
    freigegeben: bool,
    /// Gesetzt nach einem instanz-fatalen Fehler
    defekt: Option<VoiceError>,
    statistik: JitterBufferStatistik,
}

impl Zustand {
    /// Entfernt Pakete, die durch einen Cursor-Sprung hinter den Cursor
    /// geraten sind
    fn veraltete_entfernen(&mut self) {
        let Some(cursor) = self.cursor else {
            return;
        };
        while let Some((&ts, _)) = self.pakete.first_key_value() {
            if ts >= cursor {
                break;
            }
            self.pakete.remove(&ts);
            self.statistik.verloren += 1;
        }
    }

    fn cursor_setzen(&mut self, basis: u32, span: u32) -> VoiceResult<()> {
        match basis.checked_add(span) {
            Some(neu) => {
                self.cursor = Some(neu);
                Ok(())
            }
            None => Err(self.defekt_markieren(VoiceError::InternerFehler(format!(
                "Wiedergabe-Cursor ueberlaeuft (basis={basis}, span={span})"
            )))),
        }
    }

    fn defekt_markieren(&mut self, fehler: VoiceError) -> VoiceError {
        self.defekt = Some(fehler.clone());
        fehler
    }

    fn ausgeben(&mut self, paket: AudioPacket, status: PullStatus) -> PullErgebnis {
        self.statistik.abgespielt += 1;
        if status == PullStatus::Insertion {
            self.statistik.einfuegungen += 1;
        }
        self.statistik.fuellstand = self.pakete.len();
        PullErgebnis {
            paket: Some(paket),
            status,
            gepuffert: self.pakete.len(),
            verlust: false,
        }
    }
}

/// Jitter Buffer einer logischen Quelle
pub struct JitterBuffer {
    config: JitterBufferConfig,
    zustand: Mutex<Zustand>,
}

impl JitterBuffer {
    /// Erstellt einen neuen, leeren Jitter Buffer
    pub fn new(config: JitterBufferConfig) -> Self {
        Self {
            config,
            zustand: Mutex::new(Zustand {
                pakete: BTreeMap::new(),
                cursor: None,
                phase: Phase::Puffern,
                freigegeben: false,
                defekt: None,
                statistik: JitterBufferStatistik::default(),
            }),
        }
    }

    /// Fuegt ein Paket ein
    ///
    /// Verspaetete Pakete und Duplikate werden still verworfen und nur gezaehlt.
    pub fn push(&self, paket: AudioPacket) -> PushErgebnis {
        let mut z = self.zustand.lock();
        if z.freigegeben {
            return PushErgebnis::Freigegeben;
        }
        z.statistik.empfangen += 1;

        let ts = paket.timestamp;
        if let Some(cursor) = z.cursor {
            if ts < cursor {
                z.statistik.verspaetet += 1;
                tracing::trace!(
                    quelle = %paket.source_id,
                    timestamp = ts,
                    cursor,
                    "Verspaetetes Paket verworfen"
                );
                return PushErgebnis::Verspaetet;
            }
        }

        if z.pakete.contains_key(&ts) {
            z.statistik.duplikate += 1;
            tracing::trace!(quelle = %paket.source_id, timestamp = ts, "Duplikat verworfen");
            return PushErgebnis::Duplikat;
        }

        z.pakete.insert(ts, paket);

        if z.pakete.len() > self.config.max_pakete {
            if let Some((aeltester, _)) = z.pakete.pop_first() {
                z.statistik.verloren += 1;
                tracing::warn!(timestamp = aeltester, "Buffer-Ueberlauf: aeltestes Paket verworfen");
            }
        }

        z.statistik.fuellstand = z.pakete.len();
        PushErgebnis::Eingefuegt
    }

    /// Holt den Frame fuer den naechsten Wiedergabe-Schritt
    ///
    /// Blockiert nie laenger als die interne Sperre. Ein leerer Puffer ergibt
    /// immer `Missing`, nie einen Fehler.
    ///
    /// # Fehler
    /// - [`VoiceError::UngueltigesArgument`] bei `desired_span == 0`
    /// - [`VoiceError::InternerFehler`] bei inkonsistentem Zustand
    ///   (Cursor-Ueberlauf)
    ///
    /// Beide machen die Instanz unbrauchbar; der Aufrufer muss sie neu
    /// erstellen. Nach `dispose` kommt [`VoiceError::Freigegeben`].
    pub fn pull(&self, desired_span: u32) -> VoiceResult<PullErgebnis> {
        let mut z = self.zustand.lock();
        if z.freigegeben {
            return Err(VoiceError::Freigegeben);
        }
        if let Some(fehler) = &z.defekt {
            return Err(fehler.clone());
        }
        if desired_span == 0 {
            return Err(z.defekt_markieren(VoiceError::UngueltigesArgument(
                "desired_span muss groesser als 0 sein".into(),
            )));
        }

        z.veraltete_entfernen();

        match z.phase {
            Phase::Puffern => {
                let noetig = self.config.verzoegerung_frames.max(1);
                if z.pakete.len() < noetig {
                    return Ok(PullErgebnis::fehlend(z.pakete.len()));
                }

                let Some((&ts, _)) = z.pakete.first_key_value() else {
                    return Err(z.defekt_markieren(VoiceError::InternerFehler(
                        "Puffer leer trotz erreichter Verzoegerung".into(),
                    )));
                };
                let status = match z.cursor {
                    Some(cursor) if cursor != ts => PullStatus::Insertion,
                    _ => PullStatus::Ok,
                };
                z.cursor_setzen(ts, desired_span)?;
                z.phase = Phase::Abspielen;

                if status == PullStatus::Insertion {
                    tracing::debug!(timestamp = ts, "Wiederanlauf nach Unterlauf: Cursor neu ausgerichtet");
                }
                let paket = z.pakete.remove(&ts).ok_or_else(|| {
                    VoiceError::InternerFehler(format!("Paket {ts} verschwunden"))
                })?;
                Ok(z.ausgeben(paket, status))
            }
            Phase::Abspielen => {
                let Some(cursor) = z.cursor else {
                    return Err(z.defekt_markieren(VoiceError::InternerFehler(
                        "Abspielphase ohne Cursor".into(),
                    )));
                };

                if z.pakete.is_empty() {
                    z.phase = Phase::Puffern;
                    z.statistik.unterlaeufe += 1;
                    z.statistik.fuellstand = 0;
                    tracing::trace!(cursor, "Jitter Buffer leergelaufen");
                    return Ok(PullErgebnis::fehlend(0));
                }

                if let Some(paket) = z.pakete.remove(&cursor) {
                    z.cursor_setzen(cursor, desired_span)?;
                    return Ok(z.ausgeben(paket, PullStatus::Ok));
                }

                // Paket innerhalb des Fensters, aber nicht auf dem Cursor
                let fenster_ende = cursor.saturating_add(desired_span);
                let im_fenster = z.pakete.range(cursor..fenster_ende).next().map(|(&ts, _)| ts);
                if let Some(ts) = im_fenster {
                    z.cursor_setzen(ts, desired_span)?;
                    tracing::debug!(cursor, timestamp = ts, "Cursor auf Paket im Fenster ausgerichtet");
                    let paket = z.pakete.remove(&ts).ok_or_else(|| {
                        VoiceError::InternerFehler(format!("Paket {ts} verschwunden"))
                    })?;
                    return Ok(z.ausgeben(paket, PullStatus::Insertion));
                }

                // Sequenzsprung: das frueheste Paket ist schrittweise nicht mehr
                // erreichbar, bevor der Ueberlauf es verdraengt
                if let Some((&ts, _)) = z.pakete.first_key_value() {
                    let abstand = u64::from(ts.wrapping_sub(cursor));
                    let reichweite = self.config.max_pakete as u64 * u64::from(desired_span);
                    if z.pakete.len() >= self.config.max_pakete || abstand > reichweite {
                        z.cursor_setzen(ts, desired_span)?;
                        z.statistik.spruenge += 1;
                        tracing::debug!(cursor, timestamp = ts, "Sequenzsprung: Cursor neu ausgerichtet");
                        let paket = z.pakete.remove(&ts).ok_or_else(|| {
                            VoiceError::InternerFehler(format!("Paket {ts} verschwunden"))
                        })?;
                        return Ok(z.ausgeben(paket, PullStatus::Insertion));
                    }
                }

                // Spaetere Pakete vorhanden: echter Verlust
                z.cursor_setzen(cursor, desired_span)?;
                z.statistik.verloren += 1;
                let gepuffert = z.pakete.len();
                z.statistik.fuellstand = gepuffert;
                tracing::trace!(cursor, gepuffert, "Frame fehlt");
                Ok(PullErgebnis {
                    verlust: true,
                    ..PullErgebnis::fehlend(gepuffert)
                })
            }
        }
    }

    /// Gibt alle gepufferten Pakete frei; weitere Aufrufe sind No-Ops
    pub fn dispose(&self) {
        let mut z = self.zustand.lock();
        if z.freigegeben {
            return;
        }
        let verworfen = z.pakete.len();
        z.pakete.clear();
        z.freigegeben = true;
        z.statistik.fuellstand = 0;
        tracing::debug!(verworfen, "Jitter Buffer freigegeben");
    }

    /// Wurde die Instanz freigegeben?
    pub fn ist_freigegeben(&self) -> bool {
        self.zustand.lock().freigegeben
    }

    /// Aktueller Wiedergabe-Cursor (None vor der ersten Ausgabe)
    pub fn cursor(&self) -> Option<u32> {
        self.zustand.lock().cursor
    }

    /// Aktueller Fuellstand
    pub fn fuellstand(&self) -> usize {
        self.zustand.lock().pakete.len()
    }

    /// Snapshot der Statistiken
    pub fn statistik(&self) -> JitterBufferStatistik {
        self.zustand.lock().statistik.clone()
    }

    pub fn config(&self) -> &JitterBufferConfig {
        &self.config
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    const SPAN: u32 = 160;
    const QUELLE: SourceId = SourceId(1);

    fn make_paket(seq: u32) -> AudioPacket {
        AudioPacket::neu(QUELLE, seq, SPAN, vec![seq as u8; 4])
    }

    fn buffer(verzoegerung: usize) -> JitterBuffer {
        JitterBuffer::new(JitterBufferConfig {
            verzoegerung_frames: verzoegerung,
            max_pakete: 64,
        })
    }

    fn timestamp_von(e: &PullErgebnis) -> Option<u32> {
        e.paket.as_ref().map(|p| p.timestamp)
    }

    #[test]
    fn timestamp_aus_sequenz() {
        let p = make_paket(3);
        assert_eq!(p.timestamp, 480);
        assert!(!p.encoded);
        assert!(AudioPacket::kodiert(QUELLE, 1, SPAN, vec![1]).encoded);
    }

    #[test]
    fn jitter_buffer_reihenfolge_in_order() {
        let buf = buffer(1);
        for i in 0..5 {
            assert_eq!(buf.push(make_paket(i)), PushErgebnis::Eingefuegt);
        }
        for i in 0..5 {
            let e = buf.pull(SPAN).unwrap();
            assert_eq!(e.status, PullStatus::Ok);
            assert_eq!(timestamp_von(&e), Some(i * SPAN));
        }
    }

    #[test]
    fn jitter_buffer_umgekehrte_reihenfolge() {
        let buf = buffer(1);
        for i in (0..5).rev() {
            buf.push(make_paket(i));
        }
        let ts: Vec<u32> = (0..5)
            .map(|_| timestamp_von(&buf.pull(SPAN).unwrap()).unwrap())
            .collect();
        assert_eq!(ts, vec![0, 160, 320, 480, 640]);
    }

    #[test]
    fn jitter_buffer_luecke_wird_aufgefuellt() {
        // Sequenz 0, 2, 1 -> Ausgabe 0, 160, 320
        let buf = buffer(1);
        buf.push(make_paket(0));
        buf.push(make_paket(2));
        buf.push(make_paket(1));

        for erwartet in [0, 160, 320] {
            let e = buf.pull(SPAN).unwrap();
            assert_eq!(e.status, PullStatus::Ok);
            assert_eq!(timestamp_von(&e), Some(erwartet));
        }
    }

    #[test]
    fn jitter_buffer_duplikate_verwerfen() {
        let buf = buffer(1);
        assert_eq!(buf.push(make_paket(1)), PushErgebnis::Eingefuegt);
        assert_eq!(buf.push(make_paket(1)), PushErgebnis::Duplikat);
        assert_eq!(buf.fuellstand(), 1);

        let e = buf.pull(SPAN).unwrap();
        assert_eq!(timestamp_von(&e), Some(160));
        assert!(buf.pull(SPAN).unwrap().ist_unterlauf());
        assert_eq!(buf.statistik().duplikate, 1);
    }

    #[test]
    fn jitter_buffer_verspaetete_pakete_verwerfen() {
        let buf = buffer(1);
        buf.push(make_paket(0));
        buf.push(make_paket(2));

        assert_eq!(timestamp_von(&buf.pull(SPAN).unwrap()), Some(0));

        // 160 fehlt, 320 liegt vor -> Verlust, Cursor rueckt vor
        let e = buf.pull(SPAN).unwrap();
        assert_eq!(e.status, PullStatus::Missing);
        assert_eq!(e.gepuffert, 1);
        assert!(e.verlust);
        assert_eq!(buf.cursor(), Some(320));

        // Nachzuegler fuer 160 darf nie mehr erscheinen
        assert_eq!(buf.push(make_paket(1)), PushErgebnis::Verspaetet);

        let e = buf.pull(SPAN).unwrap();
        assert_eq!(e.status, PullStatus::Ok);
        assert_eq!(timestamp_von(&e), Some(320));
        assert!(buf.pull(SPAN).unwrap().paket.is_none());

        let stat = buf.statistik();
        assert_eq!(stat.verspaetet, 1);
        assert_eq!(stat.verloren, 1);
    }

    #[test]
    fn jitter_buffer_leer_immer_missing() {
        let buf = buffer(2);
        for _ in 0..100 {
            let e = buf.pull(SPAN).unwrap();
            assert_eq!(e.status, PullStatus::Missing);
            assert!(e.paket.is_none());
        }
        assert_eq!(buf.cursor(), None);
    }

    #[test]
    fn jitter_buffer_verzoegerung() {
        let buf = buffer(3);
        buf.push(make_paket(0));
        buf.push(make_paket(1));
        let e = buf.pull(SPAN).unwrap();
        assert_eq!(e.status, PullStatus::Missing);
        assert!(!e.verlust, "Warten auf Verzoegerung ist kein Verlust");
        assert!(!e.ist_unterlauf());

        buf.push(make_paket(2));
        let e = buf.pull(SPAN).unwrap();
        assert_eq!(e.status, PullStatus::Ok);
        assert_eq!(timestamp_von(&e), Some(0));
        assert_eq!(e.gepuffert, 2);
    }

    #[test]
    fn jitter_buffer_insertion_im_fenster() {
        let buf = buffer(1);
        buf.push(make_paket(0));
        buf.push(make_paket(0).mit_timestamp(240));

        assert_eq!(buf.pull(SPAN).unwrap().status, PullStatus::Ok);
        let e = buf.pull(SPAN).unwrap();
        assert_eq!(e.status, PullStatus::Insertion);
        assert_eq!(timestamp_von(&e), Some(240));
        assert_eq!(buf.cursor(), Some(400));
        assert_eq!(buf.statistik().einfuegungen, 1);
    }

    #[test]
    fn jitter_buffer_wiederanlauf_nach_unterlauf() {
        let buf = buffer(1);
        buf.push(make_paket(0));
        buf.pull(SPAN).unwrap();

        // Leer: Unterlauf, Cursor bleibt stehen
        let e = buf.pull(SPAN).unwrap();
        assert!(e.ist_unterlauf());
        assert_eq!(buf.cursor(), Some(160));
        assert_eq!(buf.statistik().unterlaeufe, 1);

        // Neuer Burst weiter vorne -> sofortige Neuausrichtung
        buf.push(make_paket(5));
        let e = buf.pull(SPAN).unwrap();
        assert_eq!(e.status, PullStatus::Insertion);
        assert_eq!(timestamp_von(&e), Some(800));

        buf.push(make_paket(6));
        assert_eq!(buf.pull(SPAN).unwrap().status, PullStatus::Ok);
    }

    #[test]
    fn jitter_buffer_sequenzsprung_wird_neu_ausgerichtet() {
        let buf = JitterBuffer::new(JitterBufferConfig {
            verzoegerung_frames: 1,
            max_pakete: 50,
        });
        buf.push(make_paket(0));
        buf.push(make_paket(1));
        buf.pull(SPAN).unwrap();
        buf.pull(SPAN).unwrap();

        // Sender springt weit nach vorne, Pakete kommen im Takt weiter
        buf.push(make_paket(1000));
        let mut abgespielt = 0;
        for i in 1..200 {
            buf.push(make_paket(1000 + i));
            let e = buf.pull(SPAN).unwrap();
            if e.paket.is_some() {
                abgespielt += 1;
            }
        }

        assert_eq!(abgespielt, 199);
        let stat = buf.statistik();
        assert_eq!(stat.spruenge, 1);
        assert_eq!(stat.verloren, 0);
        assert!(buf.fuellstand() <= 1);
    }

    #[test]
    fn jitter_buffer_voller_puffer_springt_ueber_luecke() {
        let buf = JitterBuffer::new(JitterBufferConfig {
            verzoegerung_frames: 1,
            max_pakete: 4,
        });
        buf.push(make_paket(0));
        assert_eq!(buf.pull(SPAN).unwrap().status, PullStatus::Ok);

        // 1 und 2 fehlen, der Puffer ist mit 3..7 voll
        for seq in 3..7 {
            buf.push(make_paket(seq));
        }
        let e = buf.pull(SPAN).unwrap();
        assert_eq!(e.status, PullStatus::Insertion);
        assert_eq!(timestamp_von(&e), Some(3 * SPAN));
        assert_eq!(buf.pull(SPAN).unwrap().status, PullStatus::Ok);
    }

    #[test]
    fn jitter_buffer_nahtlose_fortsetzung_nach_unterlauf() {
        let buf = buffer(1);
        buf.push(make_paket(0));
        buf.pull(SPAN).unwrap();
        assert!(buf.pull(SPAN).unwrap().ist_unterlauf());

        buf.push(make_paket(1));
        let e = buf.pull(SPAN).unwrap();
        assert_eq!(e.status, PullStatus::Ok);
        assert_eq!(timestamp_von(&e), Some(160));
    }

    #[test]
    fn jitter_buffer_span_null_ist_fatal() {
        let buf = buffer(1);
        buf.push(make_paket(0));
        let fehler = buf.pull(0).unwrap_err();
        assert!(matches!(fehler, VoiceError::UngueltigesArgument(_)));
        assert!(fehler.ist_fatal_fuer_instanz());

        // Instanz bleibt defekt
        assert!(buf.pull(SPAN).is_err());
    }

    #[test]
    fn jitter_buffer_cursor_ueberlauf_ist_interner_fehler() {
        let buf = buffer(1);
        buf.push(make_paket(0).mit_timestamp(u32::MAX - 10));
        let fehler = buf.pull(SPAN).unwrap_err();
        assert!(matches!(fehler, VoiceError::InternerFehler(_)));
    }

    #[test]
    fn jitter_buffer_ueberlauf_verwirft_aelteste() {
        let buf = JitterBuffer::new(JitterBufferConfig {
            verzoegerung_frames: 1,
            max_pakete: 3,
        });
        for i in 0..4 {
            buf.push(make_paket(i));
        }
        assert_eq!(buf.fuellstand(), 3);
        assert_eq!(timestamp_von(&buf.pull(SPAN).unwrap()), Some(160));
        assert_eq!(buf.statistik().verloren, 1);
    }

    #[test]
    fn jitter_buffer_dispose_ist_idempotent() {
        let buf = buffer(1);
        buf.push(make_paket(0));
        buf.dispose();
        buf.dispose();

        assert!(buf.ist_freigegeben());
        assert_eq!(buf.fuellstand(), 0);
        assert_eq!(buf.push(make_paket(1)), PushErgebnis::Freigegeben);
        assert_eq!(buf.pull(SPAN).unwrap_err(), VoiceError::Freigegeben);
    }

    #[test]
    fn jitter_buffer_beliebige_reihenfolge_streng_monoton() {
        // Deterministische Permutation (LCG) von 0..200
        let mut seqs: Vec<u32> = (0..200).collect();
        let mut state: u64 = 0x2545_F491_4F6C_DD1D;
        for i in (1..seqs.len()).rev() {
            state = state.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
            let j = (state >> 33) as usize % (i + 1);
            seqs.swap(i, j);
        }

        let buf = JitterBuffer::new(JitterBufferConfig {
            verzoegerung_frames: 1,
            max_pakete: 256,
        });
        for seq in seqs {
            buf.push(make_paket(seq));
        }

        let mut letzte: Option<u32> = None;
        let mut anzahl = 0;
        while let Some(p) = buf.pull(SPAN).unwrap().paket {
            if let Some(vorher) = letzte {
                assert!(p.timestamp > vorher, "Reihenfolge verletzt");
            }
            letzte = Some(p.timestamp);
            anzahl += 1;
        }
        assert_eq!(anzahl, 200);
    }
}
