//! Stimmen-Pool – verteilt begrenzte Hardware-Stimmen auf logische Sprecher
//!
//! Jede Quelle (Owner) haelt hoechstens eine Stimme. Mono kostet eine,
//! Stereo zwei Kapazitaetseinheiten; die Summe ueberschreitet nie
//! `total_voices`. Ist keine Kapazitaet frei, liefert
//! [`VoicePool::request_source`] `None` – der Aufrufer verwirft dann den Frame.
//!
//! ## Rueckgewinnung
//! Ein periodischer Sweep ([`VoicePool::start_sweep`]) fragt jede zugewiesene
//! Stimme beim Backend ab und gibt sie frei, sobald nichts mehr aussteht und
//! sie nicht mehr spielt. Freigegebene Handles bleiben geoeffnet und werden
//! bei der naechsten passenden Anforderung wiederverwendet.
//!
//! ## Sperren
//! Ein `parking_lot::RwLock`. Bekannte Owner werden unter einer Lese-Sperre
//! bedient (Aktivitaet und Zaehler sind atomar); nur die Neuzuweisung nimmt
//! eine upgradebare Lese-Sperre und wechselt erst nach erneuter Pruefung in
//! den Schreibmodus.
//!
//! ## Fairness
//! Erster freier Slot gewinnt, keine Prioritaeten, keine Verdraengung.

use gablarski_core::types::{SourceId, VoiceHandle};
use parking_lot::{Mutex, RwLock, RwLockUpgradableReadGuard};
use std::collections::HashMap;
use std::ops::ControlFlow;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::backend::{AudioBackend, VoiceConfig};
use crate::error::{VoiceError, VoiceResult};
use crate::worker::PeriodischerWorker;

// ---------------------------------------------------------------------------
// Konfiguration
// ---------------------------------------------------------------------------

/// Konfiguration fuer den Stimmen-Pool
#[derive(Debug, Clone)]
pub struct VoicePoolConfig {
    /// Hardware-Obergrenze in Kapazitaetseinheiten (Mono = 1, Stereo = 2)
    pub total_voices: u32,
    /// Intervall des Aufraeum-Sweeps
    pub sweep_intervall: Duration,
}

impl Default for VoicePoolConfig {
    fn default() -> Self {
        Self {
            total_voices: 16,
            sweep_intervall: Duration::from_millis(100),
        }
    }
}

// ---------------------------------------------------------------------------
// Zuweisungen & Statistiken
// ---------------------------------------------------------------------------

/// Snapshot einer Stimmen-Zuweisung
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct VoiceAssignment {
    pub voice: VoiceHandle,
    pub owner: SourceId,
    pub stereo: bool,
    pub letzte_aktivitaet: Instant,
}

/// Statistiken des Stimmen-Pools (Snapshot)
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PoolStatistik {
    /// Anforderungen gesamt
    pub angefordert: u64,
    /// Anforderungen, die eine bestehende Zuweisung bekamen
    pub wiederverwendet: u64,
    /// Neue Zuweisungen
    pub zugewiesen: u64,
    /// Anforderungen ohne freie Kapazitaet
    pub abgelehnt: u64,
    /// Explizit freigegebene Stimmen
    pub freigegeben: u64,
    /// Vom Sweep zurueckgewonnene Stimmen
    pub aufgeraeumt: u64,
    /// Beim Backend geoeffnete Handles
    pub geoeffnet: u64,
}

#[derive(Default)]
struct Zaehler {
    angefordert: AtomicU64,
    wiederverwendet: AtomicU64,
    zugewiesen: AtomicU64,
    abgelehnt: AtomicU64,
    freigegeben: AtomicU64,
    aufgeraeumt: AtomicU64,
    geoeffnet: AtomicU64,
}

impl Zaehler {
    fn erhoehen(zaehler: &AtomicU64) {
        zaehler.fetch_add(1, Ordering::Relaxed);
    }

    fn snapshot(&self) -> PoolStatistik {
        PoolStatistik {
            angefordert: self.angefordert.load(Ordering::Relaxed),
            wiederverwendet: self.wiederverwendet.load(Ordering::Relaxed),
            zugewiesen: self.zugewiesen.load(Ordering::Relaxed),
            abgelehnt: self.abgelehnt.load(Ordering::Relaxed),
            freigegeben: self.freigegeben.load(Ordering::Relaxed),
            aufgeraeumt: self.aufgeraeumt.load(Ordering::Relaxed),
            geoeffnet: self.geoeffnet.load(Ordering::Relaxed),
        }
    }
}

struct Eintrag {
    voice: VoiceHandle,
    stereo: bool,
    /// Nanosekunden seit Pool-Start
    aktivitaet_ns: AtomicU64,
}

struct PoolZustand {
    /// Owner -> Zuweisung
    zuweisungen: HashMap<SourceId, Eintrag>,
    /// Handle -> Owner (hoechstens eine Zuweisung pro Handle)
    besitzer: HashMap<VoiceHandle, SourceId>,
    /// Geoeffnete, aber unbelegte Handles in Freigabe-Reihenfolge
    frei: Vec<(VoiceHandle, VoiceConfig)>,
    /// Belegte Kapazitaetseinheiten
    belegt: u32,
    freigegeben: bool,
}

impl PoolZustand {
    fn frei_einheiten(&self) -> u32 {
        self.frei.iter().map(|(_, c)| c.kosten()).sum()
    }

    /// Loest die Zuweisung eines Owners; das Handle wandert in die Freiliste
    fn loesen(&mut self, owner: SourceId) -> Option<VoiceHandle> {
        let eintrag = self.zuweisungen.remove(&owner)?;
        self.besitzer.remove(&eintrag.voice);
        let config = VoiceConfig {
            stereo: eintrag.stereo,
        };
        self.belegt = self.belegt.saturating_sub(config.kosten());
        self.frei.push((eintrag.voice, config));
        Some(eintrag.voice)
    }
}

// ---------------------------------------------------------------------------
// VoicePool
// ---------------------------------------------------------------------------

/// Begrenzter Pool von Hardware-Wiedergabestimmen
pub struct VoicePool {
    config: VoicePoolConfig,
    backend: Arc<dyn AudioBackend>,
    zustand: RwLock<PoolZustand>,
    zaehler: Zaehler,
    worker: Mutex<Option<PeriodischerWorker>>,
    start: Instant,
}

impl VoicePool {
    /// Erstellt einen neuen Pool (Sweep noch nicht gestartet)
    pub fn new(config: VoicePoolConfig, backend: Arc<dyn AudioBackend>) -> Arc<Self> {
        tracing::info!(
            total_voices = config.total_voices,
            sweep_ms = config.sweep_intervall.as_millis() as u64,
            "Stimmen-Pool erstellt"
        );
        Arc::new(Self {
            config,
            backend,
            zustand: RwLock::new(PoolZustand {
                zuweisungen: HashMap::new(),
                besitzer: HashMap::new(),
                frei: Vec::new(),
                belegt: 0,
                freigegeben: false,
            }),
            zaehler: Zaehler::default(),
            worker: Mutex::new(None),
            start: Instant::now(),
        })
    }

    fn jetzt_ns(&self) -> u64 {
        self.start.elapsed().as_nanos() as u64
    }

    /// Liefert die Stimme fuer `owner`, belegt bei Bedarf eine neue
    ///
    /// `None` bedeutet: keine Kapazitaet frei (oder Pool freigegeben). Das ist
    /// kein Fehler; der Aufrufer verwirft oder verzoegert das Audio.
    pub fn request_source(&self, owner: SourceId, stereo: bool) -> Option<VoiceHandle> {
        Zaehler::erhoehen(&self.zaehler.angefordert);

        // Schneller Pfad: bekannter Owner, nur Lese-Sperre
        {
            let z = self.zustand.read();
            if z.freigegeben {
                return None;
            }
            if let Some(eintrag) = z.zuweisungen.get(&owner) {
                if eintrag.stereo == stereo {
                    eintrag.aktivitaet_ns.store(self.jetzt_ns(), Ordering::Relaxed);
                    Zaehler::erhoehen(&self.zaehler.wiederverwendet);
                    return Some(eintrag.voice);
                }
            }
        }

        let z = self.zustand.upgradable_read();
        if z.freigegeben {
            return None;
        }
        // Erneut pruefen: ein anderer Thread kann inzwischen zugewiesen haben
        if let Some(eintrag) = z.zuweisungen.get(&owner) {
            if eintrag.stereo == stereo {
                eintrag.aktivitaet_ns.store(self.jetzt_ns(), Ordering::Relaxed);
                Zaehler::erhoehen(&self.zaehler.wiederverwendet);
                return Some(eintrag.voice);
            }
        }

        let mut z = RwLockUpgradableReadGuard::upgrade(z);
        self.zuweisen(&mut z, owner, stereo)
    }

    fn zuweisen(&self, z: &mut PoolZustand, owner: SourceId, stereo: bool) -> Option<VoiceHandle> {
        let config = VoiceConfig { stereo };
        let kosten = config.kosten();
        let alte_kosten = z
            .zuweisungen
            .get(&owner)
            .map_or(0, |e| VoiceConfig { stereo: e.stereo }.kosten());

        // Passt das neue Layout nicht, behaelt der Owner seine bisherige Stimme
        if z.belegt.saturating_sub(alte_kosten) + kosten > self.config.total_voices {
            Zaehler::erhoehen(&self.zaehler.abgelehnt);
            tracing::debug!(
                owner = %owner,
                belegt = z.belegt,
                kapazitaet = self.config.total_voices,
                "Keine Stimme verfuegbar"
            );
            return None;
        }

        // Kanal-Layout gewechselt: alte Stimme zurueckgeben
        if let Some(alt) = z.loesen(owner) {
            tracing::debug!(owner = %owner, voice = %alt, stereo, "Layout-Wechsel, alte Stimme freigegeben");
        }

        let voice = match z.frei.iter().position(|(_, c)| *c == config) {
            Some(pos) => z.frei.remove(pos).0,
            None => {
                // Hardware-Grenze auch fuer geoeffnete, unbelegte Handles einhalten
                while z.belegt + z.frei_einheiten() + kosten > self.config.total_voices
                    && !z.frei.is_empty()
                {
                    let (alt, _) = z.frei.remove(0);
                    self.backend.close(alt);
                }
                match self.backend.open(&config) {
                    Ok(voice) => {
                        Zaehler::erhoehen(&self.zaehler.geoeffnet);
                        voice
                    }
                    Err(e) => {
                        Zaehler::erhoehen(&self.zaehler.abgelehnt);
                        tracing::warn!(owner = %owner, fehler = %e, "Backend konnte keine Stimme oeffnen");
                        return None;
                    }
                }
            }
        };

        z.belegt += kosten;
        z.besitzer.insert(voice, owner);
        z.zuweisungen.insert(
            owner,
            Eintrag {
                voice,
                stereo,
                aktivitaet_ns: AtomicU64::new(self.jetzt_ns()),
            },
        );
        Zaehler::erhoehen(&self.zaehler.zugewiesen);
        tracing::debug!(owner = %owner, voice = %voice, stereo, belegt = z.belegt, "Stimme zugewiesen");
        Some(voice)
    }

    /// Fordert die Stimme fuer `owner` an und ruft `f` unter der Lese-Sperre
    ///
    /// Solange `f` laeuft, kann der Sweep die Stimme nicht zurueckgewinnen.
    /// Damit landet kein Frame auf einem Handle, das schon in der Freiliste
    /// liegt. `None` wie bei [`request_source`](Self::request_source).
    pub fn mit_stimme<R>(
        &self,
        owner: SourceId,
        stereo: bool,
        f: impl FnOnce(VoiceHandle) -> R,
    ) -> Option<R> {
        for _ in 0..2 {
            let voice = self.request_source(owner, stereo)?;
            let z = self.zustand.read();
            if z.freigegeben {
                return None;
            }
            if z.besitzer.get(&voice) == Some(&owner) {
                return Some(f(voice));
            }
            // Zwischen Anforderung und Sperre zurueckgewonnen
            tracing::trace!(owner = %owner, voice = %voice, "Stimme zwischenzeitlich zurueckgewonnen");
        }
        None
    }

    /// Gibt eine Stimme zurueck in den Pool; idempotent
    pub fn free_source(&self, voice: VoiceHandle) {
        let mut z = self.zustand.write();
        if z.freigegeben {
            return;
        }
        if let Some(owner) = z.besitzer.get(&voice).copied() {
            z.loesen(owner);
            Zaehler::erhoehen(&self.zaehler.freigegeben);
            tracing::debug!(owner = %owner, voice = %voice, "Stimme freigegeben");
        }
    }

    /// Ein Aufraeum-Durchlauf; gibt die Anzahl zurueckgewonnener Stimmen zurueck
    ///
    /// Die erste Runde Backend-Abfragen laeuft ohne gehaltene Sperre. Stimmen,
    /// die waehrenddessen erneut angefordert oder befuellt wurden, bleiben
    /// zugewiesen.
    pub fn reclaim(&self) -> usize {
        let stichtag = self.jetzt_ns();
        let kandidaten: Vec<VoiceHandle> = {
            let z = self.zustand.read();
            if z.freigegeben {
                return 0;
            }
            z.besitzer.keys().copied().collect()
        };

        let mut fertig = Vec::new();
        let mut defekt = Vec::new();
        for voice in kandidaten {
            match self.backend.query(voice) {
                Ok(zustand) if zustand.ist_fertig() => fertig.push(voice),
                Ok(_) => {}
                Err(e) => {
                    tracing::warn!(voice = %voice, fehler = %e, "Stimmen-Abfrage fehlgeschlagen, Stimme wird verworfen");
                    defekt.push(voice);
                }
            }
        }
        if fertig.is_empty() && defekt.is_empty() {
            return 0;
        }

        let mut z = self.zustand.write();
        if z.freigegeben {
            return 0;
        }

        let mut zurueckgewonnen = 0;
        for voice in fertig {
            let Some(owner) = z.besitzer.get(&voice).copied() else {
                continue;
            };
            let erneuert = z
                .zuweisungen
                .get(&owner)
                .is_some_and(|e| e.aktivitaet_ns.load(Ordering::Relaxed) >= stichtag);
            if erneuert {
                continue;
            }
            // Unter der Schreib-Sperre laeuft kein Einreichen; neu abfragen
            if !self.backend.query(voice).is_ok_and(|s| s.ist_fertig()) {
                continue;
            }
            z.loesen(owner);
            zurueckgewonnen += 1;
            tracing::trace!(owner = %owner, voice = %voice, "Stimme zurueckgewonnen");
        }

        for voice in defekt {
            if let Some(owner) = z.besitzer.get(&voice).copied() {
                z.loesen(owner);
            }
            z.frei.retain(|(h, _)| *h != voice);
            self.backend.close(voice);
        }

        self.zaehler
            .aufgeraeumt
            .fetch_add(zurueckgewonnen as u64, Ordering::Relaxed);
        zurueckgewonnen
    }

    /// Startet den periodischen Aufraeum-Sweep; mehrfacher Aufruf ist ein No-Op
    pub fn start_sweep(self: &Arc<Self>) -> VoiceResult<()> {
        let mut slot = self.worker.lock();
        if slot.is_some() {
            return Ok(());
        }
        if self.ist_freigegeben() {
            return Err(VoiceError::Freigegeben);
        }

        let pool = Arc::downgrade(self);
        let worker = PeriodischerWorker::starten(
            "gablarski-voice-sweep",
            self.config.sweep_intervall,
            move || match pool.upgrade() {
                Some(pool) => {
                    pool.reclaim();
                    ControlFlow::Continue(())
                }
                None => ControlFlow::Break(()),
            },
        )?;
        *slot = Some(worker);
        Ok(())
    }

    /// Stoppt den Sweep (mit Join), loest alle Zuweisungen und schliesst alle
    /// Handles; idempotent
    pub fn dispose(&self) {
        if let Some(mut worker) = self.worker.lock().take() {
            worker.stoppen();
        }

        let mut z = self.zustand.write();
        if z.freigegeben {
            return;
        }
        z.freigegeben = true;

        let handles: Vec<VoiceHandle> = z
            .besitzer
            .keys()
            .copied()
            .chain(z.frei.iter().map(|(h, _)| *h))
            .collect();
        for voice in &handles {
            self.backend.close(*voice);
        }
        z.zuweisungen.clear();
        z.besitzer.clear();
        z.frei.clear();
        z.belegt = 0;

        tracing::info!(geschlossen = handles.len(), "Stimmen-Pool freigegeben");
    }

    /// Snapshot der Zuweisung eines Owners
    pub fn zuweisung(&self, owner: SourceId) -> Option<VoiceAssignment> {
        let z = self.zustand.read();
        z.zuweisungen.get(&owner).map(|e| VoiceAssignment {
            voice: e.voice,
            owner,
            stereo: e.stereo,
            letzte_aktivitaet: self.start
                + Duration::from_nanos(e.aktivitaet_ns.load(Ordering::Relaxed)),
        })
    }

    /// Anzahl aktuell zugewiesener Stimmen
    pub fn aktive_zuweisungen(&self) -> usize {
        self.zustand.read().zuweisungen.len()
    }

    /// Belegte Kapazitaetseinheiten
    pub fn belegt(&self) -> u32 {
        self.zustand.read().belegt
    }

    pub fn kapazitaet(&self) -> u32 {
        self.config.total_voices
    }

    pub fn ist_freigegeben(&self) -> bool {
        self.zustand.read().freigegeben
    }

    pub fn sweep_laeuft(&self) -> bool {
        self.worker.lock().as_ref().is_some_and(|w| w.laeuft())
    }

    /// Snapshot der Statistiken
    pub fn statistik(&self) -> PoolStatistik {
        self.zaehler.snapshot()
    }
}

impl Drop for VoicePool {
    fn drop(&mut self) {
        self.dispose();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
