//! gablarski-player – Bibliotheks-Root
//!
//! Verdrahtet Stimmen-Pool, Orchestrator und Quellen-Registry zu einem
//! lauffaehigen Dienst und stellt den Einstiegspunkt fuer Tests bereit.
//! Die Netzwerkschicht liefert Pakete ueber [`Player::orchestrator`].

pub mod config;

use anyhow::Result;
use config::PlayerConfig;
use gablarski_observability::{HealthState, MetrikWerte, WiedergabeMetriken};
use gablarski_voice::{PlaybackOrchestrator, SourceRegistry, SpeicherBackend, VoicePool};
use std::sync::Arc;
use std::time::Duration;

/// Haelt den laufenden Player-Zustand zusammen
pub struct Player {
    pub config: PlayerConfig,
    backend: Arc<SpeicherBackend>,
    pool: Arc<VoicePool>,
    orchestrator: Arc<PlaybackOrchestrator>,
    registry: Arc<SourceRegistry>,
    metriken: WiedergabeMetriken,
    health: HealthState,
}

impl Player {
    /// Erstellt alle Komponenten; gestartet wird erst mit
    /// [`wiedergabe_starten`](Self::wiedergabe_starten)
    pub fn neu(config: PlayerConfig) -> Result<Self> {
        config.validieren()?;

        // Ohne Geraete-Backend: Frames zaehlen, Stimmen sofort wieder frei
        let backend = Arc::new(SpeicherBackend::verwerfend(config.stimmen.hardware_limit));
        let pool = VoicePool::new(config.pool_config(), backend.clone());
        let registry = Arc::new(SourceRegistry::neu());
        let orchestrator = Arc::new(
            PlaybackOrchestrator::new(config.orchestrator_config(), pool.clone(), backend.clone())
                .mit_registry(registry.clone()),
        );

        Ok(Self {
            config,
            backend,
            pool,
            orchestrator,
            registry,
            metriken: WiedergabeMetriken::neu()?,
            health: HealthState::neu(),
        })
    }

    /// Eingang fuer die Netzwerkschicht
    pub fn orchestrator(&self) -> &Arc<PlaybackOrchestrator> {
        &self.orchestrator
    }

    pub fn registry(&self) -> &Arc<SourceRegistry> {
        &self.registry
    }

    pub fn pool(&self) -> &Arc<VoicePool> {
        &self.pool
    }

    pub fn backend(&self) -> &Arc<SpeicherBackend> {
        &self.backend
    }

    pub fn metriken(&self) -> &WiedergabeMetriken {
        &self.metriken
    }

    pub fn health(&self) -> &HealthState {
        &self.health
    }

    /// Startet Aufraeum-Sweep und Wiedergabe-Tick
    pub fn wiedergabe_starten(&self) -> Result<()> {
        self.pool.start_sweep()?;
        self.health.sweep_setzen(true);

        self.orchestrator.start(self.config.tick_intervall())?;
        self.health.wiedergabe_setzen(true);
        Ok(())
    }

    /// Fasst die Statistiken von Orchestrator und Pool zusammen
    pub fn metrik_werte(&self) -> MetrikWerte {
        let o = self.orchestrator.statistik();
        let p = self.pool.statistik();
        MetrikWerte {
            aktive_quellen: o.aktive_quellen as u64,
            stimmen_belegt: u64::from(self.pool.belegt()),
            stimmen_kapazitaet: u64::from(self.pool.kapazitaet()),
            pakete_empfangen: o.pakete_empfangen,
            pakete_verspaetet: o.pakete_verspaetet,
            pakete_duplikat: o.pakete_duplikat,
            frames_abgespielt: o.frames_abgespielt,
            frames_fehlend: o.frames_fehlend,
            frames_verdeckt: o.frames_verdeckt,
            frames_verworfen: o.frames_verworfen,
            stimmen_aufgeraeumt: p.aufgeraeumt,
            buffer_neu_erstellt: o.buffer_neu_erstellt,
        }
    }

    pub fn metriken_aktualisieren(&self) {
        self.metriken.aktualisieren(&self.metrik_werte());
        // Health folgt dem tatsaechlichen Zustand der Worker
        self.health.wiedergabe_setzen(self.orchestrator.laeuft());
        self.health.sweep_setzen(self.pool.sweep_laeuft());
    }

    /// Stoppt Tick und Sweep (mit Join) und schliesst alle Stimmen; idempotent
    pub fn herunterfahren(&self) {
        self.health.wiedergabe_setzen(false);
        self.health.sweep_setzen(false);
        self.orchestrator.dispose();
        self.pool.dispose();
        self.metriken.aktualisieren(&self.metrik_werte());
    }

    /// Startet alle Subsysteme und laeuft bis zum Shutdown-Signal
    ///
    /// Reihenfolge:
    /// 1. Aufraeum-Sweep und Wiedergabe-Tick starten
    /// 2. Observability-Server starten (falls aktiviert)
    /// 3. Metriken periodisch nachfuehren
    /// 4. Auf Ctrl-C warten, dann geordnet herunterfahren
    pub async fn starten(self) -> Result<()> {
        tracing::info!(
            span = self.config.wiedergabe.span,
            verzoegerung = self.config.wiedergabe.verzoegerung_frames,
            stimmen = self.config.stimmen.gesamt,
            tick_ms = self.config.wiedergabe.tick_intervall_ms,
            "Player startet"
        );

        self.wiedergabe_starten()?;

        let server = if self.config.observability.aktiviert {
            let adresse: std::net::SocketAddr = self.config.observability_bind_adresse().parse()?;
            let metriken = self.metriken.clone();
            let health = self.health.clone();
            Some(tokio::spawn(async move {
                if let Err(e) =
                    gablarski_observability::observability_server_starten(adresse, metriken, health)
                        .await
                {
                    tracing::error!(fehler = %e, "Observability-Server beendet");
                }
            }))
        } else {
            None
        };

        let mut intervall = tokio::time::interval(Duration::from_millis(
            self.config.observability.aktualisierung_ms.max(1),
        ));

        tracing::info!("Player laeuft. Warte auf Shutdown-Signal (Ctrl-C)...");
        loop {
            tokio::select! {
                _ = intervall.tick() => self.metriken_aktualisieren(),
                signal = tokio::signal::ctrl_c() => {
                    signal?;
                    break;
                }
            }
        }
        tracing::info!("Shutdown-Signal empfangen, Player wird beendet");

        // Join der Worker-Threads blockiert kurz
        let player = Arc::new(self);
        let beenden = Arc::clone(&player);
        tokio::task::spawn_blocking(move || beenden.herunterfahren()).await?;

        if let Some(server) = server {
            server.abort();
        }

        let stat = player.orchestrator.statistik();
        tracing::info!(
            abgespielt = stat.frames_abgespielt,
            fehlend = stat.frames_fehlend,
            verworfen = stat.frames_verworfen,
            "Player beendet"
        );
        Ok(())
    }
}
