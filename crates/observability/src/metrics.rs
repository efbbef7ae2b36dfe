//! Prometheus-kompatible Metriken fuer den Wiedergabekern
//!
//! Registrierte Metriken:
//! - `gablarski_active_sources` – Gauge: Quellen mit Jitter Buffer
//! - `gablarski_voices_in_use` – Gauge: Belegte Kapazitaetseinheiten
//! - `gablarski_voice_capacity` – Gauge: Hardware-Obergrenze
//! - `gablarski_packets_received_total` – Counter: Empfangene Pakete
//! - `gablarski_packets_late_total` – Counter: Verspaetet verworfene Pakete
//! - `gablarski_packets_duplicate_total` – Counter: Verworfene Duplikate
//! - `gablarski_frames_played_total` – Counter: Abgespielte Frames
//! - `gablarski_frames_missing_total` – Counter: Verlorene Frames
//! - `gablarski_frames_concealed_total` – Counter: Ersatz-Frames (Stille/PLC)
//! - `gablarski_frames_dropped_total` – Counter: Frames ohne freie Stimme
//! - `gablarski_voices_reclaimed_total` – Counter: Vom Sweep zurueckgewonnene Stimmen
//! - `gablarski_buffers_recreated_total` – Counter: Neu erstellte Jitter Buffer
//! - `gablarski_frame_loss_ratio` – Histogram: Verlustrate pro Aktualisierung
//!
//! Die Zaehler werden aus Statistik-Snapshots nachgefuehrt; siehe
//! [`WiedergabeMetriken::aktualisieren`].

use anyhow::Result;
use axum::{extract::State, response::IntoResponse, routing::get, Router};
use prometheus::{
    Encoder, Histogram, HistogramOpts, IntCounter, IntGauge, Opts, Registry, TextEncoder,
};
use std::sync::Arc;

/// Werte fuer eine Aktualisierung, typischerweise aus den Statistik-Snapshots
/// von Orchestrator und Stimmen-Pool
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MetrikWerte {
    pub aktive_quellen: u64,
    pub stimmen_belegt: u64,
    pub stimmen_kapazitaet: u64,
    pub pakete_empfangen: u64,
    pub pakete_verspaetet: u64,
    pub pakete_duplikat: u64,
    pub frames_abgespielt: u64,
    pub frames_fehlend: u64,
    pub frames_verdeckt: u64,
    pub frames_verworfen: u64,
    pub stimmen_aufgeraeumt: u64,
    pub buffer_neu_erstellt: u64,
}

/// Alle Gablarski-Prometheus-Metriken
#[derive(Clone)]
pub struct WiedergabeMetriken {
    pub registry: Arc<Registry>,

    // Zustand
    pub active_sources: IntGauge,
    pub voices_in_use: IntGauge,
    pub voice_capacity: IntGauge,

    // Pakete
    pub packets_received: IntCounter,
    pub packets_late: IntCounter,
    pub packets_duplicate: IntCounter,

    // Frames
    pub frames_played: IntCounter,
    pub frames_missing: IntCounter,
    pub frames_concealed: IntCounter,
    pub frames_dropped: IntCounter,

    // Ressourcen
    pub voices_reclaimed: IntCounter,
    pub buffers_recreated: IntCounter,

    pub frame_loss_ratio: Histogram,
}

fn gauge(registry: &Registry, name: &str, hilfe: &str) -> Result<IntGauge> {
    let gauge = IntGauge::with_opts(Opts::new(name, hilfe))?;
    registry.register(Box::new(gauge.clone()))?;
    Ok(gauge)
}

fn counter(registry: &Registry, name: &str, hilfe: &str) -> Result<IntCounter> {
    let counter = IntCounter::with_opts(Opts::new(name, hilfe))?;
    registry.register(Box::new(counter.clone()))?;
    Ok(counter)
}

/// Zieht einen monotonen Counter auf den Snapshot-Wert nach
fn angleichen(counter: &IntCounter, wert: u64) {
    let aktuell = counter.get();
    if wert > aktuell {
        counter.inc_by(wert - aktuell);
    }
}

impl WiedergabeMetriken {
    /// Erstellt und registriert alle Metriken in einer neuen Registry
    pub fn neu() -> Result<Self> {
        let registry = Registry::new();

        // Prozess-Metriken (CPU, RSS, FDs) nur wo procfs existiert
        #[cfg(target_os = "linux")]
        registry.register(Box::new(
            prometheus::process_collector::ProcessCollector::for_self(),
        ))?;

        let frame_loss_ratio = Histogram::with_opts(
            HistogramOpts::new(
                "gablarski_frame_loss_ratio",
                "Anteil verlorener Frames pro Aktualisierung (0.0 bis 1.0)",
            )
            .buckets(vec![0.0, 0.01, 0.02, 0.05, 0.1, 0.2, 0.5, 1.0]),
        )?;
        registry.register(Box::new(frame_loss_ratio.clone()))?;

        Ok(Self {
            active_sources: gauge(
                &registry,
                "gablarski_active_sources",
                "Anzahl Quellen mit aktivem Jitter Buffer",
            )?,
            voices_in_use: gauge(
                &registry,
                "gablarski_voices_in_use",
                "Belegte Stimmen-Kapazitaet (Mono 1, Stereo 2)",
            )?,
            voice_capacity: gauge(
                &registry,
                "gablarski_voice_capacity",
                "Hardware-Obergrenze des Stimmen-Pools",
            )?,
            packets_received: counter(
                &registry,
                "gablarski_packets_received_total",
                "Gesamtanzahl empfangener Audio-Pakete",
            )?,
            packets_late: counter(
                &registry,
                "gablarski_packets_late_total",
                "Verspaetet angekommene und verworfene Pakete",
            )?,
            packets_duplicate: counter(
                &registry,
                "gablarski_packets_duplicate_total",
                "Verworfene Duplikate",
            )?,
            frames_played: counter(
                &registry,
                "gablarski_frames_played_total",
                "An Stimmen eingereichte Frames",
            )?,
            frames_missing: counter(
                &registry,
                "gablarski_frames_missing_total",
                "Vom Jitter Buffer als verloren gemeldete Frames",
            )?,
            frames_concealed: counter(
                &registry,
                "gablarski_frames_concealed_total",
                "Eingereichte Ersatz-Frames (Stille oder PLC)",
            )?,
            frames_dropped: counter(
                &registry,
                "gablarski_frames_dropped_total",
                "Verworfene Frames mangels freier Stimme",
            )?,
            voices_reclaimed: counter(
                &registry,
                "gablarski_voices_reclaimed_total",
                "Vom Aufraeum-Sweep zurueckgewonnene Stimmen",
            )?,
            buffers_recreated: counter(
                &registry,
                "gablarski_buffers_recreated_total",
                "Nach einem Fehler neu erstellte Jitter Buffer",
            )?,
            frame_loss_ratio,
            registry: Arc::new(registry),
        })
    }

    /// Uebernimmt einen Snapshot
    ///
    /// Gauges werden gesetzt, Counter auf den Snapshot-Wert nachgezogen. Die
    /// Verlustrate wird aus den Zuwaechsen seit der letzten Aktualisierung
    /// berechnet.
    pub fn aktualisieren(&self, werte: &MetrikWerte) {
        let abgespielt_vorher = self.frames_played.get();
        let fehlend_vorher = self.frames_missing.get();

        self.active_sources.set(werte.aktive_quellen as i64);
        self.voices_in_use.set(werte.stimmen_belegt as i64);
        self.voice_capacity.set(werte.stimmen_kapazitaet as i64);

        angleichen(&self.packets_received, werte.pakete_empfangen);
        angleichen(&self.packets_late, werte.pakete_verspaetet);
        angleichen(&self.packets_duplicate, werte.pakete_duplikat);
        angleichen(&self.frames_played, werte.frames_abgespielt);
        angleichen(&self.frames_missing, werte.frames_fehlend);
        angleichen(&self.frames_concealed, werte.frames_verdeckt);
        angleichen(&self.frames_dropped, werte.frames_verworfen);
        angleichen(&self.voices_reclaimed, werte.stimmen_aufgeraeumt);
        angleichen(&self.buffers_recreated, werte.buffer_neu_erstellt);

        let abgespielt = self.frames_played.get() - abgespielt_vorher;
        let fehlend = self.frames_missing.get() - fehlend_vorher;
        if abgespielt + fehlend > 0 {
            self.frame_loss_ratio
                .observe(fehlend as f64 / (abgespielt + fehlend) as f64);
        }
    }

    /// Exportiert alle Metriken im Prometheus-Textformat
    pub fn exportieren(&self) -> Result<String> {
        let encoder = TextEncoder::new();
        let metric_families = self.registry.gather();
        let mut buffer = Vec::new();
        encoder.encode(&metric_families, &mut buffer)?;
        Ok(String::from_utf8(buffer)?)
    }
}

/// Axum-Router fuer den `/metrics`-Endpunkt
pub fn metrics_router(metriken: WiedergabeMetriken) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .with_state(metriken)
}

async fn metrics_handler(State(metriken): State<WiedergabeMetriken>) -> impl IntoResponse {
    match metriken.exportieren() {
        Ok(text) => (
            axum::http::StatusCode::OK,
            [(
                axum::http::header::CONTENT_TYPE,
                "text/plain; version=0.0.4",
            )],
            text,
        )
            .into_response(),
        Err(err) => {
            tracing::error!("Metriken-Export fehlgeschlagen: {err}");
            axum::http::StatusCode::INTERNAL_SERVER_ERROR.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn metriken_erstellen_erfolgreich() {
        let metriken = WiedergabeMetriken::neu().unwrap();
        assert!(!metriken.registry.gather().is_empty());
    }

    #[test]
    fn aktualisieren_setzt_gauges_und_counter() {
        let metriken = WiedergabeMetriken::neu().unwrap();
        metriken.aktualisieren(&MetrikWerte {
            aktive_quellen: 3,
            stimmen_belegt: 4,
            stimmen_kapazitaet: 16,
            frames_abgespielt: 90,
            frames_fehlend: 10,
            ..Default::default()
        });

        assert_eq!(metriken.active_sources.get(), 3);
        assert_eq!(metriken.voices_in_use.get(), 4);
        assert_eq!(metriken.frames_played.get(), 90);
        assert_eq!(metriken.frame_loss_ratio.get_sample_count(), 1);
        assert!((metriken.frame_loss_ratio.get_sample_sum() - 0.1).abs() < 1e-9);
    }

    #[test]
    fn counter_laufen_nie_rueckwaerts() {
        let metriken = WiedergabeMetriken::neu().unwrap();
        metriken.aktualisieren(&MetrikWerte {
            frames_abgespielt: 50,
            ..Default::default()
        });
        metriken.aktualisieren(&MetrikWerte {
            frames_abgespielt: 20,
            ..Default::default()
        });
        assert_eq!(metriken.frames_played.get(), 50);
    }

    #[test]
    fn ohne_zuwachs_keine_verlust_beobachtung() {
        let metriken = WiedergabeMetriken::neu().unwrap();
        metriken.aktualisieren(&MetrikWerte::default());
        assert_eq!(metriken.frame_loss_ratio.get_sample_count(), 0);
    }

    #[test]
    fn metriken_export_prometheus_format() {
        let metriken = WiedergabeMetriken::neu().unwrap();
        metriken.active_sources.set(5);
        metriken.frames_played.inc();

        let output = metriken.exportieren().unwrap();
        assert!(output.contains("gablarski_active_sources 5"));
        assert!(output.contains("gablarski_frames_played_total 1"));
        assert!(output.contains("# HELP"));
        assert!(output.contains("# TYPE"));
    }

    #[test]
    fn alle_metriken_in_registry_registriert() {
        let metriken = WiedergabeMetriken::neu().unwrap();
        let families = metriken.registry.gather();
        let namen: Vec<&str> = families.iter().map(|f| f.get_name()).collect();

        for name in [
            "gablarski_active_sources",
            "gablarski_voices_in_use",
            "gablarski_voice_capacity",
            "gablarski_packets_received_total",
            "gablarski_packets_late_total",
            "gablarski_packets_duplicate_total",
            "gablarski_frames_played_total",
            "gablarski_frames_missing_total",
            "gablarski_frames_concealed_total",
            "gablarski_frames_dropped_total",
            "gablarski_voices_reclaimed_total",
            "gablarski_buffers_recreated_total",
            "gablarski_frame_loss_ratio",
        ] {
            assert!(namen.contains(&name), "{name} fehlt");
        }
    }
}
