//! Health-Check-Endpunkt fuer den Player
//!
//! Endpoint: `GET /health`
//! Response: JSON mit Status, Version, Uptime und Wiedergabe-Status

use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Json, Router};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

/// Status des Health-Checks
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Degraded,
    Unhealthy,
}

/// Antwort des Health-Check-Endpunkts
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: HealthStatus,
    pub version: String,
    pub uptime_seconds: u64,
    /// Laeuft der Wiedergabe-Tick?
    pub wiedergabe_aktiv: bool,
    /// Laeuft der Aufraeum-Sweep des Stimmen-Pools?
    pub sweep_aktiv: bool,
}

/// Geteilter Zustand fuer den Health-Check-Handler
///
/// Der Player setzt die Flags beim Start und beim Herunterfahren.
#[derive(Clone)]
pub struct HealthState {
    start_time: Arc<Instant>,
    wiedergabe_aktiv: Arc<AtomicBool>,
    sweep_aktiv: Arc<AtomicBool>,
}

impl HealthState {
    pub fn neu() -> Self {
        Self {
            start_time: Arc::new(Instant::now()),
            wiedergabe_aktiv: Arc::new(AtomicBool::new(false)),
            sweep_aktiv: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    pub fn wiedergabe_setzen(&self, aktiv: bool) {
        self.wiedergabe_aktiv.store(aktiv, Ordering::Relaxed);
    }

    pub fn sweep_setzen(&self, aktiv: bool) {
        self.sweep_aktiv.store(aktiv, Ordering::Relaxed);
    }

    /// Tick aus: unhealthy. Nur Sweep aus: degraded (Stimmen werden nicht
    /// mehr zurueckgewonnen, Wiedergabe laeuft aber).
    pub fn status(&self) -> HealthStatus {
        match (
            self.wiedergabe_aktiv.load(Ordering::Relaxed),
            self.sweep_aktiv.load(Ordering::Relaxed),
        ) {
            (true, true) => HealthStatus::Healthy,
            (true, false) => HealthStatus::Degraded,
            (false, _) => HealthStatus::Unhealthy,
        }
    }

    pub fn antwort(&self) -> HealthResponse {
        HealthResponse {
            status: self.status(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.uptime_seconds(),
            wiedergabe_aktiv: self.wiedergabe_aktiv.load(Ordering::Relaxed),
            sweep_aktiv: self.sweep_aktiv.load(Ordering::Relaxed),
        }
    }
}

impl Default for HealthState {
    fn default() -> Self {
        Self::neu()
    }
}

/// Axum-Router fuer den `/health`-Endpunkt
pub fn health_router(state: HealthState) -> Router {
    Router::new()
        .route("/health", get(health_handler))
        .with_state(state)
}

/// `GET /health` – gibt den Wiedergabestatus zurueck
async fn health_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let response = state.antwort();
    let http_status = match response.status {
        // 200 auch bei degraded, die Probe soll nicht fehlschlagen
        HealthStatus::Healthy | HealthStatus::Degraded => StatusCode::OK,
        HealthStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };
    (http_status, Json(response))
}
