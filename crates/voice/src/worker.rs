//! Periodischer Hintergrund-Worker
//!
//! Fuehrt eine Aufgabe in festem Takt auf einem eigenen Thread aus
//! (Aufraeum-Sweep des Stimmen-Pools, Wiedergabe-Tick). Gestoppt wird
//! explizit ueber [`PeriodischerWorker::stoppen`] oder beim Drop; beide warten,
//! bis der Thread beendet ist.

use crossbeam_channel::{bounded, select, tick, Sender};
use std::ops::ControlFlow;
use std::thread::JoinHandle;
use std::time::Duration;

use crate::error::{VoiceError, VoiceResult};

/// Handle auf einen laufenden periodischen Worker
pub struct PeriodischerWorker {
    name: String,
    stop_tx: Option<Sender<()>>,
    handle: Option<JoinHandle<()>>,
}

impl PeriodischerWorker {
    /// Startet `aufgabe` alle `intervall` auf einem neuen Thread
    ///
    /// Gibt die Aufgabe `ControlFlow::Break` zurueck, beendet sich der Worker
    /// von selbst.
    pub fn starten<F>(name: &str, intervall: Duration, mut aufgabe: F) -> VoiceResult<Self>
    where
        F: FnMut() -> ControlFlow<()> + Send + 'static,
    {
        let (stop_tx, stop_rx) = bounded::<()>(1);
        let thread_name = name.to_string();

        let handle = std::thread::Builder::new()
            .name(thread_name.clone())
            .spawn(move || {
                let ticker = tick(intervall);
                tracing::debug!(worker = %thread_name, ?intervall, "Worker gestartet");
                loop {
                    select! {
                        // Nachricht oder getrennter Sender: beides heisst Stopp
                        recv(stop_rx) -> _ => break,
                        recv(ticker) -> _ => {
                            if aufgabe().is_break() {
                                break;
                            }
                        }
                    }
                }
                tracing::debug!(worker = %thread_name, "Worker beendet");
            })
            .map_err(|e| VoiceError::Worker(format!("{name}: {e}")))?;

        Ok(Self {
            name: name.to_string(),
            stop_tx: Some(stop_tx),
            handle: Some(handle),
        })
    }

    /// Stoppt den Worker und wartet auf das Thread-Ende; idempotent
    pub fn stoppen(&mut self) {
        // Sender droppen weckt den select! auf
        self.stop_tx.take();

        let Some(handle) = self.handle.take() else {
            return;
        };
        if handle.thread().id() == std::thread::current().id() {
            // Aufruf aus dem Worker selbst: Join wuerde sich selbst blockieren
            return;
        }
        if handle.join().is_err() {
            tracing::error!(worker = %self.name, "Worker-Thread ist abgestuerzt");
        }
    }

    /// Laeuft der Worker noch?
    pub fn laeuft(&self) -> bool {
        self.handle.as_ref().is_some_and(|h| !h.is_finished())
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

impl Drop for PeriodischerWorker {
    fn drop(&mut self) {
        self.stoppen();
    }
}
