//! Diagnostics sink shared by the dnf session and the RPM database repair.
//!
//! The core never logs through a global; it reports through a
//! [`Diagnostics`] handed to it at construction. [`TracingDiagnostics`] is the
//! production sink and forwards to `tracing` under the `yumbootstrap` target.

use std::sync::{Arc, Mutex};

/// Severity of a recorded diagnostic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Level {
    Info,
    Warn,
}

pub trait Diagnostics: Send + Sync {
    fn info(&self, message: &str);
    fn warn(&self, message: &str);
}

/// Forwards diagnostics to `tracing`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingDiagnostics;

impl Diagnostics for TracingDiagnostics {
    fn info(&self, message: &str) {
        tracing::info!(target: "yumbootstrap", "{message}");
    }

    fn warn(&self, message: &str) {
        tracing::warn!(target: "yumbootstrap", "{message}");
    }
}

/// Keeps every diagnostic in memory, for tests and for callers that want to
/// replay them (e.g. the `config` command).
#[derive(Debug, Default)]
pub struct RecordingDiagnostics {
    records: Mutex<Vec<(Level, String)>>,
}

impl RecordingDiagnostics {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn records(&self) -> Vec<(Level, String)> {
        self.records.lock().unwrap_or_else(|e| e.into_inner()).clone()
    }

    pub fn warnings(&self) -> Vec<String> {
        self.records()
            .into_iter()
            .filter(|(level, _)| *level == Level::Warn)
            .map(|(_, msg)| msg)
            .collect()
    }

    fn push(&self, level: Level, message: &str) {
        self.records
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push((level, message.to_string()));
    }
}

impl Diagnostics for RecordingDiagnostics {
    fn info(&self, message: &str) {
        self.push(Level::Info, message);
    }

    fn warn(&self, message: &str) {
        self.push(Level::Warn, message);
    }
}
