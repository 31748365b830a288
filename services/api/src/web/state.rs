//! services/api/src/web/state.rs
//!
//! Defines the application's shared state.

use crate::config::Config;
use attendance_core::{
    Clock, DatabaseService, ReportAggregator, ScanNotifier, ScanRecorder, SessionIssuer,
};
use std::sync::Arc;

//=========================================================================================
// AppState (Shared Across All Requests)
//=========================================================================================

/// The shared application state, created once at startup and passed to all handlers.
#[derive(Clone)]
pub struct AppState {
    pub db: Arc<dyn DatabaseService>,
    pub config: Arc<Config>,
    pub clock: Arc<dyn Clock>,
    pub notifier: Arc<dyn ScanNotifier>,
    pub issuer: Arc<SessionIssuer>,
    pub recorder: Arc<ScanRecorder>,
    pub reports: Arc<ReportAggregator>,
}

impl AppState {
    /// Wires the protocol services onto the given adapters.
    pub fn new(
        db: Arc<dyn DatabaseService>,
        config: Arc<Config>,
        clock: Arc<dyn Clock>,
        notifier: Arc<dyn ScanNotifier>,
    ) -> Self {
        let issuer = Arc::new(SessionIssuer::new(db.clone(), clock.clone(), config.session_validity));
        let recorder = Arc::new(ScanRecorder::new(db.clone(), clock.clone(), notifier.clone()));
        let reports = Arc::new(ReportAggregator::new(db.clone()));
        Self {
            db,
            config,
            clock,
            notifier,
            issuer,
            recorder,
            reports,
        }
    }
}
