//! Work-session timer core for the floor operations dashboard.
//!
//! Owns the labor-tracking session state machine, the elapsed-time
//! accounting, the daily hour-cap failsafe, the logout/crash recovery
//! protocol and the KPI/cost rollups over finalized records. Identity,
//! order/stage/batch domain objects and transport are the embedding
//! service's business; they reach this crate as opaque ids.

pub mod config;
pub mod db;
pub mod error;
pub mod guard;
pub mod recovery;
pub mod reports;
pub mod timer;
mod utils;

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;

pub use config::{BillingSettings, ConfigStore, LimitSettings};
pub use db::models::{
    DailyHours, LimitWarning, LogAction, LogCorrection, LogFilter, ManualLogEntry,
    RecoverySnapshot, Role, SessionInfo, SessionState, TimerLog, TimerSession, WarningResolution,
    WorkContext, WorkKind,
};
pub use db::Database;
pub use error::{Error, Result};
pub use guard::{Acknowledgement, LimitGuard, LimitGuardController};
pub use recovery::RecoveryManager;
pub use reports::{ContextRollup, OrderRollup, Reporter, UserDateRollup};
pub use timer::TimerController;

/// The wired-up command/query surface, one handle per concern. All handles
/// share the same database worker and settings store and are cheap to clone
/// into transport handlers.
pub struct Core {
    pub db: Database,
    pub config: Arc<ConfigStore>,
    pub timer: TimerController,
    pub guard: LimitGuard,
    pub recovery: RecoveryManager,
    pub reports: Reporter,
}

/// Open (or create) the data directory, run migrations and wire the
/// controllers. The guard's background loop is not started here; hand
/// `core.guard` to a [`LimitGuardController`] when the service is ready to
/// enforce.
pub fn bootstrap(data_dir: &Path) -> Result<Core> {
    // Reads RUST_LOG; a no-op when the embedding service already installed
    // a logger.
    let _ = env_logger::Builder::from_default_env()
        .filter_level(log::LevelFilter::Info)
        .try_init();

    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;

    let db = Database::new(data_dir.join("floortime.sqlite3"))?;
    let config = Arc::new(ConfigStore::new(data_dir.join("settings.json"))?);

    let timer = TimerController::new(db.clone());
    let guard = LimitGuard::new(db.clone(), timer.clone(), config.clone());
    let recovery = RecoveryManager::new(db.clone());
    let reports = Reporter::new(db.clone(), config.clone());

    log::info!("Timer core ready at {}", data_dir.display());

    Ok(Core {
        db,
        config,
        timer,
        guard,
        recovery,
        reports,
    })
}
