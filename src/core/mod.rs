//! Core module - fleet registry, reconciliation, layout, sync and cleanup

mod error;
mod launcher;
mod manager;
mod reconcile;
mod registry;
mod resolver;
mod scanner;
pub mod layout;
pub mod monitor;
pub mod profile;
pub mod settings;
pub mod sync;

pub use error::FleetError;
pub use launcher::LaunchOutcome;
pub use manager::FleetManager;
pub use registry::ProfileRecord;
pub use resolver::WindowProbe;
pub use settings::Settings;
pub use sync::SyncStatus;
