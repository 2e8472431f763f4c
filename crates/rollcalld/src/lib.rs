//! Rollcall attendance daemon.
//!
//! Enrolls employees from face photos, gates check-in and check-out on a
//! recognized face, and exposes both over D-Bus.

pub mod archive;
pub mod config;
pub mod dbus_interface;
pub mod engine;
pub mod enrollment;
pub mod error;
pub mod ledger;
pub mod service;

#[cfg(test)]
mod testutil;

pub use config::{BusKind, Config, ConfigError};
pub use dbus_interface::{AttendanceBus, BUS_NAME, OBJECT_PATH};
pub use engine::{spawn_engine, EngineHandle};
pub use error::ServiceError;
pub use service::{
    AttendanceAction, AttendanceOutcome, AttendanceService, EmployeeDetail, EnrollRequest, ServiceStatus,
};
