//! Dispatch core for roadside assistance: admission, candidate matching, the accept race,
//! request lifecycle, notification fan-out and the per-request chat overlay.

pub mod config;
pub mod dispatch;
pub mod error;
pub mod telemetry;
