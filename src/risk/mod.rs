//! Risk engine: per-number exposure tracking and bet admission.

pub mod admission;
pub mod exposure;

pub use admission::{AdmissionController, Assessment, BetRequest, Rejection};
pub use exposure::{ExposureRecord, ExposureTracker};
