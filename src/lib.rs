//! Risk scoring and failure cost projection for digital twin telemetry.
//!
//! A pass runs leaf-first: [`telemetry`] normalizes a group's raw records
//! into a numeric feature matrix, [`scorer`] turns each unit's rows into
//! z-score anomaly fractions and an aggregate risk, and [`economics`] plus
//! [`severity`] map that risk to money, downtime and a maintenance
//! narrative. [`engine`] ties the stages together over a [`source`].

pub mod anomaly;
pub mod classifier;
pub mod config;
pub mod economics;
pub mod engine;
pub mod error;
pub mod scorer;
pub mod severity;
pub mod source;
pub mod telemetry;
