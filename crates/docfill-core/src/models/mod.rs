//! Data models shared across the pipeline.

pub mod config;
pub mod fields;

pub use config::DocfillConfig;
pub use fields::{Field, FieldMapping};
