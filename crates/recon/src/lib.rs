//! `ratecheck-recon`: shipment vs. carrier rate-card reconciliation engine.
//!
//! Pure engine crate: receives pre-loaded shipment and rate tables plus rule
//! books, returns one diagnosis per shipment. No CLI or file IO.

pub mod aggregate;
pub mod classify;
pub mod condition;
pub mod config;
pub mod discrepancy;
pub mod engine;
pub mod error;
pub mod evidence;
pub mod geo;
pub mod matcher;
pub mod model;
pub mod normalize;
pub mod output;
pub mod ratecard;
pub mod validity;

pub use condition::ConditionBook;
pub use config::{ReconConfig, RuleSet};
pub use engine::{load_csv_reader, load_csv_table, run};
pub use error::ReconError;
pub use geo::GeoRuleBook;
pub use model::{Cell, ReconInput, ReconResult, Table};
