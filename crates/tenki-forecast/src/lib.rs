//! Regional weather forecasts for Tenki.
//!
//! Resolves fine forecast areas to their office's forecast document,
//! extracts per-day weather and temperatures, and keeps a SQLite history
//! keyed by (region, date).

pub mod catalog;
pub mod error;
pub mod pipeline;
pub mod resolver;
pub mod store;
pub mod types;

pub use catalog::{CatalogSource, RegionCatalog};
pub use error::ForecastError;
pub use pipeline::{
    lookup_history, DisplayState, HistoryLookup, PersistFailure, Pipeline, PipelineMessage,
    Selection, SelectionOutcome, SelectionPhase,
};
pub use resolver::ForecastResolver;
pub use store::ForecastStore;
pub use types::*;
