//! Selection and history orchestration.
//!
//! A region selection resolves the forecast once and persists every returned
//! day; history lookups read the store only. Every failure is converted into
//! an outcome value here, nothing below this layer reaches the caller as a panic
//! or an unhandled error.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::mpsc::Sender;
use std::sync::Arc;

use chrono::{NaiveDate, Utc};
use parking_lot::RwLock;
use tracing::instrument;

use crate::catalog::{CatalogSource, RegionCatalog};
use crate::error::ForecastError;
use crate::resolver::ForecastResolver;
use crate::store::ForecastStore;
use crate::types::{DayForecast, StoredForecastRow, ZoneGroup};

/// A day whose forecast was fetched but could not be written to the store.
#[derive(Debug)]
pub struct PersistFailure {
    pub date: NaiveDate,
    pub error: ForecastError,
}

/// Result of one region selection.
#[derive(Debug)]
pub enum SelectionOutcome {
    /// Fetched and every day persisted
    Succeeded { forecasts: Vec<DayForecast> },
    /// Fetched, but some days failed to persist; the forecasts are still shown
    Partial {
        forecasts: Vec<DayForecast>,
        failures: Vec<PersistFailure>,
    },
    /// Nothing fetched; the store was not touched
    Failed { error: ForecastError },
}

impl SelectionOutcome {
    /// Forecasts to display, empty when the fetch failed.
    pub fn forecasts(&self) -> &[DayForecast] {
        match self {
            Self::Succeeded { forecasts } | Self::Partial { forecasts, .. } => forecasts,
            Self::Failed { .. } => &[],
        }
    }

    pub fn is_failed(&self) -> bool {
        matches!(self, Self::Failed { .. })
    }

    /// Message for the user when something went wrong.
    pub fn user_message(&self) -> Option<String> {
        match self {
            Self::Succeeded { .. } => None,
            Self::Partial { failures, .. } => Some(format!(
                "Forecast shown, but {} day(s) could not be saved to history.",
                failures.len()
            )),
            Self::Failed { error } => Some(error.user_message()),
        }
    }
}

/// A completed selection, tagged with the ticket it was started under.
#[derive(Debug)]
pub struct Selection {
    pub ticket: u64,
    pub region_id: String,
    pub region_name: String,
    pub outcome: SelectionOutcome,
}

/// Result of a history lookup. Absence is not an error.
#[derive(Debug)]
pub enum HistoryLookup {
    Found(StoredForecastRow),
    NotFound,
    Error(ForecastError),
}

/// Messages sent from background selections back to the caller's thread.
#[derive(Debug)]
pub enum PipelineMessage {
    SelectionDone(Selection),
}

pub struct Pipeline {
    catalog: RwLock<Arc<RegionCatalog>>,
    resolver: ForecastResolver,
    store: Arc<ForecastStore>,
    tickets: AtomicU64,
}

impl Pipeline {
    pub fn new(catalog: RegionCatalog, resolver: ForecastResolver, store: Arc<ForecastStore>) -> Self {
        Self {
            catalog: RwLock::new(Arc::new(catalog)),
            resolver,
            store,
            tickets: AtomicU64::new(0),
        }
    }

    /// The catalog currently in use.
    pub fn catalog(&self) -> Arc<RegionCatalog> {
        self.catalog.read().clone()
    }

    pub fn store(&self) -> &ForecastStore {
        &self.store
    }

    /// Replace the catalog. Selections already running keep the old one.
    pub async fn reload_catalog(&self, source: &CatalogSource) -> Result<(), ForecastError> {
        let catalog = RegionCatalog::load(self.resolver.client(), source).await?;
        *self.catalog.write() = Arc::new(catalog);
        tracing::info!("Region catalog reloaded");
        Ok(())
    }

    /// Zone -> office -> fine-area tree for region pickers.
    pub fn list_regions_grouped(&self) -> Vec<ZoneGroup> {
        self.catalog().build_index()
    }

    /// Reserve the ticket for a new selection. Later selections get larger tickets.
    pub fn next_ticket(&self) -> u64 {
        self.tickets.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// Whether a selection newer than `ticket` has been started.
    pub fn is_superseded(&self, ticket: u64) -> bool {
        self.tickets.load(Ordering::SeqCst) > ticket
    }

    /// Fetch the region's forecast and persist every day of it.
    pub async fn select_region(&self, region_id: &str, region_name: &str) -> Selection {
        let ticket = self.next_ticket();
        self.run_selection(ticket, region_id, region_name).await
    }

    /// Run `select_region` on `runtime`, reporting the result on `tx`.
    ///
    /// Returns the ticket so the caller can mark the region as fetching.
    pub fn spawn_select(
        self: &Arc<Self>,
        runtime: &tokio::runtime::Handle,
        tx: &Sender<PipelineMessage>,
        region_id: &str,
        region_name: &str,
    ) -> u64 {
        let ticket = self.next_ticket();
        let pipeline = Arc::clone(self);
        let tx = tx.clone();
        let region_id = region_id.to_string();
        let region_name = region_name.to_string();

        runtime.spawn(async move {
            let selection = pipeline
                .run_selection(ticket, &region_id, &region_name)
                .await;
            // Receiver gone means nobody is displaying results anymore
            let _ = tx.send(PipelineMessage::SelectionDone(selection));
        });

        ticket
    }

    #[instrument(skip(self), level = "info")]
    async fn run_selection(&self, ticket: u64, region_id: &str, region_name: &str) -> Selection {
        let catalog = self.catalog();

        let outcome = match self.resolver.fetch(&catalog, region_id, region_name).await {
            Ok(forecasts) => self.persist(forecasts),
            Err(error) => {
                tracing::warn!("Forecast for {} unavailable: {}", region_id, error);
                SelectionOutcome::Failed { error }
            }
        };

        if self.is_superseded(ticket) {
            tracing::debug!("Selection {} for {} finished after a newer one", ticket, region_id);
        }

        Selection {
            ticket,
            region_id: region_id.to_string(),
            region_name: region_name.to_string(),
            outcome,
        }
    }

    /// Upsert each day independently so one failure does not skip the rest.
    fn persist(&self, forecasts: Vec<DayForecast>) -> SelectionOutcome {
        let updated_at = Utc::now();
        let failures: Vec<PersistFailure> = forecasts
            .iter()
            .filter_map(|forecast| {
                let row = StoredForecastRow::from_forecast(forecast, updated_at);
                self.store.upsert(&row).err().map(|error| PersistFailure {
                    date: forecast.date,
                    error,
                })
            })
            .collect();

        if failures.is_empty() {
            tracing::info!("Saved {} forecast day(s)", forecasts.len());
            return SelectionOutcome::Succeeded { forecasts };
        }

        let failed_dates: Vec<String> = failures.iter().map(|f| f.date.to_string()).collect();
        tracing::warn!(
            "Saved {}/{} forecast day(s); failed for {}: {}",
            forecasts.len() - failures.len(),
            forecasts.len(),
            failed_dates.join(", "),
            failures[0].error
        );
        SelectionOutcome::Partial {
            forecasts,
            failures,
        }
    }

    /// Stored forecast for the key. Never touches the network.
    pub fn lookup_history(&self, region_id: &str, date: NaiveDate) -> HistoryLookup {
        lookup_history(&self.store, region_id, date)
    }
}

/// Point lookup against the history store alone, usable without a catalog.
pub fn lookup_history(store: &ForecastStore, region_id: &str, date: NaiveDate) -> HistoryLookup {
    match store.get(region_id, date) {
        Ok(Some(row)) => HistoryLookup::Found(row),
        Ok(None) => HistoryLookup::NotFound,
        Err(error) => {
            tracing::warn!("History lookup for {} on {} failed: {}", region_id, date, error);
            HistoryLookup::Error(error)
        }
    }
}

/// Phase of the displayed selection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectionPhase {
    Idle,
    Fetching,
    Succeeded,
    Partial,
    Failed,
}

/// What the presentation layer shows.
///
/// Completed selections are shown unless a newer one is already displayed,
/// so a slow stale response cannot overwrite a fresher result.
#[derive(Debug, Default)]
pub struct DisplayState {
    shown: Option<Selection>,
    newest_requested: u64,
}

impl DisplayState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that selection `ticket` has started.
    pub fn begin(&mut self, ticket: u64) {
        self.newest_requested = self.newest_requested.max(ticket);
    }

    /// Show a completed selection. Returns false if a newer one is already shown.
    pub fn apply(&mut self, selection: Selection) -> bool {
        if let Some(shown) = &self.shown {
            if shown.ticket > selection.ticket {
                tracing::debug!(
                    "Dropping stale selection {} for {}",
                    selection.ticket,
                    selection.region_id
                );
                return false;
            }
        }
        self.newest_requested = self.newest_requested.max(selection.ticket);
        self.shown = Some(selection);
        true
    }

    pub fn shown(&self) -> Option<&Selection> {
        self.shown.as_ref()
    }

    /// True while the newest requested selection has not completed.
    pub fn is_fetching(&self) -> bool {
        let shown_ticket = self.shown.as_ref().map_or(0, |s| s.ticket);
        self.newest_requested > shown_ticket
    }

    pub fn phase(&self) -> SelectionPhase {
        if self.is_fetching() {
            return SelectionPhase::Fetching;
        }
        match self.shown.as_ref().map(|s| &s.outcome) {
            None => SelectionPhase::Idle,
            Some(SelectionOutcome::Succeeded { .. }) => SelectionPhase::Succeeded,
            Some(SelectionOutcome::Partial { .. }) => SelectionPhase::Partial,
            Some(SelectionOutcome::Failed { .. }) => SelectionPhase::Failed,
        }
    }
}
