use std::sync::mpsc;
use std::sync::Arc;

use chrono::NaiveDate;
use tenki_core::{AppError, Config};
use tenki_forecast::{
    lookup_history, CatalogSource, DisplayState, ForecastResolver, ForecastStore, HistoryLookup,
    Pipeline, PipelineMessage, RegionCatalog, SelectionPhase,
};

/// Configuration plus the forecast history.
///
/// Opening an `App` never touches the network; the region catalog is only
/// fetched by `connect`, for commands that navigate or fetch forecasts.
pub struct App {
    config: Config,
    store: Arc<ForecastStore>,
}

impl App {
    /// Open the history store.
    pub fn open(config: Config) -> Result<Self, AppError> {
        let store = Arc::new(ForecastStore::open(&config.database_path)?);
        tracing::info!("Forecast history at {}", config.database_path.display());
        Ok(Self { config, store })
    }

    /// Load the region catalog and build the selection pipeline.
    ///
    /// Without a catalog there is nothing to navigate, so callers treat a
    /// failure here as fatal.
    pub async fn connect(&self) -> Result<Arc<Pipeline>, AppError> {
        let resolver =
            ForecastResolver::new(&self.config.forecast_base_url, self.config.request_timeout())?;
        let source = CatalogSource::Url(self.config.area_url.clone());
        let catalog = RegionCatalog::load(resolver.client(), &source).await?;

        Ok(Arc::new(Pipeline::new(catalog, resolver, Arc::clone(&self.store))))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn lookup_history(&self, region_id: &str, date: NaiveDate) -> HistoryLookup {
        lookup_history(&self.store, region_id, date)
    }

    pub fn reset_history(&self) -> Result<(), AppError> {
        self.store.reset_schema()?;
        Ok(())
    }
}

/// Run a selection in the background and wait for it to be displayed.
///
/// `on_phase` sees the phase once the fetch starts and again when the result
/// has been applied.
pub async fn run_selection(
    pipeline: &Arc<Pipeline>,
    region_id: &str,
    region_name: &str,
    mut on_phase: impl FnMut(SelectionPhase),
) -> Result<DisplayState, AppError> {
    let (tx, rx) = mpsc::channel();
    let mut display = DisplayState::new();

    let ticket = pipeline.spawn_select(
        &tokio::runtime::Handle::current(),
        &tx,
        region_id,
        region_name,
    );
    // The spawned task holds the only sender now
    drop(tx);
    display.begin(ticket);
    on_phase(display.phase());

    let message = tokio::task::spawn_blocking(move || rx.recv())
        .await
        .map_err(|e| anyhow::anyhow!("Selection task failed: {}", e))?
        .map_err(|_| anyhow::anyhow!("Selection for {} ended without a result", region_id))?;

    let PipelineMessage::SelectionDone(selection) = message;
    display.apply(selection);
    on_phase(display.phase());

    Ok(display)
}
