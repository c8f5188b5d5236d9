//! Forecast pipeline error types.

use tenki_core::{AppError, DatabaseError, ForecastDataError, NetworkError};
use thiserror::Error;

#[derive(Error, Debug)]
pub enum ForecastError {
    /// Region source unreachable or missing its top-level groups
    #[error("Failed to load region catalog: {0}")]
    CatalogLoad(String),

    #[error("Failed to fetch forecast for office {office_id}: {source}")]
    Resolution {
        office_id: String,
        #[source]
        source: NetworkError,
    },

    #[error("Unexpected forecast shape for office {office_id}: {message}")]
    Parse { office_id: String, message: String },

    #[error("Forecast store error: {0}")]
    Store(#[from] DatabaseError),
}

impl ForecastError {
    pub(crate) fn parse(office_id: &str, message: impl Into<String>) -> Self {
        Self::Parse {
            office_id: office_id.to_string(),
            message: message.into(),
        }
    }

    /// User-friendly error message for display.
    pub fn user_message(&self) -> String {
        match self {
            Self::CatalogLoad(_) => {
                "The region list could not be loaded. Check your connection and restart."
                    .to_string()
            }
            Self::Resolution { source, .. } => source.user_message().to_string(),
            Self::Parse { office_id, .. } => format!(
                "The forecast for office {} arrived in an unexpected format.",
                office_id
            ),
            Self::Store(e) => e.user_message().to_string(),
        }
    }

    /// Whether repeating the same action may succeed.
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::Resolution { source, .. } => !matches!(
                source,
                NetworkError::ServerError { status, .. } if *status < 500
            ),
            Self::Store(DatabaseError::Corruption(_)) => false,
            Self::Store(_) => true,
            Self::CatalogLoad(_) | Self::Parse { .. } => false,
        }
    }
}

impl From<ForecastError> for AppError {
    fn from(e: ForecastError) -> Self {
        match e {
            ForecastError::CatalogLoad(msg) => {
                AppError::Forecast(ForecastDataError::CatalogUnavailable(msg))
            }
            ForecastError::Resolution { source, .. } => AppError::Network(source),
            ForecastError::Parse { office_id, message } => {
                AppError::Forecast(ForecastDataError::Malformed {
                    source_name: office_id,
                    message,
                })
            }
            ForecastError::Store(e) => AppError::Database(e),
        }
    }
}
