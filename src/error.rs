use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::Serialize;
use thiserror::Error;
use tracing::error;

/// Rejections raised by the rank and recommendation computations.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RankError {
    #[error("Invalid score {score}: {reason}")]
    InvalidScore { score: f64, reason: String },

    #[error("Invalid rank {rank}: must be between 1 and {max}")]
    InvalidRank { rank: i64, max: i64 },

    #[error("Invalid percentile {percentile}: must be between 0 and 100")]
    InvalidPercentile { percentile: f64 },

    #[error("No data for year {year}")]
    NoData { year: i32 },
}

#[derive(Error, Debug)]
pub enum AppError {
    #[error(transparent)]
    Rank(#[from] RankError),

    #[error("Malformed payload: {0}")]
    MalformedPayload(String),

    #[error("Internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

#[derive(Serialize)]
struct ErrorBody {
    error: &'static str,
    message: String,
}

impl AppError {
    pub fn status(&self) -> StatusCode {
        match self {
            AppError::Rank(RankError::NoData { .. }) => StatusCode::NOT_FOUND,
            AppError::Rank(_) | AppError::MalformedPayload(_) => StatusCode::BAD_REQUEST,
            AppError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            AppError::Rank(RankError::InvalidScore { .. }) => "INVALID_SCORE",
            AppError::Rank(RankError::InvalidRank { .. }) => "INVALID_RANK",
            AppError::Rank(RankError::InvalidPercentile { .. }) => "INVALID_PERCENTILE",
            AppError::Rank(RankError::NoData { .. }) => "NO_DATA",
            AppError::MalformedPayload(_) => "MALFORMED_PAYLOAD",
            AppError::Internal(_) => "INTERNAL_ERROR",
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let status = self.status();

        let message = match &self {
            AppError::Internal(e) => {
                error!("Request failed: {e:#}");
                "Internal server error".to_string()
            }
            other => other.to_string(),
        };

        let body = ErrorBody {
            error: self.code(),
            message,
        };

        (status, Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_data_maps_to_not_found() {
        let err = AppError::from(RankError::NoData { year: 2019 });
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.code(), "NO_DATA");
        assert_eq!(err.to_string(), "No data for year 2019");
    }

    #[test]
    fn input_errors_map_to_bad_request() {
        let score = AppError::from(RankError::InvalidScore {
            score: 900.0,
            reason: "must be between 0 and 800".to_string(),
        });
        let rank = AppError::from(RankError::InvalidRank { rank: 0, max: 40000 });

        assert_eq!(score.status(), StatusCode::BAD_REQUEST);
        assert_eq!(rank.status(), StatusCode::BAD_REQUEST);
        assert_eq!(rank.code(), "INVALID_RANK");
        assert_eq!(rank.to_string(), "Invalid rank 0: must be between 1 and 40000");
    }

    #[test]
    fn internal_errors_hide_details() {
        let response = AppError::Internal(anyhow::anyhow!("disk on fire")).into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
    }
}
