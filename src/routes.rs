use std::{num::NonZeroUsize, sync::Arc};

use axum::{
    extract::{rejection::JsonRejection, Query, State},
    http::StatusCode,
    Json,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::{
    error::{AppError, RankError},
    models::{
        BatchRankEntry, RankQueryResult, RecommendationResult, ScoreStatistics, Scope,
        TrendAnalysis,
    },
    recommend::BandConfig,
    server::AppState,
    stats,
};

#[derive(Debug, Deserialize)]
pub struct RankRequest {
    pub score: f64,
    pub year: Option<i32>,
    #[serde(default)]
    pub scope: Scope,
}

#[derive(Debug, Deserialize)]
pub struct BatchRankRequest {
    pub scores: Vec<f64>,
    pub year: Option<i32>,
    #[serde(default)]
    pub scope: Scope,
}

#[derive(Debug, Deserialize)]
pub struct RecommendRequest {
    pub rank: i64,
    pub year: Option<i32>,
    /// Population `rank` was counted in; admissions are compared in the same one.
    #[serde(default)]
    pub scope: Scope,
    pub limit: Option<NonZeroUsize>,
    pub bands: Option<BandConfig>,
}

#[derive(Debug, Deserialize)]
pub struct YearQuery {
    pub year: Option<i32>,
    #[serde(default)]
    pub scope: Scope,
}

#[derive(Debug, Deserialize)]
pub struct TrendQuery {
    pub score: f64,
}

#[derive(Debug, Serialize)]
pub struct YearsResponse {
    pub years: Vec<i32>,
    pub default_year: i32,
}

#[derive(Debug, Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub years: Vec<i32>,
    pub schools: usize,
    pub loaded_at: DateTime<Utc>,
}

const MAX_BATCH: usize = 200;

fn payload<T>(payload: Result<Json<T>, JsonRejection>) -> Result<T, AppError> {
    payload.map(|Json(body)| body).map_err(|rejection| {
        warn!("Rejected payload: {}", rejection.body_text());
        AppError::MalformedPayload(rejection.body_text())
    })
}

pub async fn rank_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RankRequest>, JsonRejection>,
) -> Result<Json<RankQueryResult>, AppError> {
    let request = payload(body)?;
    let dataset = state.cache.get().await?;

    let result = dataset
        .resolver
        .resolve_in(request.score, request.year, request.scope)?;
    Ok(Json(result))
}

pub async fn batch_rank_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<BatchRankRequest>, JsonRejection>,
) -> Result<Json<Vec<BatchRankEntry>>, AppError> {
    let request = payload(body)?;
    if request.scores.len() > MAX_BATCH {
        return Err(AppError::MalformedPayload(format!(
            "at most {MAX_BATCH} scores per batch"
        )));
    }

    let dataset = state.cache.get().await?;
    Ok(Json(stats::resolve_batch(
        &dataset.resolver,
        &request.scores,
        request.year,
        request.scope,
    )))
}

pub async fn recommend_handler(
    State(state): State<Arc<AppState>>,
    body: Result<Json<RecommendRequest>, JsonRejection>,
) -> Result<Json<RecommendationResult>, AppError> {
    let request = payload(body)?;
    state.bander.validate_rank(request.rank)?;

    if let Some(bands) = &request.bands {
        bands.validate().map_err(AppError::MalformedPayload)?;
    }

    let dataset = state.cache.get().await?;
    let scope = request.scope;
    let year = match request.year.or_else(|| dataset.latest_admission_year(scope)) {
        Some(year) => year,
        None => return Err(RankError::NoData { year: state.config.default_year }.into()),
    };

    if !dataset
        .schools
        .iter()
        .any(|school| school.admission_for(year, scope).is_some())
    {
        return Err(RankError::NoData { year }.into());
    }

    let result = state.bander.recommend(
        request.rank,
        &dataset.schools,
        year,
        scope,
        request.bands.as_ref(),
        request.limit,
    )?;
    Ok(Json(result))
}

pub async fn stats_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<YearQuery>,
) -> Result<Json<ScoreStatistics>, AppError> {
    let dataset = state.cache.get().await?;
    let distribution = dataset.resolver.distribution_in(query.year, query.scope)?;
    Ok(Json(stats::statistics(distribution)))
}

pub async fn years_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<YearsResponse>, AppError> {
    let dataset = state.cache.get().await?;
    Ok(Json(YearsResponse {
        years: dataset.resolver.years(),
        default_year: dataset.resolver.default_year(),
    }))
}

pub async fn trend_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<TrendQuery>,
) -> Result<Json<TrendAnalysis>, AppError> {
    let dataset = state.cache.get().await?;
    Ok(Json(stats::trend(&dataset.resolver, query.score)?))
}

pub async fn health_handler(
    State(state): State<Arc<AppState>>,
) -> Result<Json<HealthResponse>, AppError> {
    let dataset = state.cache.get().await?;
    Ok(Json(HealthResponse {
        status: "ok",
        years: dataset.resolver.years(),
        schools: dataset.schools.len(),
        loaded_at: dataset.loaded_at,
    }))
}

pub async fn clear_cache_handler(State(state): State<Arc<AppState>>) -> StatusCode {
    state.cache.invalidate().await;
    StatusCode::NO_CONTENT
}
