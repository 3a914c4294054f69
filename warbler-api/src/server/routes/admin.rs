use crate::server::{Result, ServerError, ServerRouter, json::Json, query::Query};
use axum::body::Bytes;
use axum::extract::rejection::BytesRejection;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::StatusCode;
use axum_extra::routing::{RouterExt, TypedPath};
use serde::Deserialize;
use std::sync::Arc;
use warbler_common::model::user::UserId;
use warbler_common::util::Limit;
use warbler_db::loader::{LoadOptions, LoadReport};
use warbler_db::reindex::RepairReport;
use warbler_db::timeline::{SeedReport, Status, Timeline};

/// CSV uploads are far larger than any JSON request.
pub const IMPORT_BODY_LIMIT: usize = 256 * 1024 * 1024;

pub fn routes() -> ServerRouter {
    let import_routes = ServerRouter::new()
        .typed_post(import)
        .layer(DefaultBodyLimit::max(IMPORT_BODY_LIMIT));

    ServerRouter::new()
        .typed_get(get_status)
        .merge(import_routes)
        .typed_post(repair)
        .typed_post(seed_likes)
        .typed_post(reset)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/status", rejection(ServerError))]
struct StatusPath();

async fn get_status(
    StatusPath(): StatusPath,
    State(timeline): State<Arc<Timeline>>,
) -> Json<Status> {
    Json(timeline.status().await)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/admin/import", rejection(ServerError))]
struct ImportPath();

/// The body is the CSV file.
async fn import(
    ImportPath(): ImportPath,
    State(timeline): State<Arc<Timeline>>,
    Query(options): Query<LoadOptions>,
    body: std::result::Result<Bytes, BytesRejection>,
) -> Result<Json<LoadReport>> {
    let body = body?;
    let report = timeline.import(&body[..], options).await?;

    Ok(Json(report))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/admin/repair/{author}", rejection(ServerError))]
struct RepairPath {
    author: UserId,
}

async fn repair(
    RepairPath { author }: RepairPath,
    State(timeline): State<Arc<Timeline>>,
) -> Result<Json<RepairReport>> {
    Ok(Json(timeline.repair(author).await?))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/admin/seed_likes/{author}", rejection(ServerError))]
struct SeedLikesPath {
    author: UserId,
}

#[derive(Deserialize)]
struct SeedQuery {
    #[serde(default)]
    posts: Limit,
    #[serde(default)]
    likes: Limit,
}

async fn seed_likes(
    SeedLikesPath { author }: SeedLikesPath,
    State(timeline): State<Arc<Timeline>>,
    Query(query): Query<SeedQuery>,
) -> Result<Json<SeedReport>> {
    let report = timeline
        .seed_random_likes(author, query.posts, query.likes)
        .await?;

    Ok(Json(report))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/admin/reset", rejection(ServerError))]
struct ResetPath();

async fn reset(
    ResetPath(): ResetPath,
    State(timeline): State<Arc<Timeline>>,
) -> Result<StatusCode> {
    timeline.reset().await?;

    Ok(StatusCode::NO_CONTENT)
}
