use crate::server::routes::{LimitQuery, ListQuery};
use crate::server::{Result, ServerError, ServerRouter, json::Json, query::Query};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use warbler_common::model::post::Post;
use warbler_common::model::user::UserId;
use warbler_db::timeline::Timeline;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(get_timeline)
        .typed_post(hydrate_feed)
        .typed_get(get_feed)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{user}/timeline", rejection(ServerError))]
struct TimelinePath {
    user: UserId,
}

/// Computed from the followed authors on every request; the feed cache is not
/// involved.
async fn get_timeline(
    TimelinePath { user }: TimelinePath,
    State(timeline): State<Arc<Timeline>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Post>>> {
    let posts = timeline
        .timeline(user, query.limit, query.order, &query.text_filter())
        .await?;

    Ok(Json(posts))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{user}/feed/hydrate", rejection(ServerError))]
struct HydrateFeedPath {
    user: UserId,
}

#[derive(Serialize)]
struct Hydration {
    hydrated: bool,
}

async fn hydrate_feed(
    HydrateFeedPath { user }: HydrateFeedPath,
    State(timeline): State<Arc<Timeline>>,
) -> Result<Json<Hydration>> {
    let hydrated = timeline.hydrate_feed(user).await?;

    Ok(Json(Hydration { hydrated }))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{user}/feed", rejection(ServerError))]
struct FeedPath {
    user: UserId,
}

async fn get_feed(
    FeedPath { user }: FeedPath,
    State(timeline): State<Arc<Timeline>>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<Post>>> {
    let posts = timeline.read_feed(user, query.limit).await?;

    Ok(Json(posts))
}
