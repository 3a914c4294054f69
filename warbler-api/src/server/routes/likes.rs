use crate::server::routes::LimitQuery;
use crate::server::{Result, ServerError, ServerRouter, json::Json, query::Query};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use warbler_common::model::post::{Like, Post};
use warbler_common::model::user::UserId;
use warbler_db::reindex::LikeOutcome;
use warbler_db::timeline::Timeline;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_post(like_latest)
        .typed_get(get_likes)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{user}/likes/latest", rejection(ServerError))]
struct LikeLatestPath {
    user: UserId,
}

#[derive(Serialize)]
struct LatestLike {
    post: Post,
    #[serde(flatten)]
    outcome: LikeOutcome,
}

async fn like_latest(
    LikeLatestPath { user: liker }: LikeLatestPath,
    State(timeline): State<Arc<Timeline>>,
) -> Result<Json<LatestLike>> {
    let (post, outcome) = timeline.like_latest_cached(liker).await?;

    Ok(Json(LatestLike { post, outcome }))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/likes", rejection(ServerError))]
struct LikesPath();

async fn get_likes(
    LikesPath(): LikesPath,
    State(timeline): State<Arc<Timeline>>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<Like>>> {
    let likes = timeline.like_sample(query.limit).await?;

    Ok(Json(likes))
}
