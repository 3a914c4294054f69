use crate::server::routes::ListQuery;
use crate::server::{Result, ServerError, ServerRouter, json::Json, query::Query};
use axum::extract::State;
use axum::http::StatusCode;
use axum_extra::routing::{RouterExt, TypedPath};
use serde::Deserialize;
use std::sync::Arc;
use time::UtcDateTime;
use warbler_common::model::post::{Post, PostId};
use warbler_common::model::user::UserId;
use warbler_db::reindex::LikeOutcome;
use warbler_db::timeline::{Published, Timeline};

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_post(create_post)
        .typed_get(get_author_posts)
        .typed_get(get_post)
        .typed_post(like_post)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{user}/posts", rejection(ServerError))]
struct AuthorPostsPath {
    user: UserId,
}

#[derive(Deserialize)]
struct CreatePostBody {
    content: String,
}

async fn create_post(
    AuthorPostsPath { user: author }: AuthorPostsPath,
    State(timeline): State<Arc<Timeline>>,
    Json(body): Json<CreatePostBody>,
) -> Result<(StatusCode, Json<Published>)> {
    let published = timeline.post(author, body.content).await?;

    Ok((StatusCode::CREATED, Json(published)))
}

async fn get_author_posts(
    AuthorPostsPath { user: author }: AuthorPostsPath,
    State(timeline): State<Arc<Timeline>>,
    Query(query): Query<ListQuery>,
) -> Result<Json<Vec<Post>>> {
    let posts = timeline
        .posts_by_author(author, query.limit, query.order, &query.text_filter())
        .await?;

    Ok(Json(posts))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{user}/posts/{post}", rejection(ServerError))]
struct PostPath {
    user: UserId,
    post: PostId,
}

#[derive(Deserialize)]
struct PostQuery {
    #[serde(default, with = "warbler_common::util::rfc3339::option")]
    created_at: Option<UtcDateTime>,
}

async fn get_post(
    PostPath { user: author, post }: PostPath,
    State(timeline): State<Arc<Timeline>>,
    Query(query): Query<PostQuery>,
) -> Result<Json<Post>> {
    let post = timeline.fetch_post(author, post, query.created_at).await?;

    Ok(Json(post))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{user}/posts/{post}/likes", rejection(ServerError))]
struct PostLikesPath {
    user: UserId,
    post: PostId,
}

#[derive(Deserialize)]
struct LikeBody {
    liker: UserId,
    /// Has to match the stored post if given.
    #[serde(default, with = "warbler_common::util::rfc3339::option")]
    created_at: Option<UtcDateTime>,
}

async fn like_post(
    PostLikesPath { user: author, post }: PostLikesPath,
    State(timeline): State<Arc<Timeline>>,
    Json(body): Json<LikeBody>,
) -> Result<Json<LikeOutcome>> {
    let outcome = timeline
        .like(author, post, body.liker, body.created_at)
        .await?;

    Ok(Json(outcome))
}
