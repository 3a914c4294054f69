use crate::server::routes::LimitQuery;
use crate::server::{Result, ServerError, ServerRouter, json::Json, query::Query};
use axum::extract::State;
use axum_extra::routing::{RouterExt, TypedPath};
use serde::de::Error as _;
use serde::{Deserialize, Deserializer};
use std::sync::Arc;
use warbler_common::model::graph::{FollowStats, FollowedUser, FollowingUser};
use warbler_common::model::user::{UserId, UserMapping, Username};
use warbler_common::util::Limit;
use warbler_db::timeline::Timeline;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .typed_get(get_followers)
        .typed_get(get_followed)
        .typed_get(get_follow_stats)
        .typed_get(get_username)
        .typed_get(get_most_followed)
        .typed_get(get_follows_most)
        .typed_get(get_user_by_name)
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{user}/followers", rejection(ServerError))]
struct FollowersPath {
    user: UserId,
}

async fn get_followers(
    FollowersPath { user }: FollowersPath,
    State(timeline): State<Arc<Timeline>>,
) -> Result<Json<Vec<UserId>>> {
    Ok(Json(timeline.followers(user).await?))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{user}/followed", rejection(ServerError))]
struct FollowedPath {
    user: UserId,
}

async fn get_followed(
    FollowedPath { user }: FollowedPath,
    State(timeline): State<Arc<Timeline>>,
) -> Result<Json<Vec<UserId>>> {
    Ok(Json(timeline.followed(user).await?))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{user}/follow_stats", rejection(ServerError))]
struct FollowStatsPath {
    user: UserId,
}

async fn get_follow_stats(
    FollowStatsPath { user }: FollowStatsPath,
    State(timeline): State<Arc<Timeline>>,
) -> Result<Json<FollowStats>> {
    Ok(Json(timeline.follow_stats(user).await?))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/{user}/username", rejection(ServerError))]
struct UsernamePath {
    user: UserId,
}

async fn get_username(
    UsernamePath { user }: UsernamePath,
    State(timeline): State<Arc<Timeline>>,
) -> Result<Json<UserMapping>> {
    let username = timeline.username_of(user).await?;

    Ok(Json(UserMapping { id: user, username }))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/most_followed", rejection(ServerError))]
struct MostFollowedPath();

async fn get_most_followed(
    MostFollowedPath(): MostFollowedPath,
    State(timeline): State<Arc<Timeline>>,
    Query(query): Query<LimitQuery>,
) -> Result<Json<Vec<FollowedUser>>> {
    Ok(Json(timeline.most_followed(query.limit).await?))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/users/follow_most", rejection(ServerError))]
struct FollowsMostPath();

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
struct FollowsMostQuery {
    #[serde(default)]
    limit: Limit,
    /// Comma-separated user ids.
    #[serde(default, deserialize_with = "comma_separated_ids")]
    followed_users: Option<Vec<UserId>>,
}

fn comma_separated_ids<'de, D>(deserializer: D) -> Result<Option<Vec<UserId>>, D::Error>
where
    D: Deserializer<'de>,
{
    let Some(raw) = Option::<String>::deserialize(deserializer)? else {
        return Ok(None);
    };

    raw.split(',')
        .map(str::trim)
        .filter(|id| !id.is_empty())
        .map(|id| id.parse::<UserId>().map_err(D::Error::custom))
        .collect::<Result<_, _>>()
        .map(Some)
}

async fn get_follows_most(
    FollowsMostPath(): FollowsMostPath,
    State(timeline): State<Arc<Timeline>>,
    Query(query): Query<FollowsMostQuery>,
) -> Result<Json<Vec<FollowingUser>>> {
    let ranked = timeline
        .follows_most(query.limit, query.followed_users)
        .await?;

    Ok(Json(ranked))
}

#[derive(TypedPath, Deserialize)]
#[typed_path("/usernames/{name}", rejection(ServerError))]
struct UserByNamePath {
    name: Username,
}

async fn get_user_by_name(
    UserByNamePath { name }: UserByNamePath,
    State(timeline): State<Arc<Timeline>>,
) -> Result<Json<UserMapping>> {
    let id = timeline.user_id_of(name.clone()).await?;

    Ok(Json(UserMapping { id, username: name }))
}
