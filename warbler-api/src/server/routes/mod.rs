use crate::server::ServerRouter;
use serde::Deserialize;
use warbler_common::model::post::{PostOrder, TextFilter};
use warbler_common::util::Limit;

mod admin;
mod feed;
mod likes;
mod posts;
mod users;

pub fn routes() -> ServerRouter {
    ServerRouter::new()
        .merge(posts::routes())
        .merge(likes::routes())
        .merge(feed::routes())
        .merge(users::routes())
        .merge(admin::routes())
}

#[derive(Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
struct ListQuery {
    #[serde(default)]
    order: PostOrder,
    #[serde(default)]
    limit: Limit,
    /// Comma-separated words.
    #[serde(default)]
    filter: String,
}

impl ListQuery {
    fn text_filter(&self) -> TextFilter {
        TextFilter::parse_list(&self.filter)
    }
}

#[derive(Copy, Clone, Eq, PartialEq, Debug, Default, Hash, Deserialize)]
struct LimitQuery {
    #[serde(default)]
    limit: Limit,
}
