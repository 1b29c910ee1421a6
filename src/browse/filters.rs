use crate::db::Post;
use serde::Deserialize;
use std::collections::HashSet;
use strum::{Display, EnumString};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Display, EnumString, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PostFilter {
    #[default]
    All,
    Recent,
    Popular,
    Replies,
    Original,
    Media,
    Flagged,
}

pub fn matches_search(post: &Post, term_lower: &str) -> bool {
    term_lower.is_empty() || post.content.to_lowercase().contains(term_lower)
}

pub fn search<'a>(posts: &'a [Post], term: &str) -> Vec<&'a Post> {
    let term_lower = term.to_lowercase();
    posts
        .iter()
        .filter(|p| matches_search(p, &term_lower))
        .collect()
}

/// Narrows and orders `posts` in place. Sorting is stable, so ties keep their incoming order.
pub fn apply_filter(posts: &mut Vec<&Post>, filter: PostFilter, flagged: &HashSet<i32>) {
    match filter {
        PostFilter::All => {}
        PostFilter::Recent => posts.sort_by(|a, b| b.published_at.cmp(&a.published_at)),
        PostFilter::Popular => {
            posts.sort_by_key(|p| std::cmp::Reverse(p.metrics().popularity()));
        }
        PostFilter::Replies => posts.retain(|p| p.is_reply()),
        PostFilter::Original => posts.retain(|p| !p.is_reply()),
        PostFilter::Media => posts.retain(|p| !p.media().is_empty()),
        PostFilter::Flagged => posts.retain(|p| flagged.contains(&p.id)),
    }
}
