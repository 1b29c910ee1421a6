mod filters;
mod format;

pub use filters::{apply_filter, matches_search, search, PostFilter};
pub use format::{format_date, format_number, format_timestamp};

use crate::db::{EngagementMetrics, Post};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

#[derive(Debug, Clone, Default, Deserialize)]
pub struct BrowseQuery {
    #[serde(default)]
    pub q: Option<String>,
    #[serde(default)]
    pub filter: PostFilter,
    #[serde(default)]
    pub page: usize,
}

#[derive(Debug, Clone, Serialize)]
pub struct CountLabels {
    pub likes: String,
    pub retweets: String,
    pub replies: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct PostCard {
    pub id: i32,
    pub junkipedia_id: String,
    pub tweet_id: Option<String>,
    pub author_username: Option<String>,
    pub content: String,
    pub post_type: String,
    pub published_at: i64,
    pub date_label: String,
    pub metrics: EngagementMetrics,
    pub labels: CountLabels,
    pub embed_url: Option<String>,
    pub media: Vec<String>,
    pub is_reply: bool,
    pub in_reply_to: Option<String>,
    pub flagged: bool,
}

impl PostCard {
    pub fn from_post(post: &Post, flagged: bool, now: DateTime<Utc>) -> Self {
        let metrics = post.metrics();
        let embed_url = post.tweet_id.as_ref().map(|id| {
            let author = post.author_username.as_deref().unwrap_or("i/web");
            format!("https://twitter.com/{author}/status/{id}")
        });

        PostCard {
            id: post.id,
            junkipedia_id: post.junkipedia_id.clone(),
            tweet_id: post.tweet_id.clone(),
            author_username: post.author_username.clone(),
            content: post.content.clone(),
            post_type: post.post_type.clone(),
            published_at: post.published_at,
            date_label: format_timestamp(post.published_at, now),
            labels: CountLabels {
                likes: format_number(metrics.likes),
                retweets: format_number(metrics.retweets),
                replies: format_number(metrics.replies),
            },
            metrics,
            embed_url,
            media: post.media(),
            is_reply: post.is_reply(),
            in_reply_to: post.in_reply_to_screen_name.clone(),
            flagged,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct BrowsePage {
    pub posts: Vec<PostCard>,
    pub total: usize,
    pub page: usize,
    pub page_size: usize,
    pub has_more: bool,
}

/// Search, then filter/sort, then cut one page out of the in-memory set.
pub fn browse(
    posts: &[Post],
    query: &BrowseQuery,
    flagged: &HashSet<i32>,
    page_size: usize,
    now: DateTime<Utc>,
) -> BrowsePage {
    let mut view = search(posts, query.q.as_deref().unwrap_or(""));
    apply_filter(&mut view, query.filter, flagged);

    let total = view.len();
    let page_size = page_size.max(1);
    let start = query.page.saturating_mul(page_size).min(total);
    let end = (start + page_size).min(total);

    BrowsePage {
        posts: view[start..end]
            .iter()
            .map(|p| PostCard::from_post(p, flagged.contains(&p.id), now))
            .collect(),
        total,
        page: query.page,
        page_size,
        has_more: end < total,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use chrono::TimeZone;

    pub fn post_with(id: i32, content: &str, (likes, retweets, replies): (i64, i64, i64)) -> Post {
        Post {
            id,
            junkipedia_id: format!("j{id}"),
            tweet_id: Some(format!("{}", 1000 + id)),
            author_username: Some("jk_rowling".into()),
            content: content.into(),
            post_type: "tweet".into(),
            published_at: 1_700_000_000 + id as i64,
            engagement_metrics: serde_json::to_string(&EngagementMetrics {
                likes,
                retweets,
                replies,
                quotes: 0,
            })
            .unwrap(),
            in_reply_to_screen_name: None,
            media_urls: "[]".into(),
            raw_data: "{}".into(),
            ingested_at: 0,
        }
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap()
    }

    #[test]
    fn test_popular_end_to_end() {
        let posts = vec![
            post_with(1, "modest", (100, 10, 5)),
            post_with(2, "viral", (50_000, 12_000, 9_000)),
            post_with(3, "quiet", (3, 0, 1)),
        ];
        let query = BrowseQuery {
            filter: PostFilter::Popular,
            ..Default::default()
        };

        let page = browse(&posts, &query, &HashSet::new(), 50, now());
        let order: Vec<i32> = page.posts.iter().map(|c| c.id).collect();
        assert_eq!(order, vec![2, 1, 3]);
        assert_eq!(page.total, 3);
        assert!(!page.has_more);
        assert_eq!(page.posts[0].labels.likes, "50.0K");
        assert_eq!(page.posts[0].labels.replies, "9.0K");
    }

    #[test]
    fn test_search_then_page() {
        let posts: Vec<Post> = (1..=5)
            .map(|i| post_with(i, &format!("Post number {i}"), (0, 0, 0)))
            .collect();

        let first = browse(
            &posts,
            &BrowseQuery {
                q: Some("POST".into()),
                ..Default::default()
            },
            &HashSet::new(),
            2,
            now(),
        );
        assert_eq!(first.total, 5);
        assert_eq!(first.posts.len(), 2);
        assert!(first.has_more);

        let last = browse(
            &posts,
            &BrowseQuery {
                q: Some("post".into()),
                page: 2,
                ..Default::default()
            },
            &HashSet::new(),
            2,
            now(),
        );
        assert_eq!(last.posts.len(), 1);
        assert!(!last.has_more);

        let beyond = browse(
            &posts,
            &BrowseQuery {
                page: 9,
                ..Default::default()
            },
            &HashSet::new(),
            2,
            now(),
        );
        assert!(beyond.posts.is_empty());
    }

    #[test]
    fn test_card_embed_and_flag() {
        let post = post_with(7, "x", (0, 0, 0));
        let card = PostCard::from_post(&post, true, now());
        assert_eq!(
            card.embed_url.as_deref(),
            Some("https://twitter.com/jk_rowling/status/1007")
        );
        assert!(card.flagged);
        assert_eq!(card.date_label, "Nov 14, 2023");
    }
}
