use crate::db::{EngagementMetrics, NewPost, PostType};
use crate::error::{Error, Result};
use crate::settings::settings;
use chrono::{DateTime, Datelike, NaiveDate, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use strum::{Display, EnumIter};

/// The vendor has accepted both spellings at different times, so probes try each.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumIter)]
pub enum ChannelParam {
    #[strum(serialize = "channel_id")]
    ChannelId,
    #[strum(serialize = "channel_ids[]")]
    ChannelIds,
}

#[derive(Debug, Clone)]
pub struct PostQuery {
    pub channel: String,
    pub param: ChannelParam,
    pub published_from: Option<NaiveDate>,
    pub published_to: Option<NaiveDate>,
    pub page: u32,
    pub per_page: u32,
}

impl PostQuery {
    pub fn for_channel(channel: &str) -> Self {
        Self {
            channel: channel.to_string(),
            param: ChannelParam::ChannelIds,
            published_from: None,
            published_to: None,
            page: 1,
            per_page: settings().junkipedia.per_page,
        }
    }

    pub fn window(mut self, from: NaiveDate, to: NaiveDate) -> Self {
        self.published_from = Some(from);
        self.published_to = Some(to);
        self
    }

    pub fn query_pairs(&self) -> Vec<(String, String)> {
        let mut pairs = vec![(self.param.to_string(), self.channel.clone())];
        if let Some(from) = self.published_from {
            pairs.push((
                "published_at_from".into(),
                format!("{}T00:00:00Z", from.format("%Y-%m-%d")),
            ));
        }
        if let Some(to) = self.published_to {
            pairs.push((
                "published_at_to".into(),
                format!("{}T23:59:59Z", to.format("%Y-%m-%d")),
            ));
        }
        pairs.push(("page".into(), self.page.to_string()));
        pairs.push(("per_page".into(), self.per_page.to_string()));
        pairs
    }

    pub fn to_query_string(&self) -> String {
        self.query_pairs()
            .iter()
            .map(|(k, v)| format!("{}={}", k, urlencoding::encode(v)))
            .collect::<Vec<_>>()
            .join("&")
    }
}

/// Splits `[from, to]` into calendar-month windows, clipping the first and last.
pub fn month_windows(from: NaiveDate, to: NaiveDate) -> Vec<(NaiveDate, NaiveDate)> {
    let mut windows = Vec::new();
    let mut start = from;

    while start <= to {
        let next_month = if start.month() == 12 {
            NaiveDate::from_ymd_opt(start.year() + 1, 1, 1)
        } else {
            NaiveDate::from_ymd_opt(start.year(), start.month() + 1, 1)
        };
        let Some(next_month) = next_month else {
            break;
        };
        let month_end = next_month.pred_opt().unwrap_or(next_month);
        windows.push((start, month_end.min(to)));
        start = next_month;
    }

    windows
}

#[derive(Debug, Deserialize)]
struct PostsEnvelope {
    #[serde(default)]
    data: Vec<Value>,
    links: Option<Links>,
}

#[derive(Debug, Deserialize)]
struct Links {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ChannelEnvelope {
    data: Value,
}

#[derive(Debug, Clone, Default)]
pub struct PostsPage {
    pub posts: Vec<VendorPost>,
    pub malformed: usize,
    pub next: Option<String>,
}

impl PostsPage {
    pub fn from_json(body: Value) -> Result<Self> {
        let envelope: PostsEnvelope = serde_json::from_value(body)?;
        let mut page = PostsPage {
            next: envelope.links.and_then(|l| l.next),
            ..Default::default()
        };
        for item in envelope.data {
            match VendorPost::parse(item) {
                Some(post) => page.posts.push(post),
                None => page.malformed += 1,
            }
        }
        Ok(page)
    }

    pub fn len(&self) -> usize {
        self.posts.len() + self.malformed
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

#[derive(Debug, Clone)]
pub struct Channel {
    pub id: String,
    pub name: Option<String>,
    pub platform: Option<String>,
    pub raw: Value,
}

impl Channel {
    fn from_json(data: Value) -> Option<Self> {
        let id = id_string(data.get("id")?)?;
        let attributes = data.get("attributes");
        let text = |key: &str| {
            attributes
                .and_then(|a| a.get(key))
                .and_then(|v| v.as_str())
                .map(str::to_string)
        };
        Some(Channel {
            id,
            name: text("channel_name").or_else(|| text("name")),
            platform: text("platform"),
            raw: data,
        })
    }
}

#[derive(Debug, Clone)]
pub struct VendorPost {
    pub id: String,
    pub raw: Value,
}

impl VendorPost {
    pub fn parse(raw: Value) -> Option<Self> {
        let id = id_string(raw.get("id")?)?;
        Some(Self { id, raw })
    }

    fn attributes(&self) -> Option<&Value> {
        self.raw.get("attributes")
    }

    fn tweet(&self) -> Option<&Value> {
        self.attributes().and_then(|a| a.get("post_data"))
    }

    fn search_field(&self, key: &str) -> Option<&str> {
        self.attributes()
            .and_then(|a| a.get("search_data_fields"))
            .and_then(|f| f.get(key))
            .and_then(|v| v.as_str())
    }

    fn tweet_str(&self, path: &[&str]) -> Option<&str> {
        let mut cursor = self.tweet()?;
        for key in path {
            cursor = cursor.get(key)?;
        }
        cursor.as_str().filter(|s| !s.is_empty())
    }

    pub fn content(&self) -> String {
        self.tweet_str(&["full_text"])
            .or_else(|| self.tweet_str(&["text"]))
            .or_else(|| self.search_field("description"))
            .unwrap_or_default()
            .to_string()
    }

    pub fn tweet_id(&self) -> Option<String> {
        self.tweet_str(&["id_str"])
            .or_else(|| self.search_field("platform_id"))
            .map(str::to_string)
            .or_else(|| self.tweet().and_then(|t| t.get("id")).and_then(id_string))
    }

    pub fn author_username(&self) -> Option<String> {
        self.tweet_str(&["user", "screen_name"])
            .or_else(|| self.search_field("channel_username"))
            .map(str::to_string)
    }

    pub fn in_reply_to(&self) -> Option<String> {
        self.tweet_str(&["in_reply_to_screen_name"])
            .map(str::to_string)
    }

    pub fn is_quote(&self) -> bool {
        let flagged = self
            .tweet()
            .and_then(|t| t.get("is_quote_status"))
            .and_then(|v| v.as_bool())
            .unwrap_or(false);
        flagged || self.tweet_str(&["quoted_status_id_str"]).is_some()
    }

    pub fn post_type(&self) -> PostType {
        if self.in_reply_to().is_some() {
            PostType::Reply
        } else if self.is_quote() {
            PostType::Quoted
        } else {
            PostType::Tweet
        }
    }

    pub fn published_at(&self) -> Option<i64> {
        let from_vendor = self
            .attributes()
            .and_then(|a| a.get("published_at"))
            .and_then(|v| v.as_str())
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok());
        if let Some(dt) = from_vendor {
            return Some(dt.timestamp());
        }

        self.tweet_str(&["created_at"])
            .and_then(|s| DateTime::parse_from_str(s, "%a %b %d %H:%M:%S %z %Y").ok())
            .map(|dt| dt.timestamp())
    }

    pub fn metrics(&self) -> EngagementMetrics {
        let tweet = self.tweet();
        let engagement = self.attributes().and_then(|a| a.get("engagement_data"));
        let count = |tweet_key: &str, engagement_keys: &[&str]| -> i64 {
            tweet
                .and_then(|t| t.get(tweet_key))
                .and_then(|v| v.as_i64())
                .or_else(|| {
                    engagement_keys
                        .iter()
                        .find_map(|k| engagement.and_then(|e| e.get(*k)).and_then(|v| v.as_i64()))
                })
                .unwrap_or(0)
        };

        EngagementMetrics {
            likes: count("favorite_count", &["likes", "favorite_count"]),
            retweets: count("retweet_count", &["retweets", "shares"]),
            replies: count("reply_count", &["replies", "comments"]),
            quotes: count("quote_count", &["quotes"]),
        }
    }

    pub fn media_urls(&self) -> Vec<String> {
        let Some(tweet) = self.tweet() else {
            return Vec::new();
        };
        let media = tweet
            .get("extended_entities")
            .and_then(|e| e.get("media"))
            .or_else(|| tweet.get("entities").and_then(|e| e.get("media")))
            .and_then(|m| m.as_array());

        media
            .map(|items| {
                items
                    .iter()
                    .filter_map(|item| {
                        item.get("media_url_https")
                            .or_else(|| item.get("media_url"))
                            .and_then(|u| u.as_str())
                            .map(str::to_string)
                    })
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn normalize(&self, now: i64) -> NewPost {
        NewPost {
            junkipedia_id: self.id.clone(),
            tweet_id: self.tweet_id(),
            author_username: self.author_username(),
            content: self.content(),
            post_type: self.post_type().to_string(),
            published_at: self.published_at().unwrap_or(now),
            engagement_metrics: serde_json::to_string(&self.metrics())
                .unwrap_or_else(|_| "{}".to_string()),
            in_reply_to_screen_name: self.in_reply_to(),
            media_urls: serde_json::to_string(&self.media_urls())
                .unwrap_or_else(|_| "[]".to_string()),
            raw_data: self.raw.to_string(),
            ingested_at: now,
        }
    }
}

fn id_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) if !s.is_empty() => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

pub struct JunkipediaClient {
    http: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl JunkipediaClient {
    pub fn new(base_url: &str, api_key: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key: api_key.to_string(),
        })
    }

    pub fn from_env() -> Result<Self> {
        let api_key = std::env::var("JUNKIPEDIA_API_KEY")
            .map_err(|_| Error::MissingEnv("JUNKIPEDIA_API_KEY"))?;
        let s = &settings().junkipedia;
        Self::new(&s.base_url, &api_key, Duration::from_secs(s.timeout_secs))
    }

    pub fn url(&self, path: &str, query: Option<&str>) -> String {
        match query {
            Some(q) if !q.is_empty() => format!("{}{}?{}", self.base_url, path, q),
            _ => format!("{}{}", self.base_url, path),
        }
    }

    async fn get_json(&self, url: &str) -> Result<Value> {
        tracing::debug!(url, "junkipedia request");
        let response = self
            .http
            .get(url)
            .header("Accept", "application/json")
            .bearer_auth(&self.api_key)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::vendor(status, &body));
        }

        Ok(response.json().await?)
    }

    pub async fn posts(&self, query: &PostQuery) -> Result<PostsPage> {
        let body = self
            .get_json(&self.url("/posts", Some(&query.to_query_string())))
            .await?;
        PostsPage::from_json(body)
    }

    pub async fn channel(&self, channel_id: &str) -> Result<Channel> {
        let path = format!("/channels/{}", urlencoding::encode(channel_id));
        let body = self.get_json(&self.url(&path, None)).await?;
        let envelope: ChannelEnvelope = serde_json::from_value(body)?;
        Channel::from_json(envelope.data)
            .ok_or_else(|| Error::NotFound(format!("channel {channel_id}")))
    }

    pub async fn post_stats(&self, query: &PostQuery) -> Result<Value> {
        self.get_json(&self.url("/posts/stats", Some(&query.to_query_string())))
            .await
    }
}

pub fn now_timestamp() -> i64 {
    Utc::now().timestamp()
}
