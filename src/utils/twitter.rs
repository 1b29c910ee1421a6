use crate::annotate::ContextKind;
use crate::error::{Error, Result};
use crate::settings::settings;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;

#[derive(Debug, Deserialize)]
struct TweetResponse {
    data: Option<TweetData>,
    includes: Option<Includes>,
    #[serde(default)]
    errors: Vec<ApiProblem>,
}

#[derive(Debug, Deserialize)]
struct TweetData {
    id: String,
    text: String,
    author_id: Option<String>,
    created_at: Option<String>,
}

#[derive(Debug, Deserialize)]
struct Includes {
    #[serde(default)]
    users: Vec<User>,
}

#[derive(Debug, Deserialize)]
struct User {
    id: String,
    username: String,
}

#[derive(Debug, Deserialize)]
struct ApiProblem {
    detail: Option<String>,
}

#[derive(Debug, Clone)]
pub struct FetchedTweet {
    pub id: String,
    pub text: String,
    pub author_username: Option<String>,
    pub created_at: Option<String>,
    pub raw: Value,
}

impl FetchedTweet {
    pub fn from_json(raw: Value) -> Result<Self> {
        let response: TweetResponse = serde_json::from_value(raw.clone())?;

        let Some(data) = response.data else {
            let detail = response
                .errors
                .into_iter()
                .find_map(|e| e.detail)
                .unwrap_or_else(|| "tweet missing from response".to_string());
            return Err(Error::NotFound(detail));
        };

        let author_username = data.author_id.as_ref().and_then(|author| {
            response
                .includes
                .as_ref()?
                .users
                .iter()
                .find(|u| &u.id == author)
                .map(|u| u.username.clone())
        });

        Ok(FetchedTweet {
            id: data.id,
            text: data.text,
            author_username,
            created_at: data.created_at,
            raw,
        })
    }
}

/// Finds the tweet a stored payload quotes or replies to. Quotes win over replies.
pub fn referenced_tweet(raw: &Value) -> Option<(ContextKind, String)> {
    let tweet = raw
        .get("attributes")
        .and_then(|a| a.get("post_data"))
        .unwrap_or(raw);

    let non_empty = |v: &Value| v.as_str().filter(|s| !s.is_empty()).map(str::to_string);
    let referenced = tweet.get("referenced_tweets").and_then(|r| r.as_array());
    let referenced_of = |kind: &str| {
        referenced.and_then(|refs| {
            refs.iter()
                .find(|r| r.get("type").and_then(|t| t.as_str()) == Some(kind))
                .and_then(|r| r.get("id"))
                .and_then(non_empty)
        })
    };

    if let Some(id) = tweet
        .get("quoted_status_id_str")
        .and_then(non_empty)
        .or_else(|| referenced_of("quoted"))
    {
        return Some((ContextKind::Quote, id));
    }

    tweet
        .get("in_reply_to_status_id_str")
        .and_then(non_empty)
        .or_else(|| referenced_of("replied_to"))
        .map(|id| (ContextKind::Reply, id))
}

pub struct TwitterClient {
    http: reqwest::Client,
    base_url: String,
    bearer_token: String,
}

impl TwitterClient {
    pub fn new(base_url: &str, bearer_token: &str, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.trim_end_matches('/').to_string(),
            bearer_token: bearer_token.to_string(),
        })
    }

    pub fn from_env() -> Result<Self> {
        let token = std::env::var("TWITTER_BEARER_TOKEN")
            .map_err(|_| Error::MissingEnv("TWITTER_BEARER_TOKEN"))?;
        let s = &settings().twitter;
        Self::new(&s.base_url, &token, Duration::from_secs(s.timeout_secs))
    }

    pub fn tweet_url(&self, tweet_id: &str) -> String {
        format!(
            "{}/tweets/{}?expansions=author_id&tweet.fields=created_at,public_metrics,referenced_tweets&user.fields=username",
            self.base_url,
            urlencoding::encode(tweet_id)
        )
    }

    pub async fn fetch_tweet(&self, tweet_id: &str) -> Result<FetchedTweet> {
        let response = self
            .http
            .get(self.tweet_url(tweet_id))
            .bearer_auth(&self.bearer_token)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::vendor(status, &body));
        }

        FetchedTweet::from_json(response.json().await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_fetched_tweet_resolves_author() {
        let tweet = FetchedTweet::from_json(json!({
            "data": {
                "id": "42",
                "text": "original words",
                "author_id": "7",
                "created_at": "2024-03-01T10:00:00.000Z"
            },
            "includes": { "users": [{ "id": "7", "username": "author7", "name": "A" }] }
        }))
        .unwrap();

        assert_eq!(tweet.id, "42");
        assert_eq!(tweet.author_username.as_deref(), Some("author7"));
        assert!(tweet.raw.get("includes").is_some());
    }

    #[test]
    fn test_fetched_tweet_reports_api_problem() {
        let err = FetchedTweet::from_json(json!({
            "errors": [{ "detail": "Could not find tweet with id: [42]." }]
        }))
        .unwrap_err();
        assert!(err.to_string().contains("Could not find tweet"));
    }

    #[test]
    fn test_referenced_tweet_prefers_quote() {
        let raw = json!({
            "attributes": {
                "post_data": {
                    "quoted_status_id_str": "111",
                    "in_reply_to_status_id_str": "222"
                }
            }
        });
        assert_eq!(
            referenced_tweet(&raw),
            Some((ContextKind::Quote, "111".to_string()))
        );
    }

    #[test]
    fn test_referenced_tweet_reads_v2_shape() {
        let raw = json!({
            "referenced_tweets": [
                { "type": "replied_to", "id": "333" }
            ]
        });
        assert_eq!(
            referenced_tweet(&raw),
            Some((ContextKind::Reply, "333".to_string()))
        );
        assert_eq!(referenced_tweet(&json!({})), None);
    }

    #[test]
    fn test_tweet_url() {
        let client =
            TwitterClient::new("https://api.example.test/2/", "t", Duration::from_secs(1)).unwrap();
        assert!(client
            .tweet_url("42")
            .starts_with("https://api.example.test/2/tweets/42?expansions=author_id"));
    }
}
