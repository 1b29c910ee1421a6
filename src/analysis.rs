use crate::db::NewAnalysis;
use crate::error::{Error, Result};
use crate::settings::settings;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use strum::{Display, EnumString};

const LEGACY_QUOTED_PREFIX: &str = "quoted_";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Confidence {
    Low,
    Medium,
    High,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    None,
    Low,
    Medium,
    High,
}

/// What an analysis judges: the stored post itself, or the tweet it quotes.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Display, EnumString, Serialize, Deserialize,
)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AnalysisSubject {
    #[default]
    Post,
    Quoted,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum AnalysisSource {
    Manual,
    External,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnalysisKey {
    pub tweet_id: String,
    pub subject: AnalysisSubject,
}

impl AnalysisKey {
    /// Accepts both a bare tweet id and the older `quoted_<id>` spelling.
    pub fn parse(key: &str) -> Result<Self> {
        let key = key.trim();
        let (tweet_id, subject) = match key.strip_prefix(LEGACY_QUOTED_PREFIX) {
            Some(rest) => (rest, AnalysisSubject::Quoted),
            None => (key, AnalysisSubject::Post),
        };

        if tweet_id.is_empty() || !tweet_id.chars().all(|c| c.is_ascii_digit()) {
            return Err(Error::Validation(format!("bad analysis key '{key}'")));
        }

        Ok(Self {
            tweet_id: tweet_id.to_string(),
            subject,
        })
    }

    pub fn legacy_key(&self) -> String {
        match self.subject {
            AnalysisSubject::Post => self.tweet_id.clone(),
            AnalysisSubject::Quoted => format!("{LEGACY_QUOTED_PREFIX}{}", self.tweet_id),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnalysisInput {
    #[serde(default)]
    pub subject: AnalysisSubject,
    /// Defaults to the target post's tweet id for `Post`, or the quoted tweet for `Quoted`.
    #[serde(default)]
    pub tweet_id: Option<String>,
    pub is_potentially_transphobic: bool,
    pub confidence_level: Confidence,
    pub severity: Severity,
    #[serde(default)]
    pub concerns: Vec<String>,
    pub explanation: String,
    #[serde(default)]
    pub media_analysis: Option<String>,
    #[serde(default)]
    pub images_analyzed: u32,
}

impl AnalysisInput {
    pub fn validate(&self) -> Result<()> {
        if self.explanation.trim().is_empty() {
            return Err(Error::Validation("analysis explanation is empty".into()));
        }
        if !self.is_potentially_transphobic && self.severity != Severity::None {
            return Err(Error::Validation(format!(
                "severity '{}' given for content judged not harmful",
                self.severity
            )));
        }
        if self.concerns.iter().any(|c| c.trim().is_empty()) {
            return Err(Error::Validation("blank entry in concerns".into()));
        }
        Ok(())
    }

    pub fn to_row(
        &self,
        post_id: i32,
        tweet_id: &str,
        source: AnalysisSource,
        analyzed_at: i64,
    ) -> NewAnalysis {
        NewAnalysis {
            post_id,
            subject: self.subject.to_string(),
            tweet_id: tweet_id.to_string(),
            is_potentially_transphobic: self.is_potentially_transphobic,
            confidence_level: self.confidence_level.to_string(),
            severity: self.severity.to_string(),
            concerns: serde_json::to_string(&self.concerns).unwrap_or_else(|_| "[]".into()),
            explanation: self.explanation.clone(),
            media_analysis: self.media_analysis.clone(),
            images_analyzed: self.images_analyzed.min(i32::MAX as u32) as i32,
            source: source.to_string(),
            analyzed_at,
        }
    }
}

#[derive(Debug, Serialize)]
struct AnalyzeRequest<'a> {
    text: &'a str,
    image_urls: &'a [String],
}

/// Client for the external analysis service. It returns a verdict shaped like [`AnalysisInput`].
pub struct AnalysisClient {
    http: reqwest::Client,
    endpoint: String,
    api_key: Option<String>,
}

impl AnalysisClient {
    pub fn new(endpoint: &str, api_key: Option<String>, timeout: Duration) -> Result<Self> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            endpoint: endpoint.to_string(),
            api_key,
        })
    }

    pub fn from_settings() -> Result<Self> {
        let s = &settings().analysis;
        let endpoint = s
            .endpoint
            .as_deref()
            .ok_or(Error::NotConfigured("analysis.endpoint"))?;
        let api_key = std::env::var("ANALYSIS_API_KEY").ok();
        Self::new(endpoint, api_key, Duration::from_secs(s.timeout_secs))
    }

    pub async fn analyze(&self, text: &str, image_urls: &[String]) -> Result<AnalysisInput> {
        let mut request = self
            .http
            .post(&self.endpoint)
            .json(&AnalyzeRequest { text, image_urls });
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let response = request.send().await?;
        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(Error::vendor(status, &body));
        }

        let mut verdict: AnalysisInput = response.json().await?;
        verdict.images_analyzed = verdict.images_analyzed.max(image_urls.len() as u32);
        verdict.validate()?;
        Ok(verdict)
    }
}
