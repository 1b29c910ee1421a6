//! Hand-authored corrections to stored posts: post type overrides, reply/quote
//! context and analysis verdicts. Annotations are RON documents applied in a
//! single transaction and can be re-applied without creating duplicates.

use crate::analysis::{AnalysisInput, AnalysisKey, AnalysisSource, AnalysisSubject};
use crate::db::{self, AnalysisRow, NewReplyContext, Post, PostType, ReplyContext};
use crate::error::{Error, Result};
use chrono::Utc;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::Path;
use std::str::FromStr;
use strum::{Display, EnumString};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum PostSelector {
    JunkipediaId(String),
    TweetId(String),
    /// Either id kind.
    AnyId(String),
    /// Case-insensitive substring of the post content.
    ContentMatch(String),
}

impl fmt::Display for PostSelector {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PostSelector::JunkipediaId(id) => write!(f, "junkipedia:{id}"),
            PostSelector::TweetId(id) => write!(f, "tweet:{id}"),
            PostSelector::AnyId(id) => write!(f, "{id}"),
            PostSelector::ContentMatch(text) => write!(f, "match:{text}"),
        }
    }
}

impl FromStr for PostSelector {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        let s = s.trim();
        let selector = if let Some(id) = s.strip_prefix("junkipedia:") {
            PostSelector::JunkipediaId(id.to_string())
        } else if let Some(id) = s.strip_prefix("tweet:") {
            PostSelector::TweetId(id.to_string())
        } else if let Some(text) = s.strip_prefix("match:") {
            PostSelector::ContentMatch(text.to_string())
        } else {
            PostSelector::AnyId(s.to_string())
        };

        let empty = match &selector {
            PostSelector::JunkipediaId(v)
            | PostSelector::TweetId(v)
            | PostSelector::AnyId(v)
            | PostSelector::ContentMatch(v) => v.trim().is_empty(),
        };
        if empty {
            return Err(Error::Validation(format!("empty post selector '{s}'")));
        }
        Ok(selector)
    }
}

pub fn locate_post(conn: &mut SqliteConnection, selector: &PostSelector) -> Result<Post> {
    let mut matches = match selector {
        PostSelector::JunkipediaId(id) => db::find_posts_by_junkipedia_id(conn, id)?,
        PostSelector::TweetId(id) => db::find_posts_by_tweet_id(conn, id)?,
        PostSelector::AnyId(id) => db::posts_matching_any(conn, id)?,
        PostSelector::ContentMatch(text) => db::search_posts_by_content(conn, text)?,
    };

    match matches.len() {
        0 => Err(Error::NotFound(format!("no post for {selector}"))),
        1 => Ok(matches.remove(0)),
        count => Err(Error::AmbiguousSelector {
            selector: selector.to_string(),
            count,
        }),
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum ContextKind {
    Reply,
    Quote,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyContextInput {
    pub kind: ContextKind,
    /// Defaults to the located post's tweet id.
    #[serde(default)]
    pub reply_tweet_id: Option<String>,
    pub original_tweet_id: String,
    pub original_tweet_text: String,
    #[serde(default)]
    pub original_user_username: Option<String>,
    #[serde(default)]
    pub raw_data: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Annotation {
    pub target: PostSelector,
    #[serde(default)]
    pub post_type: Option<PostType>,
    #[serde(default)]
    pub reply_context: Option<ReplyContextInput>,
    #[serde(default)]
    pub analyses: Vec<AnalysisInput>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AnnotationFile {
    pub annotations: Vec<Annotation>,
}

impl AnnotationFile {
    pub fn from_ron(text: &str) -> Result<Self> {
        ron::from_str(text).map_err(|e| Error::Validation(format!("annotation file: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Validation(format!("{}: {e}", path.display())))?;
        Self::from_ron(&text)
    }

    pub fn validate(&self) -> Result<()> {
        for annotation in &self.annotations {
            for analysis in &annotation.analyses {
                analysis.validate()?;
                if let Some(key) = &analysis.tweet_id {
                    AnalysisKey::parse(key)?;
                }
            }
            if let Some(ctx) = &annotation.reply_context {
                if ctx.original_tweet_id.trim().is_empty() {
                    return Err(Error::Validation(format!(
                        "{}: reply context without original tweet id",
                        annotation.target
                    )));
                }
                if let Some(raw) = &ctx.raw_data {
                    serde_json::from_str::<serde_json::Value>(raw)?;
                }
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PatchReport {
    pub annotations: usize,
    pub post_types_updated: usize,
    pub contexts_written: usize,
    pub analyses_written: usize,
}

/// Picks the tweet id an analysis row is stored under. An explicit key must name
/// the post's own tweet, or the quoted tweet for a quoted analysis.
fn analysis_target(
    post: &Post,
    context: Option<&ReplyContext>,
    input: &AnalysisInput,
) -> Result<(AnalysisSubject, String)> {
    let key = input.tweet_id.as_deref().map(AnalysisKey::parse).transpose()?;
    let subject = match &key {
        Some(k) if k.subject == AnalysisSubject::Quoted => AnalysisSubject::Quoted,
        _ => input.subject,
    };

    let expected = match subject {
        AnalysisSubject::Post => post.tweet_id.clone().ok_or_else(|| {
            Error::Validation(format!("post {} has no tweet id to analyse", post.id))
        })?,
        AnalysisSubject::Quoted => context
            .filter(|c| c.context_kind == ContextKind::Quote.to_string())
            .map(|c| c.original_tweet_id.clone())
            .ok_or_else(|| {
                Error::Validation(format!(
                    "post {} has no quote context for a quoted analysis",
                    post.id
                ))
            })?,
    };

    if let Some(key) = key {
        if key.tweet_id != expected {
            return Err(Error::Validation(format!(
                "analysis key {} does not match {subject} tweet {expected} of post {}",
                key.legacy_key(),
                post.id
            )));
        }
    }

    Ok((subject, expected))
}

fn context_row(post: &Post, input: &ReplyContextInput, now: i64) -> Result<NewReplyContext> {
    let reply_tweet_id = match (&input.reply_tweet_id, &post.tweet_id) {
        (Some(given), Some(actual)) if given != actual => {
            return Err(Error::Validation(format!(
                "reply_tweet_id {given} does not belong to post {} (tweet {actual})",
                post.id
            )))
        }
        (Some(given), _) => given.clone(),
        (None, Some(actual)) => actual.clone(),
        (None, None) => {
            return Err(Error::Validation(format!(
                "post {} has no tweet id; give reply_tweet_id",
                post.id
            )))
        }
    };

    Ok(NewReplyContext {
        post_id: post.id,
        context_kind: input.kind.to_string(),
        reply_tweet_id,
        original_tweet_id: input.original_tweet_id.clone(),
        original_tweet_text: input.original_tweet_text.clone(),
        original_user_username: input.original_user_username.clone(),
        raw_data: input.raw_data.clone(),
        updated_at: now,
    })
}

pub fn store_reply_context(
    conn: &mut SqliteConnection,
    post: &Post,
    input: &ReplyContextInput,
    now: i64,
) -> Result<ReplyContext> {
    Ok(db::upsert_reply_context(conn, &context_row(post, input, now)?)?)
}

pub fn store_analysis(
    conn: &mut SqliteConnection,
    post: &Post,
    context: Option<&ReplyContext>,
    input: &AnalysisInput,
    source: AnalysisSource,
    now: i64,
) -> Result<AnalysisRow> {
    input.validate()?;
    let (subject, tweet_id) = analysis_target(post, context, input)?;
    let mut input = input.clone();
    input.subject = subject;
    Ok(db::upsert_analysis(
        conn,
        &input.to_row(post.id, &tweet_id, source, now),
    )?)
}

fn apply_annotation(
    conn: &mut SqliteConnection,
    annotation: &Annotation,
    now: i64,
    report: &mut PatchReport,
) -> Result<()> {
    let post = locate_post(conn, &annotation.target)?;

    if let Some(post_type) = annotation.post_type {
        if post.kind() != post_type {
            db::update_post_type(conn, post.id, post_type)?;
            report.post_types_updated += 1;
        }
    }

    let context = match &annotation.reply_context {
        Some(input) => {
            let stored = store_reply_context(conn, &post, input, now)?;
            report.contexts_written += 1;
            Some(stored)
        }
        None => db::get_reply_context(conn, post.id)?,
    };

    for input in &annotation.analyses {
        store_analysis(
            conn,
            &post,
            context.as_ref(),
            input,
            AnalysisSource::Manual,
            now,
        )?;
        report.analyses_written += 1;
    }

    report.annotations += 1;
    Ok(())
}

/// Applies every annotation or none of them.
pub fn apply_annotations(conn: &mut SqliteConnection, file: &AnnotationFile) -> Result<PatchReport> {
    file.validate()?;
    let now = Utc::now().timestamp();

    conn.transaction::<_, Error, _>(|conn| {
        let mut report = PatchReport::default();
        for annotation in &file.annotations {
            apply_annotation(conn, annotation, now, &mut report)?;
        }
        Ok(report)
    })
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldCheck {
    pub field: String,
    pub expected: String,
    pub actual: String,
}

impl FieldCheck {
    fn new(field: impl Into<String>, expected: impl ToString, actual: impl ToString) -> Self {
        Self {
            field: field.into(),
            expected: expected.to_string(),
            actual: actual.to_string(),
        }
    }

    pub fn matches(&self) -> bool {
        self.expected == self.actual
    }
}

fn opt(value: &Option<String>) -> String {
    value.clone().unwrap_or_else(|| "<none>".to_string())
}

/// Reads back what an annotation should have written and compares it field by field.
pub fn verify_annotation(
    conn: &mut SqliteConnection,
    annotation: &Annotation,
) -> Result<Vec<FieldCheck>> {
    let post = locate_post(conn, &annotation.target)?;
    let mut checks = Vec::new();

    if let Some(expected) = annotation.post_type {
        checks.push(FieldCheck::new("post_type", expected, &post.post_type));
    }

    let context = db::get_reply_context(conn, post.id)?;
    if let Some(expected) = &annotation.reply_context {
        match &context {
            Some(actual) => {
                checks.push(FieldCheck::new(
                    "reply_context.kind",
                    expected.kind,
                    &actual.context_kind,
                ));
                checks.push(FieldCheck::new(
                    "reply_context.original_tweet_id",
                    &expected.original_tweet_id,
                    &actual.original_tweet_id,
                ));
                checks.push(FieldCheck::new(
                    "reply_context.original_tweet_text",
                    &expected.original_tweet_text,
                    &actual.original_tweet_text,
                ));
                checks.push(FieldCheck::new(
                    "reply_context.original_user_username",
                    opt(&expected.original_user_username),
                    opt(&actual.original_user_username),
                ));
            }
            None => checks.push(FieldCheck::new("reply_context", "present", "<missing>")),
        }
    }

    let stored = db::get_analyses(conn, post.id)?;
    for input in &annotation.analyses {
        let (subject, tweet_id) = analysis_target(&post, context.as_ref(), input)?;
        let prefix = format!("analysis[{subject}]");
        let Some(actual) = stored.iter().find(|a| a.subject == subject.to_string()) else {
            checks.push(FieldCheck::new(prefix, "present", "<missing>"));
            continue;
        };

        checks.push(FieldCheck::new(
            format!("{prefix}.tweet_id"),
            &tweet_id,
            &actual.tweet_id,
        ));
        checks.push(FieldCheck::new(
            format!("{prefix}.is_potentially_transphobic"),
            input.is_potentially_transphobic,
            actual.is_potentially_transphobic,
        ));
        checks.push(FieldCheck::new(
            format!("{prefix}.confidence_level"),
            input.confidence_level,
            &actual.confidence_level,
        ));
        checks.push(FieldCheck::new(
            format!("{prefix}.severity"),
            input.severity,
            &actual.severity,
        ));
        checks.push(FieldCheck::new(
            format!("{prefix}.concerns"),
            input.concerns.join(", "),
            actual.concern_list().join(", "),
        ));
        checks.push(FieldCheck::new(
            format!("{prefix}.explanation"),
            &input.explanation,
            &actual.explanation,
        ));
        checks.push(FieldCheck::new(
            format!("{prefix}.media_analysis"),
            opt(&input.media_analysis),
            opt(&actual.media_analysis),
        ));
        checks.push(FieldCheck::new(
            format!("{prefix}.images_analyzed"),
            input.images_analyzed,
            actual.images_analyzed,
        ));
    }

    Ok(checks)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::{Confidence, Severity};
    use crate::db::testing::{memory_connection, sample_post};
    use crate::schema::tweet_analysis;

    const FILE: &str = r#"(
        annotations: [
            (
                target: ContentMatch("the quoted bit"),
                post_type: Some(quoted),
                reply_context: Some((
                    kind: quote,
                    original_tweet_id: "500",
                    original_tweet_text: "Original claim",
                    original_user_username: Some("origin"),
                )),
                analyses: [
                    (
                        is_potentially_transphobic: true,
                        confidence_level: high,
                        severity: medium,
                        concerns: ["mockery"],
                        explanation: "Mocks the quoted person.",
                    ),
                    (
                        tweet_id: Some("quoted_500"),
                        is_potentially_transphobic: false,
                        confidence_level: medium,
                        severity: none,
                        explanation: "The quoted tweet itself is neutral.",
                    ),
                ],
            ),
        ],
    )"#;

    fn seeded() -> SqliteConnection {
        let mut conn = memory_connection();
        db::insert_posts(
            &mut conn,
            vec![
                sample_post("j1", "100", "Look at THE QUOTED BIT here", 1_000),
                sample_post("j2", "200", "unrelated", 2_000),
            ],
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_selector_parsing() {
        assert_eq!(
            "tweet:42".parse::<PostSelector>().unwrap(),
            PostSelector::TweetId("42".into())
        );
        assert_eq!(
            "match:some words".parse::<PostSelector>().unwrap(),
            PostSelector::ContentMatch("some words".into())
        );
        assert_eq!(
            "42".parse::<PostSelector>().unwrap(),
            PostSelector::AnyId("42".into())
        );
        assert!("tweet:".parse::<PostSelector>().is_err());
    }

    #[test]
    fn test_locate_post_reports_ambiguity() {
        let mut conn = seeded();
        let ambiguous = PostSelector::ContentMatch("e".into());
        assert!(matches!(
            locate_post(&mut conn, &ambiguous),
            Err(Error::AmbiguousSelector { count: 2, .. })
        ));
        assert!(matches!(
            locate_post(&mut conn, &PostSelector::TweetId("999".into())),
            Err(Error::NotFound(_))
        ));
    }

    #[test]
    fn test_apply_is_idempotent() {
        let mut conn = seeded();
        let file = AnnotationFile::from_ron(FILE).unwrap();

        let first = apply_annotations(&mut conn, &file).unwrap();
        assert_eq!(first.post_types_updated, 1);
        assert_eq!(first.contexts_written, 1);
        assert_eq!(first.analyses_written, 2);

        let second = apply_annotations(&mut conn, &file).unwrap();
        assert_eq!(second.post_types_updated, 0);

        let rows: i64 = tweet_analysis::table.count().get_result(&mut conn).unwrap();
        assert_eq!(rows, 2);

        let post = locate_post(&mut conn, &PostSelector::TweetId("100".into())).unwrap();
        assert_eq!(post.kind(), PostType::Quoted);
        let analyses = db::get_analyses(&mut conn, post.id).unwrap();
        let quoted = analyses.iter().find(|a| a.subject == "quoted").unwrap();
        assert_eq!(quoted.tweet_id, "500");
        assert!(!quoted.is_potentially_transphobic);
    }

    #[test]
    fn test_verify_reports_all_matching_after_apply() {
        let mut conn = seeded();
        let file = AnnotationFile::from_ron(FILE).unwrap();
        let annotation = &file.annotations[0];

        let before = verify_annotation(&mut conn, annotation).unwrap();
        assert!(before.iter().any(|c| !c.matches()));

        apply_annotations(&mut conn, &file).unwrap();
        let after = verify_annotation(&mut conn, annotation).unwrap();
        let failures: Vec<_> = after.iter().filter(|c| !c.matches()).collect();
        assert!(failures.is_empty(), "mismatches: {failures:?}");
    }

    #[test]
    fn test_failed_annotation_rolls_back_everything() {
        let mut conn = seeded();
        let file = AnnotationFile {
            annotations: vec![
                Annotation {
                    target: PostSelector::TweetId("200".into()),
                    post_type: Some(PostType::Reply),
                    reply_context: None,
                    analyses: vec![],
                },
                Annotation {
                    target: PostSelector::TweetId("404".into()),
                    post_type: Some(PostType::Reply),
                    reply_context: None,
                    analyses: vec![],
                },
            ],
        };

        assert!(apply_annotations(&mut conn, &file).is_err());
        let post = locate_post(&mut conn, &PostSelector::TweetId("200".into())).unwrap();
        assert_eq!(post.kind(), PostType::Tweet);
    }

    #[test]
    fn test_reply_tweet_id_must_belong_to_post() {
        let mut conn = seeded();
        let file = AnnotationFile {
            annotations: vec![Annotation {
                target: PostSelector::TweetId("100".into()),
                post_type: None,
                reply_context: Some(ReplyContextInput {
                    kind: ContextKind::Reply,
                    reply_tweet_id: Some("200".into()),
                    original_tweet_id: "1".into(),
                    original_tweet_text: "x".into(),
                    original_user_username: None,
                    raw_data: None,
                }),
                analyses: vec![],
            }],
        };
        assert!(matches!(
            apply_annotations(&mut conn, &file),
            Err(Error::Validation(_))
        ));
    }

    fn keyed_verdict(key: &str) -> AnalysisInput {
        AnalysisInput {
            subject: AnalysisSubject::Post,
            tweet_id: Some(key.into()),
            is_potentially_transphobic: false,
            confidence_level: Confidence::Medium,
            severity: Severity::None,
            concerns: vec![],
            explanation: "neutral".into(),
            media_analysis: None,
            images_analyzed: 0,
        }
    }

    #[test]
    fn test_analysis_key_must_name_post_or_quoted_tweet() {
        let mut conn = seeded();
        apply_annotations(&mut conn, &AnnotationFile::from_ron(FILE).unwrap()).unwrap();
        let before: i64 = tweet_analysis::table.count().get_result(&mut conn).unwrap();

        for key in ["999", "quoted_777"] {
            let file = AnnotationFile {
                annotations: vec![Annotation {
                    target: PostSelector::TweetId("100".into()),
                    post_type: None,
                    reply_context: None,
                    analyses: vec![keyed_verdict(key)],
                }],
            };
            assert!(
                matches!(apply_annotations(&mut conn, &file), Err(Error::Validation(_))),
                "{key} was accepted"
            );
        }

        let after: i64 = tweet_analysis::table.count().get_result(&mut conn).unwrap();
        assert_eq!(before, after);
        let post = locate_post(&mut conn, &PostSelector::TweetId("100".into())).unwrap();
        let stored = db::get_analyses(&mut conn, post.id).unwrap();
        assert!(stored.iter().all(|r| r.tweet_id == "100" || r.tweet_id == "500"));
    }

    #[test]
    fn test_quoted_key_needs_quote_context() {
        let mut conn = seeded();
        let file = AnnotationFile {
            annotations: vec![Annotation {
                target: PostSelector::TweetId("200".into()),
                post_type: None,
                reply_context: None,
                analyses: vec![keyed_verdict("quoted_200")],
            }],
        };
        assert!(matches!(
            apply_annotations(&mut conn, &file),
            Err(Error::Validation(_))
        ));
    }

    #[test]
    fn test_quoted_analysis_needs_quote_context() {
        let mut conn = seeded();
        let file = AnnotationFile {
            annotations: vec![Annotation {
                target: PostSelector::TweetId("200".into()),
                post_type: None,
                reply_context: None,
                analyses: vec![AnalysisInput {
                    subject: AnalysisSubject::Quoted,
                    tweet_id: None,
                    is_potentially_transphobic: true,
                    confidence_level: Confidence::Low,
                    severity: Severity::Low,
                    concerns: vec![],
                    explanation: "x".into(),
                    media_analysis: None,
                    images_analyzed: 0,
                }],
            }],
        };
        assert!(apply_annotations(&mut conn, &file).is_err());
    }

    #[test]
    fn test_external_verdict_replaces_manual_one() {
        let mut conn = seeded();
        let file = AnnotationFile::from_ron(FILE).unwrap();
        apply_annotations(&mut conn, &file).unwrap();

        let post = locate_post(&mut conn, &PostSelector::TweetId("100".into())).unwrap();
        let context = db::get_reply_context(&mut conn, post.id).unwrap();
        let verdict = AnalysisInput {
            subject: AnalysisSubject::Post,
            tweet_id: None,
            is_potentially_transphobic: false,
            confidence_level: Confidence::Low,
            severity: Severity::None,
            concerns: vec![],
            explanation: "Reads as neutral.".into(),
            media_analysis: None,
            images_analyzed: 0,
        };
        let stored = store_analysis(
            &mut conn,
            &post,
            context.as_ref(),
            &verdict,
            AnalysisSource::External,
            99,
        )
        .unwrap();

        assert_eq!(stored.tweet_id, "100");
        assert_eq!(stored.source, "external");
        let rows = db::get_analyses(&mut conn, post.id).unwrap();
        assert_eq!(rows.len(), 2);
        assert!(rows.iter().all(|r| r.subject != "post" || !r.is_potentially_transphobic));
        let keys: Vec<String> = rows.iter().map(|r| r.key().legacy_key()).collect();
        assert_eq!(keys, vec!["100", "quoted_500"]);
    }
}
