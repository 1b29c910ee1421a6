use super::AppState;
use crate::browse::{browse, BrowsePage, BrowseQuery, PostCard};
use crate::db::{self, AnalysisRow, ReplyContext};
use crate::error::{Error, Result};
use crate::pledge::{self, CreatePledgeRequest, CreatedPledge, PledgeStats, PublicPledger};
use crate::settings::settings;
use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use chrono::Utc;
use serde::Serialize;
use std::collections::HashSet;

pub async fn health() -> &'static str {
    "ok"
}

pub async fn list_posts(
    State(state): State<AppState>,
    Query(query): Query<BrowseQuery>,
) -> Result<Json<BrowsePage>> {
    let limit = settings().browse.fetch_limit;
    let (posts, flagged) = state
        .with_conn(move |conn| {
            let posts = db::load_recent_posts(conn, limit)?;
            let flagged: HashSet<i32> = db::flagged_post_ids(conn)?.into_iter().collect();
            Ok((posts, flagged))
        })
        .await?;

    let page = browse(
        &posts,
        &query,
        &flagged,
        settings().browse.page_size,
        Utc::now(),
    );
    Ok(Json(page))
}

#[derive(Debug, Serialize)]
pub struct AnalysisView {
    /// `<tweet id>` or `quoted_<tweet id>`.
    pub key: String,
    pub subject: String,
    pub tweet_id: String,
    pub is_potentially_transphobic: bool,
    pub confidence_level: String,
    pub severity: String,
    pub concerns: Vec<String>,
    pub explanation: String,
    pub media_analysis: Option<String>,
    pub images_analyzed: i32,
    pub source: String,
}

impl From<AnalysisRow> for AnalysisView {
    fn from(row: AnalysisRow) -> Self {
        Self {
            key: row.key().legacy_key(),
            concerns: row.concern_list(),
            subject: row.subject,
            tweet_id: row.tweet_id,
            is_potentially_transphobic: row.is_potentially_transphobic,
            confidence_level: row.confidence_level,
            severity: row.severity,
            explanation: row.explanation,
            media_analysis: row.media_analysis,
            images_analyzed: row.images_analyzed,
            source: row.source,
        }
    }
}

#[derive(Debug, Serialize)]
pub struct PostDetail {
    pub post: PostCard,
    pub reply_context: Option<ReplyContext>,
    pub analyses: Vec<AnalysisView>,
}

pub async fn get_post(State(state): State<AppState>, Path(id): Path<i32>) -> Result<Json<PostDetail>> {
    let (post, context, analyses) = state
        .with_conn(move |conn| {
            let post = db::find_post(conn, id)?.ok_or_else(|| Error::NotFound(format!("post {id}")))?;
            let context = db::get_reply_context(conn, id)?;
            let analyses = db::get_analyses(conn, id)?;
            Ok((post, context, analyses))
        })
        .await?;

    let flagged = analyses.iter().any(|a| a.is_potentially_transphobic);
    Ok(Json(PostDetail {
        post: PostCard::from_post(&post, flagged, Utc::now()),
        reply_context: context,
        analyses: analyses.into_iter().map(AnalysisView::from).collect(),
    }))
}

pub async fn pledge_stats(State(state): State<AppState>) -> Result<Json<PledgeStats>> {
    let stats = state.with_conn(pledge::pledge_stats).await?;
    Ok(Json(stats))
}

pub async fn recent_public_pledgers(
    State(state): State<AppState>,
) -> Result<Json<Vec<PublicPledger>>> {
    let limit = settings().pledge.recent_pledgers;
    let pledgers = state
        .with_conn(move |conn| pledge::recent_public_pledgers(conn, limit))
        .await?;
    Ok(Json(pledgers))
}

pub async fn create_pledge(
    State(state): State<AppState>,
    Json(request): Json<CreatePledgeRequest>,
) -> Result<(StatusCode, Json<CreatedPledge>)> {
    let stripe = state.stripe.clone().ok_or(Error::NotConfigured("payments"))?;
    let created = pledge::create_pledge(&state.pool, &stripe, request).await?;
    Ok((StatusCode::CREATED, Json(created)))
}

#[cfg(test)]
mod tests {
    use super::super::{router, AppState};
    use crate::analysis::{AnalysisInput, AnalysisSource, AnalysisSubject, Confidence, Severity};
    use crate::db::{self, testing::memory_pool, testing::sample_post, EngagementMetrics};
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use serde_json::Value;
    use tower::ServiceExt;

    fn seeded_state() -> AppState {
        let pool = memory_pool();
        {
            let mut conn = pool.get().unwrap();
            let mut popular = sample_post("j1", "101", "Most popular post", 1_000);
            popular.engagement_metrics = serde_json::to_string(&EngagementMetrics {
                likes: 9_000,
                retweets: 1_000,
                replies: 500,
                quotes: 0,
            })
            .unwrap();
            let mut reply = sample_post("j2", "102", "@someone a reply", 2_000);
            reply.in_reply_to_screen_name = Some("someone".into());
            db::insert_posts(
                &mut conn,
                vec![popular, reply, sample_post("j3", "103", "Plain tweet", 3_000)],
            )
            .unwrap();

            let flagged = db::find_posts_by_tweet_id(&mut conn, "102").unwrap().remove(0);
            let verdict = AnalysisInput {
                subject: AnalysisSubject::Post,
                tweet_id: None,
                is_potentially_transphobic: true,
                confidence_level: Confidence::Medium,
                severity: Severity::Low,
                concerns: vec!["dismissive".into()],
                explanation: "Dismisses the reply target.".into(),
                media_analysis: None,
                images_analyzed: 0,
            };
            db::upsert_analysis(
                &mut conn,
                &verdict.to_row(flagged.id, "102", AnalysisSource::Manual, 0),
            )
            .unwrap();
        }
        AppState::new(pool, None)
    }

    async fn get_json(state: AppState, uri: &str) -> (StatusCode, Value) {
        let response = router(state)
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, body)
    }

    fn junkipedia_ids(body: &Value) -> Vec<String> {
        body["posts"]
            .as_array()
            .unwrap()
            .iter()
            .map(|p| p["junkipedia_id"].as_str().unwrap().to_string())
            .collect()
    }

    #[tokio::test]
    async fn test_list_posts_popular() {
        let (status, body) = get_json(seeded_state(), "/api/posts?filter=popular").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["total"], 3);
        assert_eq!(junkipedia_ids(&body)[0], "j1");
        assert_eq!(body["posts"][0]["labels"]["likes"], "9.0K");
    }

    #[tokio::test]
    async fn test_list_posts_search_and_replies() {
        let (_, body) = get_json(seeded_state(), "/api/posts?q=PLAIN").await;
        assert_eq!(junkipedia_ids(&body), vec!["j3"]);

        let (_, body) = get_json(seeded_state(), "/api/posts?filter=replies").await;
        assert_eq!(junkipedia_ids(&body), vec!["j2"]);
        assert_eq!(body["posts"][0]["flagged"], true);
    }

    #[tokio::test]
    async fn test_unknown_filter_is_rejected() {
        let (status, _) = get_json(seeded_state(), "/api/posts?filter=bogus").await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_post_detail_and_missing_post() {
        let (status, body) = get_json(seeded_state(), "/api/posts/2").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["analyses"][0]["concerns"][0], "dismissive");
        assert_eq!(body["analyses"][0]["key"], "102");
        assert!(body["reply_context"].is_null());

        let (status, body) = get_json(seeded_state(), "/api/posts/99").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert!(body["error"].as_str().unwrap().contains("post 99"));
    }

    #[tokio::test]
    async fn test_pledge_stats_empty() {
        let (status, body) = get_json(seeded_state(), "/api/pledge-stats").await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["pledger_count"], 0);
        assert_eq!(body["flagged_post_count"], 1);

        let (_, body) = get_json(seeded_state(), "/api/recent-public-pledgers").await;
        assert_eq!(body, Value::Array(vec![]));
    }

    #[tokio::test]
    async fn test_create_pledge_without_stripe() {
        let response = router(seeded_state())
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/api/create-pledge")
                    .header("content-type", "application/json")
                    .body(Body::from(
                        r#"{"payment_method_id":"pm_1","email":"a@b.co","amount_per_post_cents":500}"#,
                    ))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    }
}
