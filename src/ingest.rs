use crate::db::{self, DbPool, NewPost};
use crate::error::Result;
use crate::settings::settings;
use crate::utils::junkipedia::{
    month_windows, now_timestamp, ChannelParam, JunkipediaClient, PostQuery, PostsPage,
};
use crate::utils::logs;
use chrono::NaiveDate;
use strum::IntoEnumIterator;

#[derive(Debug, Clone)]
pub struct IngestPlan {
    pub channel: String,
    pub param: ChannelParam,
    /// `None` runs a single unbounded window.
    pub range: Option<(NaiveDate, NaiveDate)>,
    pub max_pages: u32,
}

impl IngestPlan {
    pub fn from_settings() -> Self {
        let s = &settings().junkipedia;
        Self {
            channel: s.channel_id.clone(),
            param: ChannelParam::ChannelIds,
            range: None,
            max_pages: s.max_pages,
        }
    }

    pub fn queries(&self) -> Vec<PostQuery> {
        let mut base = PostQuery::for_channel(&self.channel);
        base.param = self.param;

        match self.range {
            Some((from, to)) => month_windows(from, to)
                .into_iter()
                .map(|(start, end)| base.clone().window(start, end))
                .collect(),
            None => vec![base],
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IngestReport {
    pub fetched: usize,
    pub inserted: usize,
    pub duplicates: usize,
    pub malformed: usize,
    pub failed_windows: usize,
}

/// Whether another page should be requested after `page` came back.
pub fn wants_next_page(page: &PostsPage, per_page: u32, page_number: u32, max_pages: u32) -> bool {
    if page_number >= max_pages || page.is_empty() {
        return false;
    }
    page.next.is_some() || page.len() >= per_page as usize
}

async fn fetch_window(
    client: &JunkipediaClient,
    query: &PostQuery,
    max_pages: u32,
    report: &mut IngestReport,
) -> Result<Vec<NewPost>> {
    let now = now_timestamp();
    let mut rows = Vec::new();
    let mut query = query.clone();

    loop {
        let page = client.posts(&query).await?;
        report.fetched += page.len();
        report.malformed += page.malformed;
        rows.extend(page.posts.iter().map(|p| p.normalize(now)));

        if !wants_next_page(&page, query.per_page, query.page, max_pages) {
            break;
        }
        query.page += 1;
    }

    Ok(rows)
}

/// Windows run one after another; a failing window is logged and skipped.
pub async fn run_ingest(
    pool: &DbPool,
    client: &JunkipediaClient,
    plan: &IngestPlan,
) -> Result<IngestReport> {
    let mut report = IngestReport::default();

    for query in plan.queries() {
        let label = window_label(&query);
        let rows = match fetch_window(client, &query, plan.max_pages, &mut report).await {
            Ok(rows) => rows,
            Err(e) => {
                logs::log_ingest_window_failed(&label, &e.to_string());
                report.failed_windows += 1;
                continue;
            }
        };

        let candidates = rows.len();
        let pool = pool.clone();
        let inserted = tokio::task::spawn_blocking(move || -> Result<usize> {
            let mut conn = pool.get()?;
            Ok(db::insert_posts(&mut conn, rows)?)
        })
        .await??;
        report.inserted += inserted;
        report.duplicates += candidates - inserted;
        logs::log_ingest_window(&label, candidates, inserted);
    }

    Ok(report)
}

fn window_label(query: &PostQuery) -> String {
    match (query.published_from, query.published_to) {
        (Some(from), Some(to)) => format!("{from}..{to}"),
        _ => "all time".to_string(),
    }
}

#[derive(Debug, Clone)]
pub struct ProbeResult {
    pub param: ChannelParam,
    pub outcome: std::result::Result<usize, String>,
}

/// Runs the same first-page request once per channel parameter spelling.
pub async fn probe_channel_params(client: &JunkipediaClient, channel: &str) -> Vec<ProbeResult> {
    let mut results = Vec::new();
    for param in ChannelParam::iter() {
        let mut query = PostQuery::for_channel(channel);
        query.param = param;
        let outcome = client
            .posts(&query)
            .await
            .map(|page| page.len())
            .map_err(|e| e.to_string());
        results.push(ProbeResult { param, outcome });
    }
    results
}
