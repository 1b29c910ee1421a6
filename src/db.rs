use crate::analysis::AnalysisKey;
use crate::error::{Error, Result};
use crate::schema::{pledges, posts, reply_contexts, tweet_analysis};
use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool};
use diesel::sqlite::SqliteConnection;
use diesel_migrations::{embed_migrations, EmbeddedMigrations, MigrationHarness};
use serde::{Deserialize, Serialize};
use strum::{Display, EnumString};

pub type DbPool = Pool<ConnectionManager<SqliteConnection>>;

pub const MIGRATIONS: EmbeddedMigrations = embed_migrations!("migrations");

pub fn establish_pool(database_url: &str) -> Result<DbPool> {
    establish_pool_with(database_url, 5)
}

pub fn establish_pool_with(database_url: &str, max_size: u32) -> Result<DbPool> {
    let manager = ConnectionManager::<SqliteConnection>::new(database_url);
    let pool = Pool::builder()
        .max_size(max_size)
        .connection_customizer(Box::new(SqlitePragmas))
        .build(manager)?;
    Ok(pool)
}

/// Pragmas are per connection, so each pooled connection gets them when opened.
#[derive(Debug)]
struct SqlitePragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for SqlitePragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        configure_connection(conn).map_err(diesel::r2d2::Error::QueryError)
    }
}

pub fn configure_connection(conn: &mut SqliteConnection) -> QueryResult<()> {
    conn.batch_execute("PRAGMA busy_timeout = 2000;")?;
    conn.batch_execute("PRAGMA journal_mode = WAL;")?;
    conn.batch_execute("PRAGMA synchronous = NORMAL;")?;
    conn.batch_execute("PRAGMA foreign_keys = ON;")?;
    Ok(())
}

pub fn run_migrations(conn: &mut SqliteConnection) -> Result<usize> {
    let applied = conn
        .run_pending_migrations(MIGRATIONS)
        .map_err(|e| Error::Migration(e.to_string()))?;
    Ok(applied.len())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display, EnumString, Serialize, Deserialize)]
#[strum(serialize_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum PostType {
    Tweet,
    Reply,
    Quoted,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngagementMetrics {
    #[serde(default)]
    pub likes: i64,
    #[serde(default)]
    pub retweets: i64,
    #[serde(default)]
    pub replies: i64,
    #[serde(default)]
    pub quotes: i64,
}

impl EngagementMetrics {
    /// Popularity as ranked by the browse view. Quotes are deliberately left out.
    pub fn popularity(&self) -> i64 {
        self.likes + self.retweets + self.replies
    }
}

#[derive(Queryable, Selectable, Identifiable, Debug, Clone)]
#[diesel(table_name = posts)]
pub struct Post {
    pub id: i32,
    pub junkipedia_id: String,
    pub tweet_id: Option<String>,
    pub author_username: Option<String>,
    pub content: String,
    pub post_type: String,
    pub published_at: i64,
    pub engagement_metrics: String,
    pub in_reply_to_screen_name: Option<String>,
    pub media_urls: String,
    pub raw_data: String,
    pub ingested_at: i64,
}

impl Post {
    pub fn metrics(&self) -> EngagementMetrics {
        serde_json::from_str(&self.engagement_metrics).unwrap_or_default()
    }

    pub fn media(&self) -> Vec<String> {
        serde_json::from_str(&self.media_urls).unwrap_or_default()
    }

    pub fn raw(&self) -> serde_json::Value {
        serde_json::from_str(&self.raw_data).unwrap_or(serde_json::Value::Null)
    }

    pub fn kind(&self) -> PostType {
        self.post_type.parse().unwrap_or(PostType::Tweet)
    }

    pub fn is_reply(&self) -> bool {
        self.in_reply_to_screen_name
            .as_deref()
            .is_some_and(|name| !name.is_empty())
    }
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = posts)]
pub struct NewPost {
    pub junkipedia_id: String,
    pub tweet_id: Option<String>,
    pub author_username: Option<String>,
    pub content: String,
    pub post_type: String,
    pub published_at: i64,
    pub engagement_metrics: String,
    pub in_reply_to_screen_name: Option<String>,
    pub media_urls: String,
    pub raw_data: String,
    pub ingested_at: i64,
}

#[derive(Queryable, Selectable, Identifiable, Associations, Debug, Clone, Serialize)]
#[diesel(table_name = reply_contexts)]
#[diesel(belongs_to(Post))]
pub struct ReplyContext {
    pub id: i32,
    pub post_id: i32,
    pub context_kind: String,
    pub reply_tweet_id: String,
    pub original_tweet_id: String,
    pub original_tweet_text: String,
    pub original_user_username: Option<String>,
    pub raw_data: Option<String>,
    pub updated_at: i64,
}

#[derive(Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = reply_contexts)]
#[diesel(treat_none_as_null = true)]
pub struct NewReplyContext {
    pub post_id: i32,
    pub context_kind: String,
    pub reply_tweet_id: String,
    pub original_tweet_id: String,
    pub original_tweet_text: String,
    pub original_user_username: Option<String>,
    pub raw_data: Option<String>,
    pub updated_at: i64,
}

#[derive(Queryable, Selectable, Identifiable, Associations, Debug, Clone)]
#[diesel(table_name = tweet_analysis)]
#[diesel(belongs_to(Post))]
pub struct AnalysisRow {
    pub id: i32,
    pub post_id: i32,
    pub subject: String,
    pub tweet_id: String,
    pub is_potentially_transphobic: bool,
    pub confidence_level: String,
    pub severity: String,
    pub concerns: String,
    pub explanation: String,
    pub media_analysis: Option<String>,
    pub images_analyzed: i32,
    pub source: String,
    pub analyzed_at: i64,
}

impl AnalysisRow {
    pub fn concern_list(&self) -> Vec<String> {
        serde_json::from_str(&self.concerns).unwrap_or_default()
    }

    pub fn key(&self) -> AnalysisKey {
        AnalysisKey {
            tweet_id: self.tweet_id.clone(),
            subject: self.subject.parse().unwrap_or_default(),
        }
    }
}

#[derive(Insertable, AsChangeset, Debug, Clone)]
#[diesel(table_name = tweet_analysis)]
#[diesel(treat_none_as_null = true)]
pub struct NewAnalysis {
    pub post_id: i32,
    pub subject: String,
    pub tweet_id: String,
    pub is_potentially_transphobic: bool,
    pub confidence_level: String,
    pub severity: String,
    pub concerns: String,
    pub explanation: String,
    pub media_analysis: Option<String>,
    pub images_analyzed: i32,
    pub source: String,
    pub analyzed_at: i64,
}

#[derive(Queryable, Selectable, Debug, Clone)]
#[diesel(table_name = pledges)]
pub struct Pledge {
    pub id: i32,
    pub display_name: Option<String>,
    pub email: String,
    pub is_public: bool,
    pub amount_per_post_cents: i64,
    pub monthly_cap_cents: Option<i64>,
    pub currency: String,
    pub stripe_customer_id: String,
    pub stripe_payment_method_id: String,
    pub status: String,
    pub created_at: i64,
}

#[derive(Insertable, Debug, Clone)]
#[diesel(table_name = pledges)]
pub struct NewPledge {
    pub display_name: Option<String>,
    pub email: String,
    pub is_public: bool,
    pub amount_per_post_cents: i64,
    pub monthly_cap_cents: Option<i64>,
    pub currency: String,
    pub stripe_customer_id: String,
    pub stripe_payment_method_id: String,
    pub status: String,
    pub created_at: i64,
}

pub fn insert_posts(conn: &mut SqliteConnection, new_posts: Vec<NewPost>) -> QueryResult<usize> {
    use crate::schema::posts::dsl::*;

    if new_posts.is_empty() {
        return Ok(0);
    }

    diesel::insert_or_ignore_into(posts)
        .values(&new_posts)
        .execute(conn)
}

pub fn load_recent_posts(conn: &mut SqliteConnection, limit: i64) -> QueryResult<Vec<Post>> {
    use crate::schema::posts::dsl::*;

    posts
        .order((published_at.desc(), id.desc()))
        .limit(limit)
        .select(Post::as_select())
        .load(conn)
}

pub fn find_post(conn: &mut SqliteConnection, post_id: i32) -> QueryResult<Option<Post>> {
    use crate::schema::posts::dsl::*;

    posts
        .find(post_id)
        .select(Post::as_select())
        .first(conn)
        .optional()
}

pub fn find_posts_by_junkipedia_id(
    conn: &mut SqliteConnection,
    vendor_id: &str,
) -> QueryResult<Vec<Post>> {
    use crate::schema::posts::dsl::*;

    posts
        .filter(junkipedia_id.eq(vendor_id))
        .select(Post::as_select())
        .load(conn)
}

pub fn find_posts_by_tweet_id(
    conn: &mut SqliteConnection,
    platform_id: &str,
) -> QueryResult<Vec<Post>> {
    use crate::schema::posts::dsl::*;

    posts
        .filter(tweet_id.eq(platform_id))
        .select(Post::as_select())
        .load(conn)
}

/// Posts whose tweet id or vendor id equals `any_id`.
pub fn posts_matching_any(conn: &mut SqliteConnection, any_id: &str) -> QueryResult<Vec<Post>> {
    use crate::schema::posts::dsl::*;

    posts
        .filter(tweet_id.eq(any_id).or(junkipedia_id.eq(any_id)))
        .select(Post::as_select())
        .load(conn)
}

/// Case-insensitive substring match on content. SQLite `LIKE` folds ASCII case.
pub fn search_posts_by_content(
    conn: &mut SqliteConnection,
    needle: &str,
) -> QueryResult<Vec<Post>> {
    use crate::schema::posts::dsl::*;

    let pattern = format!("%{}%", escape_like(needle));
    posts
        .filter(content.like(pattern).escape('\\'))
        .order(published_at.desc())
        .select(Post::as_select())
        .load(conn)
}

fn escape_like(needle: &str) -> String {
    let mut escaped = String::with_capacity(needle.len());
    for c in needle.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub fn update_post_type(
    conn: &mut SqliteConnection,
    target_id: i32,
    new_type: PostType,
) -> QueryResult<usize> {
    use crate::schema::posts::dsl::*;

    diesel::update(posts.find(target_id))
        .set(post_type.eq(new_type.to_string()))
        .execute(conn)
}

pub fn upsert_reply_context(
    conn: &mut SqliteConnection,
    entry: &NewReplyContext,
) -> QueryResult<ReplyContext> {
    diesel::insert_into(reply_contexts::table)
        .values(entry)
        .on_conflict(reply_contexts::post_id)
        .do_update()
        .set(entry)
        .execute(conn)?;

    reply_contexts::table
        .filter(reply_contexts::post_id.eq(entry.post_id))
        .select(ReplyContext::as_select())
        .first(conn)
}

pub fn get_reply_context(
    conn: &mut SqliteConnection,
    target_post_id: i32,
) -> QueryResult<Option<ReplyContext>> {
    reply_contexts::table
        .filter(reply_contexts::post_id.eq(target_post_id))
        .select(ReplyContext::as_select())
        .first(conn)
        .optional()
}

pub fn upsert_analysis(conn: &mut SqliteConnection, entry: &NewAnalysis) -> QueryResult<AnalysisRow> {
    diesel::insert_into(tweet_analysis::table)
        .values(entry)
        .on_conflict((tweet_analysis::post_id, tweet_analysis::subject))
        .do_update()
        .set(entry)
        .execute(conn)?;

    tweet_analysis::table
        .filter(tweet_analysis::post_id.eq(entry.post_id))
        .filter(tweet_analysis::subject.eq(&entry.subject))
        .select(AnalysisRow::as_select())
        .first(conn)
}

pub fn get_analyses(
    conn: &mut SqliteConnection,
    target_post_id: i32,
) -> QueryResult<Vec<AnalysisRow>> {
    tweet_analysis::table
        .filter(tweet_analysis::post_id.eq(target_post_id))
        .order(tweet_analysis::subject.asc())
        .select(AnalysisRow::as_select())
        .load(conn)
}

pub fn flagged_post_ids(conn: &mut SqliteConnection) -> QueryResult<Vec<i32>> {
    tweet_analysis::table
        .filter(tweet_analysis::is_potentially_transphobic.eq(true))
        .select(tweet_analysis::post_id)
        .distinct()
        .load(conn)
}

pub fn count_flagged_posts(conn: &mut SqliteConnection) -> QueryResult<i64> {
    tweet_analysis::table
        .filter(tweet_analysis::is_potentially_transphobic.eq(true))
        .select(diesel::dsl::count_distinct(tweet_analysis::post_id))
        .first(conn)
}

pub fn insert_pledge(conn: &mut SqliteConnection, entry: &NewPledge) -> QueryResult<Pledge> {
    diesel::insert_into(pledges::table)
        .values(entry)
        .returning(Pledge::as_returning())
        .get_result(conn)
}

/// Active pledge amounts, one per pledger.
pub fn active_pledge_amounts(conn: &mut SqliteConnection) -> QueryResult<Vec<i64>> {
    pledges::table
        .filter(pledges::status.eq("active"))
        .select(pledges::amount_per_post_cents)
        .load(conn)
}

pub fn recent_public_pledgers(conn: &mut SqliteConnection, limit: i64) -> QueryResult<Vec<Pledge>> {
    pledges::table
        .filter(pledges::is_public.eq(true))
        .filter(pledges::status.eq("active"))
        .order((pledges::created_at.desc(), pledges::id.desc()))
        .limit(limit)
        .select(Pledge::as_select())
        .load(conn)
}


#[cfg(test)]
mod tests {
    use super::testing::*;
    use super::*;

    #[test]
    fn test_insert_posts_ignores_duplicates() {
        let mut conn = memory_connection();
        let first = vec![
            sample_post("j1", "100", "first post", 1_000),
            sample_post("j2", "200", "second post", 2_000),
        ];
        assert_eq!(insert_posts(&mut conn, first).unwrap(), 2);

        let again = vec![
            sample_post("j1", "100", "first post", 1_000),
            sample_post("j3", "300", "third post", 3_000),
        ];
        assert_eq!(insert_posts(&mut conn, again).unwrap(), 1);

        let recent = load_recent_posts(&mut conn, 10).unwrap();
        let ids: Vec<&str> = recent.iter().map(|p| p.junkipedia_id.as_str()).collect();
        assert_eq!(ids, vec!["j3", "j2", "j1"]);
    }

    #[test]
    fn test_search_is_case_insensitive_and_escapes_wildcards() {
        let mut conn = memory_connection();
        insert_posts(
            &mut conn,
            vec![
                sample_post("j1", "100", "Women's Sports are for WOMEN", 1_000),
                sample_post("j2", "200", "Nothing to see", 2_000),
                sample_post("j3", "300", "100% sure", 3_000),
            ],
        )
        .unwrap();

        let hits = search_posts_by_content(&mut conn, "women").unwrap();
        assert_eq!(hits.len(), 1);
        assert_eq!(hits[0].junkipedia_id, "j1");

        let percent = search_posts_by_content(&mut conn, "0%").unwrap();
        assert_eq!(percent.len(), 1);
        assert_eq!(percent[0].junkipedia_id, "j3");
    }

    #[test]
    fn test_posts_matching_any_checks_both_ids() {
        let mut conn = memory_connection();
        insert_posts(
            &mut conn,
            vec![
                sample_post("j1", "100", "a", 1_000),
                sample_post("j2", "200", "b", 2_000),
            ],
        )
        .unwrap();

        assert_eq!(posts_matching_any(&mut conn, "j2").unwrap().len(), 1);
        assert_eq!(posts_matching_any(&mut conn, "100").unwrap().len(), 1);
        assert!(posts_matching_any(&mut conn, "999").unwrap().is_empty());
    }

    #[test]
    fn test_upsert_reply_context_keeps_one_row_per_post() {
        let mut conn = memory_connection();
        insert_posts(&mut conn, vec![sample_post("j1", "100", "reply", 1_000)]).unwrap();
        let post = find_posts_by_junkipedia_id(&mut conn, "j1").unwrap().remove(0);

        let mut entry = NewReplyContext {
            post_id: post.id,
            context_kind: "quote".into(),
            reply_tweet_id: "100".into(),
            original_tweet_id: "50".into(),
            original_tweet_text: "draft".into(),
            original_user_username: Some("someone".into()),
            raw_data: None,
            updated_at: 1,
        };
        upsert_reply_context(&mut conn, &entry).unwrap();

        entry.original_tweet_text = "final".into();
        entry.original_user_username = None;
        let stored = upsert_reply_context(&mut conn, &entry).unwrap();

        assert_eq!(stored.original_tweet_text, "final");
        assert!(stored.original_user_username.is_none());
        let count: i64 = reply_contexts::table.count().get_result(&mut conn).unwrap();
        assert_eq!(count, 1);
    }

    #[test]
    fn test_reply_context_requires_existing_post() {
        let mut conn = memory_connection();
        let entry = NewReplyContext {
            post_id: 42,
            context_kind: "reply".into(),
            reply_tweet_id: "1".into(),
            original_tweet_id: "2".into(),
            original_tweet_text: "x".into(),
            original_user_username: None,
            raw_data: None,
            updated_at: 1,
        };
        assert!(upsert_reply_context(&mut conn, &entry).is_err());
    }

    #[test]
    fn test_pledge_queries() {
        let mut conn = memory_connection();
        for (i, public) in [true, false, true].iter().enumerate() {
            insert_pledge(
                &mut conn,
                &NewPledge {
                    display_name: Some(format!("p{i}")),
                    email: format!("p{i}@example.com"),
                    is_public: *public,
                    amount_per_post_cents: 100 * (i as i64 + 1),
                    monthly_cap_cents: None,
                    currency: "usd".into(),
                    stripe_customer_id: format!("cus_{i}"),
                    stripe_payment_method_id: format!("pm_{i}"),
                    status: "active".into(),
                    created_at: i as i64,
                },
            )
            .unwrap();
        }

        let amounts = active_pledge_amounts(&mut conn).unwrap();
        assert_eq!(amounts.iter().sum::<i64>(), 600);

        let public = recent_public_pledgers(&mut conn, 10).unwrap();
        let names: Vec<_> = public.iter().filter_map(|p| p.display_name.clone()).collect();
        assert_eq!(names, vec!["p2".to_string(), "p0".to_string()]);
    }
}
