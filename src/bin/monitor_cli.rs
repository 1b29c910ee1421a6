use anyhow::{bail, Context, Result};
use chrono::NaiveDate;
use clap::{Parser, Subcommand, ValueEnum};
use monitor_feed::analysis::{AnalysisClient, AnalysisSource, AnalysisSubject};
use monitor_feed::annotate::{
    locate_post, store_analysis, store_reply_context, verify_annotation, AnnotationFile,
    ContextKind, PostSelector, ReplyContextInput,
};
use monitor_feed::db::{self, establish_pool, run_migrations, DbPool, PostType};
use monitor_feed::ingest::{probe_channel_params, run_ingest, IngestPlan};
use monitor_feed::settings::settings;
use monitor_feed::utils::junkipedia::{now_timestamp, ChannelParam, JunkipediaClient, PostQuery};
use monitor_feed::utils::logs;
use monitor_feed::utils::twitter::{referenced_tweet, TwitterClient};
use std::path::PathBuf;

#[derive(Clone, Copy, ValueEnum)]
enum ParamSpelling {
    /// `channel_id=<id>`
    Single,
    /// `channel_ids[]=<id>`
    List,
}

impl From<ParamSpelling> for ChannelParam {
    fn from(spelling: ParamSpelling) -> Self {
        match spelling {
            ParamSpelling::Single => ChannelParam::ChannelId,
            ParamSpelling::List => ChannelParam::ChannelIds,
        }
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Pull the monitored channel into the local store, month by month when a range is given
    Ingest {
        #[clap(long, requires = "to")]
        from: Option<NaiveDate>,
        #[clap(long, requires = "from")]
        to: Option<NaiveDate>,
        #[clap(long)]
        max_pages: Option<u32>,
        #[clap(long, value_enum, default_value = "list")]
        param: ParamSpelling,
        /// Defaults to the configured channel
        #[clap(long)]
        channel: Option<String>,
    },
    /// Try every channel parameter spelling against the vendor
    Probe {
        #[clap(long)]
        channel: Option<String>,
    },
    /// Show the vendor's channel record
    Channel {
        #[clap(long)]
        channel: Option<String>,
    },
    /// Print the vendor's post statistics for the channel
    Stats {
        #[clap(long, requires = "to")]
        from: Option<NaiveDate>,
        #[clap(long, requires = "from")]
        to: Option<NaiveDate>,
        #[clap(long)]
        channel: Option<String>,
    },
    /// Fetch the tweet a stored post quotes or replies to and store it as context
    Quote {
        /// `junkipedia:<id>`, `tweet:<id>`, `match:<text>` or a bare id
        selector: PostSelector,
        /// Overrides the id found in the stored payload
        #[clap(long)]
        tweet_id: Option<String>,
    },
    /// Run the external analysis service over a stored post and store the verdict
    Analyze {
        selector: PostSelector,
        #[clap(long, default_value = "post")]
        subject: AnalysisSubject,
    },
    /// Apply a RON annotation file in one transaction
    Patch { file: PathBuf },
    /// Compare a RON annotation file against what is stored
    Verify { file: PathBuf },
    /// Show a stored post with its context and analyses
    Inspect { selector: PostSelector },
}

#[derive(Parser)]
#[command(name = "monitor-cli")]
#[command(about = "Maintenance commands for the monitor feed", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[tokio::main]
async fn main() {
    dotenvy::dotenv().ok();
    if let Err(e) = monitor_feed::init_tracing() {
        logs::log_generic_error("[ERROR]", &format!("{e:#}"));
        std::process::exit(1);
    }

    let args = Cli::parse();
    if let Err(e) = run(args.command).await {
        logs::log_generic_error("[ERROR]", &format!("{e:#}"));
        std::process::exit(1);
    }
}

fn open_store() -> Result<DbPool> {
    let database_url = std::env::var("DATABASE_URL").unwrap_or_else(|_| "monitor.db".to_string());
    let pool = establish_pool(&database_url)
        .with_context(|| format!("opening database {database_url}"))?;
    let mut conn = pool.get()?;
    let applied = run_migrations(&mut conn)?;
    if applied > 0 {
        logs::log_db_ready(applied);
    }
    Ok(pool)
}

fn channel_or_default(channel: Option<String>) -> String {
    channel.unwrap_or_else(|| settings().junkipedia.channel_id.clone())
}

async fn run(command: Commands) -> Result<()> {
    match command {
        Commands::Ingest {
            from,
            to,
            max_pages,
            param,
            channel,
        } => {
            let pool = open_store()?;
            let client = JunkipediaClient::from_env()?;

            let mut plan = IngestPlan::from_settings();
            plan.channel = channel_or_default(channel);
            plan.param = param.into();
            plan.range = from.zip(to);
            if let Some(max_pages) = max_pages {
                plan.max_pages = max_pages;
            }
            if let Some((from, to)) = plan.range {
                if from > to {
                    bail!("--from {from} is after --to {to}");
                }
            }

            logs::log_ingest_start(&plan.channel, plan.queries().len());
            let report = run_ingest(&pool, &client, &plan).await?;
            logs::log_ingest_report(&report);
        }
        Commands::Probe { channel } => {
            let client = JunkipediaClient::from_env()?;
            let channel = channel_or_default(channel);
            let results = probe_channel_params(&client, &channel).await;
            logs::log_probe_results(&channel, &results);
        }
        Commands::Channel { channel } => {
            let client = JunkipediaClient::from_env()?;
            let record = client.channel(&channel_or_default(channel)).await?;
            logs::log_channel(&record);
        }
        Commands::Stats { from, to, channel } => {
            let client = JunkipediaClient::from_env()?;
            let mut query = PostQuery::for_channel(&channel_or_default(channel));
            if let Some((from, to)) = from.zip(to) {
                query = query.window(from, to);
            }
            let stats = client.post_stats(&query).await?;
            logs::log_json("post stats", &stats);
        }
        Commands::Quote { selector, tweet_id } => {
            let pool = open_store()?;
            let post = locate_post(&mut *pool.get()?, &selector)?;

            let (kind, original_id) = match tweet_id {
                Some(id) if post.kind() == PostType::Reply => (ContextKind::Reply, id),
                Some(id) => (ContextKind::Quote, id),
                None => referenced_tweet(&post.raw()).with_context(|| {
                    format!("post {} does not reference another tweet; pass --tweet-id", post.id)
                })?,
            };

            let twitter = TwitterClient::from_env()?;
            let fetched = twitter.fetch_tweet(&original_id).await?;
            let input = ReplyContextInput {
                kind,
                reply_tweet_id: None,
                original_tweet_id: fetched.id.clone(),
                original_tweet_text: fetched.text.clone(),
                original_user_username: fetched.author_username.clone(),
                raw_data: Some(fetched.raw.to_string()),
            };
            let stored = store_reply_context(&mut *pool.get()?, &post, &input, now_timestamp())?;
            logs::log_context_stored(&stored);
        }
        Commands::Analyze { selector, subject } => {
            let pool = open_store()?;
            let (post, context) = {
                let mut conn = pool.get()?;
                let post = locate_post(&mut conn, &selector)?;
                let context = db::get_reply_context(&mut conn, post.id)?;
                (post, context)
            };

            let (text, media) = match subject {
                AnalysisSubject::Post => (post.content.clone(), post.media()),
                AnalysisSubject::Quoted => match &context {
                    Some(ctx) if ctx.context_kind == ContextKind::Quote.to_string() => {
                        (ctx.original_tweet_text.clone(), Vec::new())
                    }
                    _ => bail!(
                        "post {} has no stored quote context; run `quote {selector}` first",
                        post.id
                    ),
                },
            };

            let client = AnalysisClient::from_settings()?;
            let mut verdict = client.analyze(&text, &media).await?;
            verdict.subject = subject;
            verdict.tweet_id = None;

            let stored = store_analysis(
                &mut *pool.get()?,
                &post,
                context.as_ref(),
                &verdict,
                AnalysisSource::External,
                now_timestamp(),
            )?;
            logs::log_analysis_stored(&stored);
        }
        Commands::Patch { file } => {
            let annotations = AnnotationFile::load(&file)?;
            annotations.validate()?;
            let pool = open_store()?;
            let mut conn = pool.get()?;
            let report = monitor_feed::annotate::apply_annotations(&mut conn, &annotations)?;
            logs::log_patch_report(&report);
        }
        Commands::Verify { file } => {
            let annotations = AnnotationFile::load(&file)?;
            let pool = open_store()?;
            let mut conn = pool.get()?;

            let mut mismatches = 0;
            for annotation in &annotations.annotations {
                let checks = verify_annotation(&mut conn, annotation)?;
                mismatches += logs::log_field_checks(&annotation.target.to_string(), &checks);
            }
            if mismatches > 0 {
                bail!("{mismatches} field(s) differ from {}", file.display());
            }
        }
        Commands::Inspect { selector } => {
            let pool = open_store()?;
            let mut conn = pool.get()?;
            let post = locate_post(&mut conn, &selector)?;
            let context = db::get_reply_context(&mut conn, post.id)?;
            let analyses = db::get_analyses(&mut conn, post.id)?;
            logs::log_post_detail(&post, context.as_ref(), &analyses);
        }
    }

    Ok(())
}
