use console::{measure_text_width, Style};

use crate::annotate::{FieldCheck, PatchReport};
use crate::db::{AnalysisRow, Post, ReplyContext};
use crate::ingest::{IngestReport, ProbeResult};
use crate::utils::junkipedia::Channel;

pub const TREE_BRANCH: char = '\u{251C}';
pub const TREE_END: char = '\u{2514}';
pub const TREE_HORIZ: char = '\u{2500}';
pub const TREE_VERT: char = '\u{2502}';

const TREE_PREFIX_WIDTH: usize = 4;
const VALUE_COLUMN: usize = 28;

fn tree_branch() -> String {
    dim()
        .apply_to(format!("{}{}{} ", TREE_BRANCH, TREE_HORIZ, TREE_HORIZ))
        .to_string()
}

fn tree_end() -> String {
    dim()
        .apply_to(format!("{}{}{} ", TREE_END, TREE_HORIZ, TREE_HORIZ))
        .to_string()
}

fn tree_indent() -> String {
    dim().apply_to(format!("{}   ", TREE_VERT)).to_string()
}

fn tree_prefix(last: bool) -> String {
    if last {
        tree_end()
    } else {
        tree_branch()
    }
}

pub fn dim() -> Style {
    Style::new().dim()
}

fn blue() -> Style {
    Style::new().blue()
}

fn magenta() -> Style {
    Style::new().magenta()
}

fn cyan() -> Style {
    Style::new().cyan()
}

fn green() -> Style {
    Style::new().green()
}

fn red() -> Style {
    Style::new().red()
}

fn yellow() -> Style {
    Style::new().yellow()
}

fn bold() -> Style {
    Style::new().bold()
}

fn init_prefix() -> String {
    blue().apply_to("[INIT]").to_string()
}

fn ingest_prefix() -> String {
    magenta().apply_to("[INGEST]").to_string()
}

fn probe_prefix() -> String {
    yellow().apply_to("[PROBE]").to_string()
}

fn patch_prefix() -> String {
    cyan().apply_to("[PATCH]").to_string()
}

pub fn pad_label(label: &str, depth: usize) -> String {
    let prefix_width = depth * TREE_PREFIX_WIDTH;
    let target_width = VALUE_COLUMN.saturating_sub(prefix_width);
    let current_width = measure_text_width(label);
    if current_width < target_width {
        format!("{}{}", label, " ".repeat(target_width - current_width))
    } else {
        format!("{} ", label)
    }
}

pub fn preview(text: &str, max_chars: usize) -> String {
    let flat = text.replace('\n', " ");
    if flat.chars().count() > max_chars {
        format!(
            "{}...",
            flat.chars().take(max_chars.saturating_sub(3)).collect::<String>()
        )
    } else {
        flat
    }
}

pub fn log_startup_config(port: u16, database_url: &str, ingest_on_start: bool) {
    println!(
        "{} starting monitor-feed on port {}...",
        init_prefix(),
        cyan().apply_to(port),
    );
    println!("{}{} {}", tree_branch(), pad_label("database", 1), dim().apply_to(database_url));
    println!(
        "{}{} {}",
        tree_end(),
        pad_label("ingest on start", 1),
        if ingest_on_start {
            green().apply_to("enabled")
        } else {
            yellow().apply_to("disabled")
        }
    );
}

pub fn log_db_ready(applied_migrations: usize) {
    println!(
        "{} database ready ({} migrations applied)",
        init_prefix(),
        bold().apply_to(applied_migrations)
    );
}

pub fn log_server_starting(port: u16) {
    println!(
        "{} listening on {}",
        init_prefix(),
        cyan().apply_to(format!("0.0.0.0:{port}"))
    );
}

pub fn log_ingest_start(channel: &str, windows: usize) {
    println!(
        "{} channel {} across {} window(s)...",
        ingest_prefix(),
        cyan().apply_to(channel),
        bold().apply_to(windows)
    );
}

pub fn log_ingest_window(label: &str, candidates: usize, inserted: usize) {
    println!(
        "{}{} {} new {}",
        tree_branch(),
        pad_label(label, 1),
        bold().apply_to(inserted),
        dim().apply_to(format!("/ {candidates}"))
    );
}

pub fn log_ingest_window_failed(label: &str, error: &str) {
    println!(
        "{}{} {}",
        tree_branch(),
        pad_label(label, 1),
        red().apply_to(error)
    );
}

pub fn log_ingest_report(report: &IngestReport) {
    println!("{} done.", ingest_prefix());
    let rows = [
        ("fetched", report.fetched),
        ("inserted", report.inserted),
        ("duplicates", report.duplicates),
        ("malformed", report.malformed),
        ("failed windows", report.failed_windows),
    ];
    for (i, (label, value)) in rows.iter().enumerate() {
        println!(
            "{}{} {}",
            tree_prefix(i == rows.len() - 1),
            pad_label(label, 1),
            bold().apply_to(value)
        );
    }
}

pub fn log_probe_results(channel: &str, results: &[ProbeResult]) {
    println!("{} channel {}", probe_prefix(), cyan().apply_to(channel));
    for (i, result) in results.iter().enumerate() {
        let outcome = match &result.outcome {
            Ok(count) => format!("{} {}", green().apply_to("ok"), dim().apply_to(format!("({count} posts)"))),
            Err(e) => format!("{} {}", red().apply_to("failed"), dim().apply_to(e)),
        };
        println!(
            "{}{} {}",
            tree_prefix(i == results.len() - 1),
            pad_label(&result.param.to_string(), 1),
            outcome
        );
    }
}

pub fn log_channel(channel: &Channel) {
    println!("{} channel {}", probe_prefix(), cyan().apply_to(&channel.id));
    println!(
        "{}{} {}",
        tree_branch(),
        pad_label("name", 1),
        channel.name.as_deref().unwrap_or("-")
    );
    println!(
        "{}{} {}",
        tree_end(),
        pad_label("platform", 1),
        channel.platform.as_deref().unwrap_or("-")
    );
}

pub fn log_json(label: &str, value: &serde_json::Value) {
    println!("{} {}", probe_prefix(), bold().apply_to(label));
    match serde_json::to_string_pretty(value) {
        Ok(text) => println!("{}", dim().apply_to(text)),
        Err(_) => println!("{}", dim().apply_to(value)),
    }
}

pub fn log_patch_report(report: &PatchReport) {
    println!(
        "{} applied {} annotation(s)",
        patch_prefix(),
        bold().apply_to(report.annotations)
    );
    println!(
        "{}{} {}",
        tree_branch(),
        pad_label("post types updated", 1),
        bold().apply_to(report.post_types_updated)
    );
    println!(
        "{}{} {}",
        tree_branch(),
        pad_label("contexts written", 1),
        bold().apply_to(report.contexts_written)
    );
    println!(
        "{}{} {}",
        tree_end(),
        pad_label("analyses written", 1),
        bold().apply_to(report.analyses_written)
    );
}

/// Prints one line per compared field. Returns how many fields differ.
pub fn log_field_checks(target: &str, checks: &[FieldCheck]) -> usize {
    let mismatches = checks.iter().filter(|c| !c.matches()).count();
    let verdict = if mismatches == 0 {
        green().apply_to("all fields match".to_string())
    } else {
        red().apply_to(format!("{mismatches} field(s) differ"))
    };
    println!("{} {} {}", patch_prefix(), bold().apply_to(target), verdict);

    for (i, check) in checks.iter().enumerate() {
        let prefix = tree_prefix(i == checks.len() - 1);
        if check.matches() {
            println!(
                "{}{} {}",
                prefix,
                pad_label(&check.field, 1),
                green().apply_to(preview(&check.actual, 60))
            );
        } else {
            println!(
                "{}{} {} {}",
                prefix,
                pad_label(&check.field, 1),
                red().apply_to(preview(&check.actual, 40)),
                dim().apply_to(format!("(expected: {})", preview(&check.expected, 40)))
            );
        }
    }

    mismatches
}

pub fn log_post_detail(post: &Post, context: Option<&ReplyContext>, analyses: &[AnalysisRow]) {
    let metrics = post.metrics();
    println!(
        "{} \"{}\"",
        magenta().apply_to(bold().apply_to("[POST]")),
        dim().apply_to(preview(&post.content, 60))
    );
    let fields = [
        ("id", post.id.to_string()),
        ("junkipedia id", post.junkipedia_id.clone()),
        ("tweet id", post.tweet_id.clone().unwrap_or_else(|| "-".into())),
        ("author", post.author_username.clone().unwrap_or_else(|| "-".into())),
        ("type", post.post_type.clone()),
        (
            "in reply to",
            post.in_reply_to_screen_name.clone().unwrap_or_else(|| "-".into()),
        ),
        (
            "engagement",
            format!(
                "{} likes, {} retweets, {} replies",
                metrics.likes, metrics.retweets, metrics.replies
            ),
        ),
        ("media", post.media().len().to_string()),
    ];
    for (label, value) in &fields {
        println!("{}{} {}", tree_branch(), pad_label(label, 1), value);
    }

    match context {
        Some(ctx) => {
            println!("{}{}", tree_branch(), bold().apply_to(format!("{} context", ctx.context_kind)));
            println!(
                "{}{}{} {}",
                tree_indent(),
                tree_branch(),
                pad_label("original tweet", 2),
                ctx.original_tweet_id
            );
            println!(
                "{}{}{} {}",
                tree_indent(),
                tree_branch(),
                pad_label("original author", 2),
                ctx.original_user_username.as_deref().unwrap_or("-")
            );
            println!(
                "{}{}{} {}",
                tree_indent(),
                tree_end(),
                pad_label("original text", 2),
                dim().apply_to(preview(&ctx.original_tweet_text, 50))
            );
        }
        None => println!("{}{} {}", tree_branch(), pad_label("context", 1), dim().apply_to("none")),
    }

    if analyses.is_empty() {
        println!("{}{} {}", tree_end(), pad_label("analysis", 1), dim().apply_to("none"));
        return;
    }
    for (i, analysis) in analyses.iter().enumerate() {
        let verdict = if analysis.is_potentially_transphobic {
            red().apply_to("flagged")
        } else {
            green().apply_to("clear")
        };
        println!(
            "{}{} {} {}",
            tree_prefix(i == analyses.len() - 1),
            pad_label(&format!("analysis {}", analysis.key().legacy_key()), 1),
            verdict,
            dim().apply_to(format!(
                "({} confidence, {} severity, {})",
                analysis.confidence_level, analysis.severity, analysis.source
            ))
        );
    }
}

pub fn log_context_stored(context: &ReplyContext) {
    println!(
        "{} stored {} context for post {} -> tweet {}",
        patch_prefix(),
        bold().apply_to(&context.context_kind),
        bold().apply_to(context.post_id),
        cyan().apply_to(&context.original_tweet_id)
    );
}

pub fn log_analysis_stored(analysis: &AnalysisRow) {
    println!(
        "{} stored {} analysis {} ({})",
        patch_prefix(),
        bold().apply_to(&analysis.subject),
        cyan().apply_to(analysis.key().legacy_key()),
        if analysis.is_potentially_transphobic {
            red().apply_to("flagged")
        } else {
            green().apply_to("clear")
        }
    );
}

pub fn log_generic_error(prefix: &str, message: &str) {
    eprintln!("{} {}", red().apply_to(prefix), message);
}
