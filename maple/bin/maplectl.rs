//! Command-line utility for inspecting and managing the maple mail queue.
//!
//! Operates directly on a file-backed queue directory, so it works whether
//! or not the daemon is running. It attaches to the directory without the
//! daemon's startup cleanup, leaving any write in progress untouched:
//! - List and inspect jobs by effective status
//! - Enqueue a message by hand
//! - Show queue statistics
//! - Purge old sent and dead jobs

use std::{path::PathBuf, sync::Arc};

use anyhow::Context;
use chrono::{DateTime, Utc};
use clap::{Parser, Subcommand, ValueEnum};
use maple_delivery::{
    EmailQueue, JobQuery, JobQueryService, JobView, RetentionPolicy, retention::purge_expired,
};
use maple_queue::{FileJobStore, JobId, JobStatus, JobStore};

/// Command-line utility for managing the maple mail queue
#[derive(Parser, Debug)]
#[command(name = "maplectl")]
#[command(about = "Manage the maple notification mail queue", long_about = None)]
#[command(version)]
struct Cli {
    /// Path to the queue directory
    #[arg(short, long, default_value = "/var/spool/maple")]
    queue_path: PathBuf,

    /// Retry ceiling used to tell dead jobs from pending ones; keep it in
    /// line with the daemon's `dispatcher.retry.max_retries`
    #[arg(short, long, default_value_t = 3)]
    max_retries: u32,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List jobs in the queue
    List {
        /// Filter by effective status
        #[arg(long, value_enum)]
        status: Option<StatusFilter>,

        /// Show at most this many jobs
        #[arg(long)]
        limit: Option<usize>,
    },
    /// View detailed information about a job
    Show {
        /// Job ID to view
        job_id: JobId,
    },
    /// Queue a message for delivery
    Enqueue {
        /// Recipient address
        #[arg(long)]
        to: String,

        /// Subject line
        #[arg(long)]
        subject: String,

        /// HTML body
        #[arg(long, conflicts_with = "body_file", required_unless_present = "body_file")]
        body: Option<String>,

        /// Read the HTML body from a file
        #[arg(long)]
        body_file: Option<PathBuf>,
    },
    /// Show queue statistics
    Stats,
    /// Delete sent and dead jobs older than the given ages
    Purge {
        /// Remove sent jobs delivered more than this many seconds ago
        #[arg(long)]
        sent_older_than_secs: Option<u64>,

        /// Remove dead jobs created more than this many seconds ago
        #[arg(long)]
        dead_older_than_secs: Option<u64>,
    },
}

#[derive(Copy, Clone, Debug, PartialEq, Eq, ValueEnum)]
enum StatusFilter {
    Pending,
    Sent,
    Dead,
}

impl From<StatusFilter> for JobStatus {
    fn from(filter: StatusFilter) -> Self {
        match filter {
            StatusFilter::Pending => Self::Pending,
            StatusFilter::Sent => Self::Sent,
            StatusFilter::Dead => Self::Dead,
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let store = open_store(cli.queue_path)?;
    let query = JobQuery::new(Arc::clone(&store), cli.max_retries);

    match cli.command {
        Commands::List { status, limit } => {
            cmd_list(&query, status.map(JobStatus::from), limit).await?;
        }
        Commands::Show { job_id } => cmd_show(&query, job_id).await?,
        Commands::Enqueue {
            to,
            subject,
            body,
            body_file,
        } => {
            let body = match (body, body_file) {
                (Some(body), _) => body,
                (None, Some(path)) => std::fs::read_to_string(&path)
                    .with_context(|| format!("Failed to read body from {}", path.display()))?,
                (None, None) => anyhow::bail!("Either --body or --body-file is required"),
            };

            let id = EmailQueue::new(store).enqueue(to, subject, body).await?;
            println!("Queued job {id}");
        }
        Commands::Stats => cmd_stats(&query).await?,
        Commands::Purge {
            sent_older_than_secs,
            dead_older_than_secs,
        } => {
            let policy = RetentionPolicy {
                sent_after_secs: sent_older_than_secs,
                dead_after_secs: dead_older_than_secs,
                ..RetentionPolicy::default()
            };
            if !policy.is_enabled() {
                anyhow::bail!("Nothing to purge: pass --sent-older-than-secs or --dead-older-than-secs");
            }

            let purged =
                purge_expired(store.as_ref(), &policy, cli.max_retries, Utc::now()).await?;
            println!("Purged {purged} job(s)");
        }
    }

    Ok(())
}

fn open_store(path: PathBuf) -> anyhow::Result<Arc<dyn JobStore>> {
    let store = FileJobStore::builder()
        .path(path)
        .build()
        .context("Invalid queue path")?;
    store.attach().context("Failed to open queue")?;
    Ok(Arc::new(store))
}

async fn cmd_list(
    query: &JobQuery,
    status: Option<JobStatus>,
    limit: Option<usize>,
) -> anyhow::Result<()> {
    let jobs = query.jobs(status).await?;
    let shown = limit.unwrap_or(jobs.len()).min(jobs.len());

    println!(
        "{:<10} {:<8} {:<8} {:<20} {}",
        "JOB ID", "STATUS", "RETRIES", "AGE", "RECIPIENT"
    );
    println!("{}", "-".repeat(72));

    for JobView { job, status } in jobs.iter().take(shown) {
        println!(
            "{:<10} {:<8} {:<8} {:<20} {}",
            job.id,
            status.as_str(),
            job.retry_count,
            format_age(job.created_at),
            job.recipient
        );
    }

    if shown < jobs.len() {
        println!("\nShowing {shown} of {} job(s)", jobs.len());
    } else {
        println!("\nTotal: {} job(s)", jobs.len());
    }

    Ok(())
}

async fn cmd_show(query: &JobQuery, id: JobId) -> anyhow::Result<()> {
    let JobView { job, status } = query.job(id).await?;

    println!("Job ID: {}", job.id);
    println!("Status: {}", status.as_str());
    println!("Recipient: {}", job.recipient);
    println!("Subject: {}", job.subject);
    println!(
        "Created: {} ({} ago)",
        format_timestamp(job.created_at),
        format_age(job.created_at)
    );
    if let Some(sent_at) = job.sent_at {
        println!("Sent: {}", format_timestamp(sent_at));
    }
    println!();

    println!("Delivery:");
    println!("  Failed attempts: {}", job.retry_count);
    if let Some(next) = job.next_attempt_at {
        println!("  Next attempt not before: {}", format_timestamp(next));
    }
    if let Some(error) = &job.last_error {
        println!("  Last error: {error}");
    }
    println!();

    println!("Body: {} bytes", job.body.len());

    Ok(())
}

async fn cmd_stats(query: &JobQuery) -> anyhow::Result<()> {
    let summary = query.summary().await?;

    println!("Queue Statistics");
    println!("{}", "=".repeat(40));
    println!("Pending: {}", summary.pending);
    println!("Sent:    {}", summary.sent);
    println!("Dead:    {}", summary.dead);
    println!("Total:   {}", summary.total());

    Ok(())
}

fn format_timestamp(at: DateTime<Utc>) -> String {
    at.format("%Y-%m-%d %H:%M:%S UTC").to_string()
}

fn format_age(at: DateTime<Utc>) -> String {
    let secs = (Utc::now() - at).num_seconds().max(0);

    if secs < 60 {
        format!("{secs}s")
    } else if secs < 3600 {
        format!("{}m", secs / 60)
    } else if secs < 86_400 {
        format!("{}h {}m", secs / 3600, (secs % 3600) / 60)
    } else {
        format!("{}d {}h", secs / 86_400, (secs % 86_400) / 3600)
    }
}
