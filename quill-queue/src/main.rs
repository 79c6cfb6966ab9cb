//! quill-queue - Manage publish jobs
//!
//! Unix-style tool for inspecting and managing the Quillcast job queue.

use clap::{Parser, Subcommand};
use libquillcast::queue::JobQueue;
use libquillcast::types::{Job, JobPayload, JobStatus, JobType};
use libquillcast::{Config, Database, QuillcastError, Result};

#[derive(Parser, Debug)]
#[command(name = "quill-queue")]
#[command(version)]
#[command(about = "Manage publish jobs")]
#[command(long_about = "\
quill-queue - Manage publish jobs

DESCRIPTION:
    quill-queue is a Unix-style tool for managing the Quillcast publish
    queue. Use it to list jobs, enqueue new publish work, cancel pending
    jobs, purge old terminal jobs, or view queue statistics.

COMMANDS:
    list        List jobs in the queue
    add         Enqueue a new publish job
    cancel      Cancel a pending job
    purge       Delete old completed/failed/cancelled jobs
    stats       Show queue statistics

USAGE EXAMPLES:
    # List all pending jobs
    quill-queue list --status pending

    # List jobs in JSON format
    quill-queue list --format json

    # Enqueue a draft for publishing
    quill-queue add --draft 42 --category Tech

    # Enqueue a generated article
    quill-queue add --style casual

    # Cancel a pending job
    quill-queue cancel <JOB_ID>

    # Purge terminal jobs older than the retention window
    quill-queue purge

    # View queue statistics
    quill-queue stats

CONFIGURATION:
    Configuration file: ~/.config/quillcast/config.toml
    Database location: ~/.local/share/quillcast/quillcast.db

    Override with environment variables:
        QUILLCAST_CONFIG    - Path to config file

EXIT CODES:
    0 - Success
    1 - Operation failed
    2 - Authentication error
    3 - Invalid input (bad job ID, unknown status, etc.)
")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging to stderr
    #[arg(short, long, global = true)]
    #[arg(help = "Enable verbose logging to stderr (useful for debugging)")]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List jobs
    List {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,

        /// Filter by status (pending, processing, completed, failed, cancelled)
        #[arg(short, long)]
        status: Option<String>,
    },

    /// Enqueue a new publish job
    Add {
        /// Draft ID to publish; omit to enqueue a generated article
        #[arg(long)]
        draft: Option<String>,

        /// Target platform name (defaults to the first configured one)
        #[arg(long)]
        platform: Option<String>,

        /// Category for the post
        #[arg(long)]
        category: Option<String>,

        /// Writing style hint for generated articles
        #[arg(long)]
        style: Option<String>,
    },

    /// Cancel a pending job
    Cancel {
        /// Job ID to cancel
        job_id: String,
    },

    /// Delete old terminal jobs
    Purge {
        /// Override the retention window (days)
        #[arg(long)]
        days: Option<u32>,
    },

    /// Show queue statistics
    Stats {
        /// Output format: text or json
        #[arg(short, long, default_value = "text")]
        format: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    if cli.verbose {
        tracing_subscriber::fmt()
            .with_env_filter("debug")
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter("error")
            .with_writer(std::io::stderr)
            .init();
    }

    if let Err(e) = run(cli).await {
        eprintln!("Error: {}", e);
        std::process::exit(e.exit_code());
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let db = Database::new(&config.database.path).await?;
    let queue = JobQueue::new(db);

    match cli.command {
        Commands::List { format, status } => {
            cmd_list(&queue, &format, status.as_deref()).await?;
        }
        Commands::Add {
            draft,
            platform,
            category,
            style,
        } => {
            cmd_add(&queue, draft, platform, category, style).await?;
        }
        Commands::Cancel { job_id } => {
            cmd_cancel(&queue, &job_id).await?;
        }
        Commands::Purge { days } => {
            let days = days.unwrap_or(config.scheduler.retention_days);
            cmd_purge(&queue, days).await?;
        }
        Commands::Stats { format } => {
            cmd_stats(&queue, &format).await?;
        }
    }

    Ok(())
}

fn validate_format(format: &str) -> Result<()> {
    if format != "text" && format != "json" {
        return Err(QuillcastError::InvalidInput(format!(
            "Invalid format '{}'. Must be 'text' or 'json'",
            format
        )));
    }
    Ok(())
}

fn parse_status(s: &str) -> Result<JobStatus> {
    match s {
        "pending" | "processing" | "completed" | "failed" | "cancelled" => Ok(JobStatus::parse(s)),
        other => Err(QuillcastError::InvalidInput(format!(
            "Unknown status '{}'",
            other
        ))),
    }
}

/// List jobs, optionally filtered by status
async fn cmd_list(queue: &JobQueue, format: &str, status: Option<&str>) -> Result<()> {
    validate_format(format)?;

    let jobs = match status {
        Some(s) => queue.list_by_status(parse_status(s)?).await?,
        None => queue.list_all().await?,
    };

    if format == "json" {
        output_list_json(&jobs);
    } else {
        output_list_text(&jobs);
    }

    Ok(())
}

fn output_list_json(jobs: &[Job]) {
    let json: Vec<serde_json::Value> = jobs
        .iter()
        .map(|j| {
            serde_json::json!({
                "id": j.id,
                "type": j.job_type.as_str(),
                "status": j.status.as_str(),
                "retry_count": j.retry_count,
                "created_at": j.created_at,
                "updated_at": j.updated_at,
                "last_error": j.last_error,
            })
        })
        .collect();

    println!("{}", serde_json::to_string_pretty(&json).unwrap());
}

fn output_list_text(jobs: &[Job]) {
    if jobs.is_empty() {
        return;
    }

    for job in jobs {
        let age = format_age(chrono::Utc::now().timestamp() - job.created_at);
        println!(
            "{} | {} | {} | {}",
            job.id, job.job_type, job.status, age
        );
    }
}

/// Format a job age in human-readable text
fn format_age(secs: i64) -> String {
    let secs = secs.max(0);
    let minutes = secs / 60;
    let hours = minutes / 60;
    let days = hours / 24;

    if days > 0 {
        format!("{} day{} ago", days, if days == 1 { "" } else { "s" })
    } else if hours > 0 {
        format!("{} hour{} ago", hours, if hours == 1 { "" } else { "s" })
    } else if minutes > 0 {
        format!("{} minute{} ago", minutes, if minutes == 1 { "" } else { "s" })
    } else {
        "just now".to_string()
    }
}

/// Enqueue a new publish job
async fn cmd_add(
    queue: &JobQueue,
    draft: Option<String>,
    platform: Option<String>,
    category: Option<String>,
    style: Option<String>,
) -> Result<()> {
    let job_type = if draft.is_some() {
        JobType::PublishDraft
    } else {
        JobType::PublishGenerated
    };

    let payload = JobPayload {
        draft_id: draft,
        platform,
        category,
        style,
    };
    let payload = serde_json::to_string(&payload)
        .map_err(|e| QuillcastError::InvalidInput(e.to_string()))?;

    let job = queue.enqueue(job_type, payload).await?;
    println!("{}", job.id);
    Ok(())
}

/// Cancel one pending job
async fn cmd_cancel(queue: &JobQueue, job_id: &str) -> Result<()> {
    if uuid::Uuid::parse_str(job_id).is_err() {
        return Err(QuillcastError::InvalidInput(format!(
            "'{}' is not a valid job ID",
            job_id
        )));
    }

    let job = queue
        .get(job_id)
        .await?
        .ok_or_else(|| QuillcastError::InvalidInput(format!("Job {} not found", job_id)))?;

    match job.status {
        JobStatus::Pending => {
            queue
                .set_status(job_id, JobStatus::Cancelled, Some("cancelled by operator"))
                .await?;
            println!("Cancelled {}", job_id);
            Ok(())
        }
        other => Err(QuillcastError::InvalidInput(format!(
            "Job {} is {}, only pending jobs can be cancelled here",
            job_id, other
        ))),
    }
}

/// Purge terminal jobs older than the retention window
async fn cmd_purge(queue: &JobQueue, days: u32) -> Result<()> {
    let purged = queue.purge_older_than(days as i64 * 24 * 3600).await?;
    println!("Purged {} job{}", purged, if purged == 1 { "" } else { "s" });
    Ok(())
}

/// Show queue statistics
async fn cmd_stats(queue: &JobQueue, format: &str) -> Result<()> {
    validate_format(format)?;

    let jobs = queue.list_all().await?;
    let count_of = |status: JobStatus| jobs.iter().filter(|j| j.status == status).count();

    let pending = count_of(JobStatus::Pending);
    let processing = count_of(JobStatus::Processing);
    let completed = count_of(JobStatus::Completed);
    let failed = count_of(JobStatus::Failed);
    let cancelled = count_of(JobStatus::Cancelled);

    if format == "json" {
        println!(
            "{}",
            serde_json::to_string_pretty(&serde_json::json!({
                "total": jobs.len(),
                "pending": pending,
                "processing": processing,
                "completed": completed,
                "failed": failed,
                "cancelled": cancelled,
            }))
            .unwrap()
        );
    } else {
        println!("Total:      {}", jobs.len());
        println!("Pending:    {}", pending);
        println!("Processing: {}", processing);
        println!("Completed:  {}", completed);
        println!("Failed:     {}", failed);
        println!("Cancelled:  {}", cancelled);
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_format() {
        assert!(validate_format("text").is_ok());
        assert!(validate_format("json").is_ok());
        assert!(validate_format("yaml").is_err());
    }

    #[test]
    fn test_parse_status_rejects_unknown() {
        assert!(parse_status("pending").is_ok());
        assert!(parse_status("done").is_err());
    }

    #[test]
    fn test_format_age() {
        assert_eq!(format_age(30), "just now");
        assert_eq!(format_age(120), "2 minutes ago");
        assert_eq!(format_age(3600), "1 hour ago");
        assert_eq!(format_age(200_000), "2 days ago");
    }

    #[tokio::test]
    async fn test_cancel_only_pending_jobs() {
        let db = Database::in_memory().await.unwrap();
        let queue = JobQueue::new(db);

        let job = queue
            .enqueue(JobType::PublishGenerated, "{}".to_string())
            .await
            .unwrap();
        assert!(cmd_cancel(&queue, &job.id).await.is_ok());

        // Already cancelled: a second cancel is invalid input
        let err = cmd_cancel(&queue, &job.id).await.unwrap_err();
        assert_eq!(err.exit_code(), 3);

        let err = cmd_cancel(&queue, "not-a-uuid").await.unwrap_err();
        assert_eq!(err.exit_code(), 3);
    }

    #[tokio::test]
    async fn test_add_builds_draft_payload() {
        let db = Database::in_memory().await.unwrap();
        let queue = JobQueue::new(db);

        cmd_add(
            &queue,
            Some("d1".to_string()),
            None,
            Some("Tech".to_string()),
            None,
        )
        .await
        .unwrap();

        let job = queue.next_pending().await.unwrap().unwrap();
        assert_eq!(job.job_type, JobType::PublishDraft);
        let payload: JobPayload = serde_json::from_str(&job.payload).unwrap();
        assert_eq!(payload.draft_id.as_deref(), Some("d1"));
        assert_eq!(payload.category.as_deref(), Some("Tech"));
    }
}
