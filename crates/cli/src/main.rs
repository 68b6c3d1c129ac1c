//! learnpath CLI - progression control over a JSON data directory.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use learnpath_core::{ContentId, ContentKind, ContentRef, OverrideAction, ProgressStatus, StudentId, UserId};
use learnpath_progress::{
    CheckAccessRequest, ClearOverrideRequest, EngineConfig, OverrideRequest, ProgressionApi,
    ProgressionControlEngine, SubmitAttemptRequest, UpdateProgressRequest,
};
use learnpath_storage::JsonStorage;
use serde::Serialize;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "learnpath")]
#[command(about = "Learning progression control", long_about = None)]
struct Cli {
    /// Data directory
    #[arg(long, global = true, default_value = ".learnpath")]
    data: PathBuf,

    /// Engine configuration (TOML)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Debug logging
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Decide whether a student may access content
    CheckAccess {
        /// Student ID
        #[arg(long)]
        student: String,
        /// Content kind (course, lesson, assessment)
        kind: ContentKind,
        /// Content ID
        id: String,
    },
    /// Report progress on content
    UpdateProgress {
        /// Student ID
        #[arg(long)]
        student: String,
        /// Content kind (course, lesson, assessment)
        kind: ContentKind,
        /// Content ID
        id: String,
        /// New status
        #[arg(long)]
        status: ProgressStatus,
        /// Completion percentage (0-100)
        #[arg(long, default_value = "0")]
        percentage: u8,
        /// Time spent in seconds
        #[arg(long, default_value = "0")]
        time_spent: u64,
    },
    /// Submit a scored assessment attempt
    SubmitAttempt {
        /// Student ID
        #[arg(long)]
        student: String,
        /// Assessment ID
        assessment: String,
        /// Score (0-100)
        #[arg(long)]
        score: u8,
        /// When the attempt started (RFC 3339)
        #[arg(long)]
        started_at: Option<String>,
        /// Idempotency token
        #[arg(long)]
        token: Option<String>,
    },
    /// Grant an unlock or block override
    Override {
        /// Instructor ID
        #[arg(long)]
        instructor: String,
        /// Student ID
        #[arg(long)]
        student: String,
        /// Content kind (course, lesson, assessment)
        kind: ContentKind,
        /// Content ID
        id: String,
        /// unlock or block
        #[arg(long)]
        action: OverrideAction,
        /// Reason for the override
        #[arg(long)]
        reason: String,
    },
    /// Clear standing overrides
    ClearOverride {
        /// Instructor ID
        #[arg(long)]
        instructor: String,
        /// Student ID
        #[arg(long)]
        student: String,
        /// Content kind (course, lesson, assessment)
        kind: ContentKind,
        /// Content ID
        id: String,
    },
    /// Reset progress to not_started
    Reset {
        /// Instructor ID
        #[arg(long)]
        instructor: String,
        /// Student ID
        #[arg(long)]
        student: String,
        /// Content kind (course, lesson, assessment)
        kind: ContentKind,
        /// Content ID
        id: String,
        /// Reason for the reset
        #[arg(long)]
        reason: String,
    },
    /// Show a student's standing across a course
    Overview {
        /// Student ID
        #[arg(long)]
        student: String,
        /// Course ID
        course: String,
    },
    /// List prerequisite cycles in a course
    Validate {
        /// Course ID
        course: String,
    },
    /// Show the audit trail for a student
    Audit {
        /// Student ID
        #[arg(long)]
        student: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = load_config(cli.config.as_deref())?;
    debug!(?config, "Engine configuration");

    let storage = Arc::new(
        JsonStorage::open(&cli.data)
            .await
            .with_context(|| format!("opening data directory {}", cli.data.display()))?,
    );
    let engine = ProgressionControlEngine::new(storage.clone(), storage.clone(), storage)
        .with_config(config);
    let api = ProgressionApi::new(Arc::new(engine));

    match cli.command {
        Commands::CheckAccess { student, kind, id } => {
            let result = api
                .check_access(
                    &StudentId::new(student),
                    CheckAccessRequest { content_id: ContentId::new(id), content_type: kind },
                )
                .await?;
            print_json(&result)?;
        }
        Commands::UpdateProgress { student, kind, id, status, percentage, time_spent } => {
            let response = api
                .update_progress(
                    &StudentId::new(student),
                    UpdateProgressRequest {
                        content_id: ContentId::new(id),
                        content_type: kind,
                        status,
                        completion_percentage: percentage,
                        time_spent,
                    },
                )
                .await?;
            print_json(&response)?;
        }
        Commands::SubmitAttempt { student, assessment, score, started_at, token } => {
            let started_at = started_at
                .map(|s| parse_time(&s))
                .transpose()?;
            let response = api
                .submit_attempt(
                    &StudentId::new(student),
                    SubmitAttemptRequest {
                        assessment_id: ContentId::new(assessment),
                        score,
                        started_at,
                        client_token: token,
                    },
                )
                .await?;
            print_json(&response)?;
        }
        Commands::Override { instructor, student, kind, id, action, reason } => {
            let response = api
                .grant_override(
                    &UserId::new(instructor),
                    OverrideRequest {
                        student_id: StudentId::new(student),
                        content_id: ContentId::new(id),
                        content_kind: kind,
                        action,
                        reason,
                    },
                )
                .await?;
            print_json(&response)?;
        }
        Commands::ClearOverride { instructor, student, kind, id } => {
            let response = api
                .clear_override(
                    &UserId::new(instructor),
                    ClearOverrideRequest {
                        student_id: StudentId::new(student),
                        content_id: ContentId::new(id),
                        content_kind: kind,
                    },
                )
                .await?;
            print_json(&response)?;
        }
        Commands::Reset { instructor, student, kind, id, reason } => {
            let row = api
                .engine()
                .reset_progress(
                    &UserId::new(instructor),
                    &StudentId::new(student),
                    &ContentRef::new(id, kind),
                    &reason,
                )
                .await?;
            match row {
                Some(row) => print_json(&row)?,
                None => info!("No progress to reset"),
            }
        }
        Commands::Overview { student, course } => {
            let overview = api
                .course_progress_overview(&StudentId::new(student), &ContentId::new(course))
                .await?;
            print_json(&overview)?;
        }
        Commands::Validate { course } => {
            let cycles = api.engine().validate_course(&ContentId::new(course)).await?;
            let cycles: Vec<Vec<String>> = cycles
                .into_iter()
                .map(|cycle| cycle.iter().map(ContentRef::to_string).collect())
                .collect();
            print_json(&cycles)?;
            if !cycles.is_empty() {
                anyhow::bail!("{} prerequisite cycle(s) found", cycles.len());
            }
        }
        Commands::Audit { student } => {
            let events = api.engine().authority().audit_log(&StudentId::new(student)).await?;
            print_json(&events)?;
        }
    }

    Ok(())
}

/// Read engine configuration; no path, or a path that does not exist, means
/// defaults.
fn load_config(path: Option<&Path>) -> Result<EngineConfig> {
    let Some(path) = path else {
        return Ok(EngineConfig::default());
    };
    match std::fs::read_to_string(path) {
        Ok(source) => EngineConfig::from_toml(&source)
            .with_context(|| format!("parsing {}", path.display())),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!("{} not found, using defaults", path.display());
            Ok(EngineConfig::default())
        }
        Err(e) => Err(e).with_context(|| format!("reading {}", path.display())),
    }
}

fn parse_time(s: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    Ok(chrono::DateTime::parse_from_rfc3339(s)
        .with_context(|| format!("invalid timestamp: {}", s))?
        .with_timezone(&chrono::Utc))
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_config_means_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = load_config(Some(dir.path().join("absent.toml").as_path())).unwrap();
        assert_eq!(config, EngineConfig::default());
        assert_eq!(load_config(None).unwrap(), EngineConfig::default());
    }

    #[test]
    fn test_config_file_is_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("learnpath.toml");
        std::fs::write(&path, "cascade_depth = 2\ncache_dependents = false\n").unwrap();

        let config = load_config(Some(path.as_path())).unwrap();
        assert_eq!(config.cascade_depth, 2);
        assert!(!config.cache_dependents);
        assert_eq!(config.conflict_retries, 1);
    }

    #[test]
    fn test_bad_config_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("learnpath.toml");
        std::fs::write(&path, "cascade_depth = \"deep\"").unwrap();
        assert!(load_config(Some(path.as_path())).is_err());
    }

    #[test]
    fn test_cli_parses_subcommands() {
        let cli = Cli::try_parse_from([
            "learnpath",
            "--data",
            "/tmp/lp",
            "update-progress",
            "--student",
            "s1",
            "lesson",
            "l1",
            "--status",
            "completed",
            "--percentage",
            "100",
        ])
        .unwrap();
        assert_eq!(cli.data, PathBuf::from("/tmp/lp"));
        match cli.command {
            Commands::UpdateProgress { kind, status, percentage, .. } => {
                assert_eq!(kind, ContentKind::Lesson);
                assert_eq!(status, ProgressStatus::Completed);
                assert_eq!(percentage, 100);
            }
            _ => panic!("wrong subcommand"),
        }
    }

    #[test]
    fn test_parse_time() {
        let t = parse_time("2024-03-01T10:00:00+02:00").unwrap();
        assert_eq!(t.to_rfc3339(), "2024-03-01T08:00:00+00:00");
        assert!(parse_time("yesterday").is_err());
    }
}
