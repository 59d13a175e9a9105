//! Video job polling.
//!
//! Two modes:
//! - blocking: submit, poll on a fixed interval until the job is terminal,
//!   then stream the first asset as a base64 text frame;
//! - decoupled: submit returns an escaped job id right away, and the client
//!   asks for the status later, one check per request.

use std::time::{Duration, Instant};

use base64::{engine::general_purpose::STANDARD, Engine as _};

use crate::config::VideoConfig;
use crate::protocol::{escape_job_id, unescape_job_id, FrameWriter};
use crate::provider::{AsyncJob, JobStatus, ProviderError, VideoJobs, VideoRequest};

pub const NO_RESULTS_MESSAGE: &str = "No generations found in job result.";

/// Poll timing.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PollSettings {
    /// Sleep before every poll in blocking mode.
    pub interval: Duration,
    /// Sleep before the status check in decoupled mode.
    pub status_delay: Duration,
    /// Give up on a blocking job after this long.
    pub max_wait: Option<Duration>,
}

impl Default for PollSettings {
    fn default() -> Self {
        Self::from(&VideoConfig::default())
    }
}

impl From<&VideoConfig> for PollSettings {
    fn from(config: &VideoConfig) -> Self {
        Self {
            interval: Duration::from_secs(config.poll_interval_secs),
            status_delay: Duration::from_secs(config.status_delay_secs),
            max_wait: config.max_wait_secs.map(Duration::from_secs),
        }
    }
}

/// Message for a job that ended without a usable result.
pub fn failure_message(job: &AsyncJob) -> String {
    if job.failure_reasons.is_empty() {
        format!("Video generation job failed. Status: {}", job.status)
    } else {
        job.failure_reasons.join(" ")
    }
}

/// Download the first asset of a succeeded job and base64-encode it.
async fn fetch_first(jobs: &dyn VideoJobs, job: &AsyncJob) -> Result<String, String> {
    let first = job
        .result_refs
        .first()
        .ok_or_else(|| NO_RESULTS_MESSAGE.to_string())?;
    let bytes = jobs
        .fetch_asset(first)
        .await
        .map_err(|e| format!("Video download failed: {}", e))?;
    tracing::info!(job_id = %job.id, bytes = bytes.len(), "Video downloaded");
    Ok(STANDARD.encode(&bytes))
}

/// Blocking mode: keep the connection open until the job finishes.
///
/// Polls are strictly sequential; a failed poll ends the request.
pub async fn run_blocking(
    request: &VideoRequest,
    jobs: &dyn VideoJobs,
    writer: &mut FrameWriter,
    settings: &PollSettings,
) {
    if writer.thinking().await.is_err() {
        return;
    }

    let job_id = match jobs.submit(request).await {
        Ok(id) => id,
        Err(e) => return writer.error(format!("Create job failed: {}", e)).await,
    };

    let started = Instant::now();
    let job = loop {
        tokio::time::sleep(settings.interval).await;

        if writer.is_closed() {
            tracing::info!(job_id = %job_id, "Client disconnected, abandoning video job");
            return;
        }
        if let Some(max_wait) = settings.max_wait {
            if started.elapsed() >= max_wait {
                let message = format!(
                    "Video generation job timed out after {}s",
                    max_wait.as_secs()
                );
                return writer.error(message).await;
            }
        }

        let job = match jobs.status(&job_id).await {
            Ok(job) => job,
            Err(e) => return writer.error(format!("Status poll failed: {}", e)).await,
        };
        tracing::info!(job_id = %job_id, status = %job.status, "Video job status");
        if job.status.is_terminal() {
            break job;
        }
    };

    if job.status != JobStatus::Succeeded {
        return writer.error(failure_message(&job)).await;
    }
    match fetch_first(jobs, &job).await {
        Ok(encoded) => {
            if writer.text(encoded).await.is_ok() {
                writer.done().await;
            }
        }
        Err(message) => writer.error(message).await,
    }
}

/// Decoupled mode, first half: start the job and return its escaped id.
pub async fn submit_job(request: &VideoRequest, jobs: &dyn VideoJobs) -> Result<String, ProviderError> {
    let id = jobs.submit(request).await?;
    Ok(escape_job_id(&id))
}

/// Result of one decoupled status check.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobCheck {
    /// Still running; ask again later.
    Pending,
    /// Base64 of the generated asset.
    Ready(String),
    /// Terminal failure, with a message for the user.
    Failed(String),
}

/// Decoupled mode, second half: wait, check the job once, and download
/// the asset if it is done.
pub async fn check_job(
    escaped_id: &str,
    jobs: &dyn VideoJobs,
    settings: &PollSettings,
) -> Result<JobCheck, ProviderError> {
    let job_id = unescape_job_id(escaped_id);
    tracing::info!(job_id = %job_id, "Checking video job");
    tokio::time::sleep(settings.status_delay).await;

    let job = jobs.status(&job_id).await?;
    if !job.status.is_terminal() {
        return Ok(JobCheck::Pending);
    }
    if job.status != JobStatus::Succeeded {
        return Ok(JobCheck::Failed(failure_message(&job)));
    }
    Ok(match fetch_first(jobs, &job).await {
        Ok(encoded) => JobCheck::Ready(encoded),
        Err(message) => JobCheck::Failed(message),
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_failure_message_joins_reasons() {
        let mut job = AsyncJob::new("j", JobStatus::Failed);
        job.failure_reasons = vec!["Contains a celebrity.".into(), "Try again.".into()];
        assert_eq!(failure_message(&job), "Contains a celebrity. Try again.");
    }

    #[test]
    fn test_failure_message_generic() {
        let job = AsyncJob::new("j", JobStatus::Cancelled);
        assert_eq!(
            failure_message(&job),
            "Video generation job failed. Status: cancelled"
        );
    }

    #[test]
    fn test_settings_from_config() {
        let settings = PollSettings::from(&VideoConfig {
            poll_interval_secs: 2,
            status_delay_secs: 3,
            max_wait_secs: Some(60),
        });
        assert_eq!(settings.interval, Duration::from_secs(2));
        assert_eq!(settings.status_delay, Duration::from_secs(3));
        assert_eq!(settings.max_wait, Some(Duration::from_secs(60)));
        assert_eq!(PollSettings::default().max_wait, None);
    }
}
