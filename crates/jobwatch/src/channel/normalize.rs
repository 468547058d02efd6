//! Wire messages to [`ProgressEvent`]s.  Both channels go through here so the
//! estimator sees a single event shape.

use jobwatch_proto::protocol::{JobStatus, JobStreamMessage, PollStatus, ResultFile};

use crate::estimator::{EventKind, Milestone, ProgressEvent, Source, Terminal};
use crate::notification::GENERIC_FAILURE;

const CANCELED: &str = "Download canceled";
const ARCHIVE_FAILED: &str = "Archive could not be created; individual files are still available";

/// `None` for message types that carry nothing for the estimator.
pub fn normalize_job_message(job_id: &str, message: JobStreamMessage) -> Option<ProgressEvent> {
    let event = match message {
        JobStreamMessage::Progress {
            progress,
            raw_progress,
            step,
        } => {
            let mut ev = ProgressEvent::new(job_id, Source::Push, EventKind::Progress);
            ev.numeric_progress = progress.or(raw_progress);
            ev.step_label = step;
            ev
        }
        JobStreamMessage::Status {
            status,
            step,
            error,
            progress,
        } => {
            let mut ev = ProgressEvent::new(job_id, Source::Push, EventKind::Status);
            ev.numeric_progress = progress;
            ev.step_label = step;
            ev.terminal = status.and_then(|s| terminal(s, error, Vec::new()));
            ev
        }
        JobStreamMessage::File {
            name,
            filename,
            index,
            total,
        } => {
            let mut ev = ProgressEvent::new(job_id, Source::Push, EventKind::File);
            ev.file_index = index;
            ev.file_total = total;
            ev.step_label = name.or(filename).map(|n| format!("Fetched {n}"));
            ev
        }
        JobStreamMessage::Checkpoint { message } => {
            let mut ev = ProgressEvent::new(job_id, Source::Push, EventKind::Checkpoint);
            ev.milestone = message.as_deref().and_then(Milestone::parse);
            ev.step_label = message;
            ev
        }
        JobStreamMessage::Result { files } => {
            let mut ev = ProgressEvent::new(job_id, Source::Push, EventKind::Result);
            ev.terminal = Some(Terminal::Succeeded { files });
            ev
        }
        JobStreamMessage::Error { message } => {
            let mut ev = ProgressEvent::new(job_id, Source::Push, EventKind::Error);
            ev.message = message;
            ev
        }
        JobStreamMessage::ZipFailed { message, error } => {
            let mut ev = ProgressEvent::new(job_id, Source::Push, EventKind::Warning);
            ev.message = Some(
                message
                    .or(error)
                    .filter(|m| !m.is_empty())
                    .unwrap_or_else(|| ARCHIVE_FAILED.to_string()),
            );
            ev
        }
        JobStreamMessage::Unknown => return None,
    };
    Some(event)
}

pub fn normalize_poll(job_id: &str, poll: PollStatus) -> ProgressEvent {
    let mut ev = ProgressEvent::new(job_id, Source::Poll, EventKind::Status);
    ev.numeric_progress = Some(poll.progress);
    ev.step_label = poll.step;
    let files = poll.result.map(|r| r.files).unwrap_or_default();
    ev.terminal = terminal(poll.status, poll.error, files);
    ev
}

fn terminal(status: JobStatus, error: Option<String>, files: Vec<ResultFile>) -> Option<Terminal> {
    let error = error.filter(|e| !e.is_empty());
    match status {
        JobStatus::Succeeded => Some(Terminal::Succeeded { files }),
        JobStatus::Failed => Some(Terminal::Failed {
            reason: error.unwrap_or_else(|| GENERIC_FAILURE.to_string()),
        }),
        JobStatus::Canceled => Some(Terminal::Failed {
            reason: error.unwrap_or_else(|| CANCELED.to_string()),
        }),
        JobStatus::Queued | JobStatus::Running | JobStatus::Unknown => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use jobwatch_proto::protocol::JobResult;

    fn parse(json: &str) -> Option<ProgressEvent> {
        normalize_job_message("job-9", serde_json::from_str(json).unwrap())
    }

    #[test]
    fn test_raw_progress_used_when_progress_missing() {
        let ev = parse(r#"{"type":"progress","raw_progress":41.5,"step":"Downloading"}"#).unwrap();
        assert_eq!(ev.numeric_progress, Some(41.5));
        assert_eq!(ev.step_label.as_deref(), Some("Downloading"));
    }

    #[test]
    fn test_status_failed_carries_backend_reason() {
        let ev = parse(r#"{"type":"status","status":"failed","error":"Region locked"}"#).unwrap();
        assert_eq!(
            ev.terminal,
            Some(Terminal::Failed {
                reason: "Region locked".to_string()
            })
        );
    }

    #[test]
    fn test_status_succeeded_has_no_files() {
        let ev = parse(r#"{"type":"status","status":"succeeded"}"#).unwrap();
        assert!(ev.is_terminal());
        assert!(ev.delivered_files().is_none());
    }

    #[test]
    fn test_zip_failed_is_a_warning() {
        let ev = parse(r#"{"type":"zip_failed","error":"disk full"}"#).unwrap();
        assert_eq!(ev.kind, EventKind::Warning);
        assert_eq!(ev.message.as_deref(), Some("disk full"));
        assert!(!ev.is_terminal());
    }

    #[test]
    fn test_checkpoint_maps_milestones() {
        let ev = parse(r#"{"type":"checkpoint","message":"zip_complete"}"#).unwrap();
        assert_eq!(ev.milestone, Some(Milestone::ArchiveComplete));
        let ev = parse(r#"{"type":"checkpoint","message":"tagging"}"#).unwrap();
        assert_eq!(ev.milestone, None);
    }

    #[test]
    fn test_unknown_type_is_skipped() {
        assert!(parse(r#"{"type":"album_progress","progress":3}"#).is_none());
    }

    #[test]
    fn test_poll_success_resolves_files() {
        let ev = normalize_poll(
            "job-9",
            PollStatus {
                status: JobStatus::Succeeded,
                progress: 100.0,
                step: None,
                error: None,
                result: Some(JobResult {
                    files: vec![ResultFile {
                        name: "Album.zip".to_string(),
                        filename: "a1b2.zip".to_string(),
                    }],
                }),
            },
        );
        assert_eq!(ev.source, Source::Poll);
        assert_eq!(
            ev.delivered_files().map(|f| f[0].filename.as_str()),
            Some("a1b2.zip")
        );
    }

    #[test]
    fn test_poll_canceled_without_reason() {
        let ev = normalize_poll(
            "job-9",
            PollStatus {
                status: JobStatus::Canceled,
                progress: 12.0,
                step: None,
                error: Some(String::new()),
                result: None,
            },
        );
        assert_eq!(
            ev.terminal,
            Some(Terminal::Failed {
                reason: CANCELED.to_string()
            })
        );
    }
}
