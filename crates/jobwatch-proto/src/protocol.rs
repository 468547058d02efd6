use serde::{Deserialize, Deserializer, Serialize};

/// Backend job lifecycle as reported by the poll endpoint and `status` events.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum JobStatus {
    Queued,
    Running,
    Succeeded,
    Failed,
    Canceled,
    /// A status this client does not know; treated as still running.
    #[serde(other)]
    Unknown,
}

impl JobStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            JobStatus::Succeeded | JobStatus::Failed | JobStatus::Canceled
        )
    }
}

/// One stored artifact of a finished job.  `filename` is the server-side
/// reference handed to the download endpoint; `name` is what the user sees.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ResultFile {
    #[serde(default)]
    pub name: String,
    pub filename: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct JobResult {
    #[serde(default)]
    pub files: Vec<ResultFile>,
}

/// Reply of `GET /api/jobs/{id}`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PollStatus {
    pub status: JobStatus,
    #[serde(default)]
    pub progress: f64,
    #[serde(default)]
    pub step: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub result: Option<JobResult>,
}

/// Messages on the global `/api/status` stream.  Anything with an
/// unrecognised `type` lands in `Unknown`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum GlobalMessage {
    Info {
        #[serde(default)]
        message: String,
        #[serde(default, deserialize_with = "opt_id")]
        track_id: Option<String>,
    },
    Success {
        #[serde(default)]
        message: String,
    },
    Error {
        #[serde(default)]
        message: String,
    },
    Heartbeat,
    #[serde(other)]
    Unknown,
}

/// Messages on a per-job `/api/jobs/{id}/events` stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum JobStreamMessage {
    Progress {
        #[serde(default)]
        progress: Option<f64>,
        #[serde(default)]
        raw_progress: Option<f64>,
        #[serde(default)]
        step: Option<String>,
    },
    Status {
        #[serde(default)]
        status: Option<JobStatus>,
        #[serde(default)]
        step: Option<String>,
        #[serde(default)]
        error: Option<String>,
        #[serde(default)]
        progress: Option<f64>,
    },
    File {
        #[serde(default)]
        name: Option<String>,
        #[serde(default)]
        filename: Option<String>,
        #[serde(default)]
        index: Option<u32>,
        #[serde(default)]
        total: Option<u32>,
    },
    Checkpoint {
        #[serde(default)]
        message: Option<String>,
    },
    Result {
        #[serde(default)]
        files: Vec<ResultFile>,
    },
    Error {
        #[serde(default)]
        message: Option<String>,
    },
    ZipFailed {
        #[serde(default)]
        message: Option<String>,
        #[serde(default)]
        error: Option<String>,
    },
    #[serde(other)]
    Unknown,
}

/// Body of `POST /api/jobs`.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct JobRequest {
    pub service: String,
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub query: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub item: Option<serde_json::Value>,
}

/// Reply of `POST /api/jobs`: either `{id}` or `{error}`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct SubmitReply {
    #[serde(default, deserialize_with = "opt_id")]
    pub id: Option<String>,
    #[serde(default)]
    pub error: Option<String>,
}

impl SubmitReply {
    /// The accepted job id, or the backend's reason for refusing it.
    pub fn into_result(self) -> Result<String, String> {
        match (self.id, self.error) {
            (_, Some(error)) => Err(error),
            (Some(id), None) if !id.is_empty() => Ok(id),
            _ => Err("Backend returned no job id".to_string()),
        }
    }
}

/// Reply of `POST /api/cancel-downloads`.
#[derive(Debug, Clone, Serialize, Deserialize, Default, PartialEq)]
pub struct CancelReply {
    #[serde(default)]
    pub success: bool,
}

/// Ids arrive as strings from some services and bare numbers from others.
fn opt_id<'de, D>(deserializer: D) -> Result<Option<String>, D::Error>
where
    D: Deserializer<'de>,
{
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Id {
        Str(String),
        Num(u64),
    }

    Ok(match Option::<Id>::deserialize(deserializer)? {
        Some(Id::Str(s)) if !s.is_empty() => Some(s),
        Some(Id::Num(n)) => Some(n.to_string()),
        _ => None,
    })
}
