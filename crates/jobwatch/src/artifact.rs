//! Hand-off of finished artifacts to whatever actually fetches them.

use jobwatch_proto::protocol::ResultFile;
use tracing::info;

/// Receives the artifact of a successfully finished job.  Called at most
/// once per job, from the core loop, so implementations must not block.
pub trait ArtifactRetriever: Send + Sync {
    fn retrieve(&self, job_id: &str, file: &ResultFile, url: &str);
}

/// Records the download URL in the log and nothing else.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogRetriever;

impl ArtifactRetriever for LogRetriever {
    fn retrieve(&self, job_id: &str, file: &ResultFile, url: &str) {
        info!(job_id, name = %file.name, %url, "artifact ready");
    }
}
