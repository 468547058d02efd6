//! Client-side job progress notifications.
//!
//! Jobs submitted to the download service are mirrored as short-lived
//! notifications.  Progress is merged from the job's push stream and a
//! status poller into one non-decreasing percentage, and each notification
//! runs a bounded lifecycle from creation to removal.
//!
//! [`NotificationFacade`] is the entry point; everything else runs inside a
//! single event loop ([`core::Core`]).

pub mod artifact;
pub mod backend;
pub mod channel;
pub mod core;
pub mod error;
pub mod estimator;
pub mod facade;
pub mod lifecycle;
pub mod notification;
pub mod registry;

pub use artifact::{ArtifactRetriever, LogRetriever};
pub use error::{Error, Result};
pub use facade::{NotificationFacade, Submission};
pub use lifecycle::{LogEntry, LogLevel, NotificationEvent};
pub use notification::{DisplayInfo, Notification, NotificationKind, NotificationState};
