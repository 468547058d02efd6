//! Progress estimation: reduces the normalized event stream of a job to one
//! calibrated, non-decreasing percentage.
//!
//! Policy per event kind:
//!
//! | input                        | policy                                   |
//! |------------------------------|------------------------------------------|
//! | direct numeric progress      | authoritative, clamped to `>= current`   |
//! | file arrival `i` of `n`      | calibrated bands, capped at [`SOFT_CEILING`] |
//! | milestone checkpoint         | lower bound (90 / 95)                    |
//! | terminal success / failure   | outcome; 100 only comes from here or a direct signal |
//!
//! Bands: the download band covers `0..70`, the packaging band `70..=95`.

use jobwatch_proto::protocol::ResultFile;

use crate::notification::{TerminalOutcome, GENERIC_FAILURE};

/// Upper end of the download band.
pub const DOWNLOAD_BAND: u32 = 70;
/// Width of the packaging band above [`DOWNLOAD_BAND`].
pub const PACKAGING_BAND: u32 = 25;
/// Highest value a fallback estimate may reach.
pub const SOFT_CEILING: u8 = 95;

pub const DOWNLOAD_COMPLETE_FLOOR: u8 = 90;
pub const ARCHIVE_COMPLETE_FLOOR: u8 = 95;

/// Which channel produced an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    Push,
    Poll,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventKind {
    Progress,
    Status,
    File,
    Checkpoint,
    Error,
    Result,
    /// Non-fatal sub-failure; the job continues.
    Warning,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Milestone {
    DownloadComplete,
    ArchiveComplete,
}

impl Milestone {
    pub fn parse(message: &str) -> Option<Self> {
        match message {
            "download_complete" => Some(Milestone::DownloadComplete),
            "zip_complete" | "archive_complete" => Some(Milestone::ArchiveComplete),
            _ => None,
        }
    }

    pub fn floor(&self) -> u8 {
        match self {
            Milestone::DownloadComplete => DOWNLOAD_COMPLETE_FLOOR,
            Milestone::ArchiveComplete => ARCHIVE_COMPLETE_FLOOR,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Terminal {
    Succeeded { files: Vec<ResultFile> },
    Failed { reason: String },
}

/// The one internal event shape both channels are normalized into.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    pub job_id: String,
    pub source: Source,
    pub kind: EventKind,
    pub numeric_progress: Option<f64>,
    pub step_label: Option<String>,
    pub file_index: Option<u32>,
    pub file_total: Option<u32>,
    pub milestone: Option<Milestone>,
    pub terminal: Option<Terminal>,
    pub message: Option<String>,
}

impl ProgressEvent {
    pub fn new(job_id: impl Into<String>, source: Source, kind: EventKind) -> Self {
        Self {
            job_id: job_id.into(),
            source,
            kind,
            numeric_progress: None,
            step_label: None,
            file_index: None,
            file_total: None,
            milestone: None,
            terminal: None,
            message: None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.terminal.is_some() || self.kind == EventKind::Error
    }

    /// Files delivered with a terminal success, if any.
    pub fn delivered_files(&self) -> Option<&[ResultFile]> {
        match &self.terminal {
            Some(Terminal::Succeeded { files }) if !files.is_empty() => Some(files),
            _ => None,
        }
    }
}

/// Phase of a multi-file job, as far as file-arrival estimation is concerned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Band {
    #[default]
    Downloading,
    Packaging,
}

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Estimate {
    /// New progress, only when strictly above the current value.
    pub progress: Option<u8>,
    pub band: Band,
    pub phase: Option<String>,
    pub outcome: Option<TerminalOutcome>,
    /// Secondary notice to raise without touching the job's own state.
    pub warning: Option<String>,
}

/// Reduce one event against the job's current progress and band.
pub fn estimate(current: u8, band: Band, event: &ProgressEvent) -> Estimate {
    let band = next_band(band, event);

    let candidate = match event.numeric_progress {
        Some(direct) => Some(clamp_percent(direct)),
        None => match (event.file_index, event.file_total) {
            (Some(index), Some(total)) if total > 0 => Some(file_estimate(index, total, band)),
            _ => None,
        },
    };
    let candidate = match (candidate, event.milestone) {
        (Some(c), Some(m)) => Some(c.max(m.floor())),
        (None, Some(m)) => Some(m.floor()),
        (c, None) => c,
    };

    let outcome = match (&event.terminal, event.kind) {
        (Some(Terminal::Succeeded { .. }), _) => Some(TerminalOutcome::Success),
        (Some(Terminal::Failed { reason }), _) => Some(TerminalOutcome::Failure(reason.clone())),
        (None, EventKind::Error) => Some(TerminalOutcome::Failure(
            event
                .message
                .clone()
                .filter(|m| !m.is_empty())
                .unwrap_or_else(|| GENERIC_FAILURE.to_string()),
        )),
        _ => None,
    };

    let warning = match event.kind {
        EventKind::Warning => event.message.clone(),
        _ => None,
    };

    Estimate {
        progress: candidate.filter(|c| *c > current),
        band,
        phase: event.step_label.clone().filter(|s| !s.is_empty()),
        outcome,
        warning,
    }
}

/// Estimate for "file `index` of `total` has arrived".
///
/// Downloading band: `floor(index / total * 70)`.  Packaging band:
/// `70 + floor(index / total * 25)`.  The larger applicable value wins,
/// capped at [`SOFT_CEILING`].
pub fn file_estimate(index: u32, total: u32, band: Band) -> u8 {
    let total = u64::from(total.max(1));
    let arrived = u64::from(index).min(total);
    let download = arrived * u64::from(DOWNLOAD_BAND) / total;
    let packaging = match band {
        Band::Packaging => u64::from(DOWNLOAD_BAND) + arrived * u64::from(PACKAGING_BAND) / total,
        Band::Downloading => 0,
    };
    download.max(packaging).min(u64::from(SOFT_CEILING)) as u8
}

fn next_band(band: Band, event: &ProgressEvent) -> Band {
    if band == Band::Packaging {
        return band;
    }
    if event.milestone.is_some() {
        return Band::Packaging;
    }
    match (event.file_index, event.file_total) {
        (Some(index), Some(total)) if total > 0 && index >= total => Band::Packaging,
        _ => band,
    }
}

fn clamp_percent(value: f64) -> u8 {
    if value.is_nan() {
        return 0;
    }
    value.clamp(0.0, 100.0).floor() as u8
}
