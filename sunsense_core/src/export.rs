//! CSV export of session history.

use crate::exposure::compute_exposure_ratio;
use crate::{Result, UvSession};
use std::io::Write;
use std::path::Path;

/// A row in the CSV output
#[derive(Debug, serde::Serialize)]
struct CsvRow {
    id: String,
    date: String,
    start_time: String,
    end_time: Option<String>,
    duration_secs: Option<i64>,
    session_sed: f64,
    exposure_ratio: f64,
    sunscreen_applied: bool,
}

impl CsvRow {
    fn new(session: &UvSession, user_med: u32) -> Self {
        CsvRow {
            id: session.id.to_string(),
            date: session.date.to_string(),
            start_time: session.start_time.to_rfc3339(),
            end_time: session.end_time.map(|t| t.to_rfc3339()),
            duration_secs: session
                .end_time
                .map(|end| (end - session.start_time).num_seconds()),
            session_sed: round4(session.session_sed),
            exposure_ratio: round4(compute_exposure_ratio(session.session_sed, user_med)),
            sunscreen_applied: session.sunscreen_applied,
        }
    }
}

fn round4(v: f64) -> f64 {
    (v * 10_000.0).round() / 10_000.0
}

/// Write `sessions` as CSV with a header row; returns the row count
pub fn write_sessions_csv<W: Write>(sessions: &[UvSession], user_med: u32, out: W) -> Result<usize> {
    let mut writer = csv::Writer::from_writer(out);
    for session in sessions {
        writer.serialize(CsvRow::new(session, user_med))?;
    }
    writer.flush()?;
    Ok(sessions.len())
}

/// Export to a file, replacing it atomically
pub fn export_sessions_csv(sessions: &[UvSession], user_med: u32, path: &Path) -> Result<usize> {
    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    std::fs::create_dir_all(parent)?;

    let mut temp = tempfile::NamedTempFile::new_in(parent)?;
    let count = write_sessions_csv(sessions, user_med, temp.as_file_mut())?;
    temp.as_file().sync_all()?;
    temp.persist(path).map_err(|e| e.error)?;

    tracing::info!("Exported {} sessions to {:?}", count, path);
    Ok(count)
}
