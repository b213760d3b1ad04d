//! Detection catalog output as delimited text.

use std::io;
use std::path::Path;

use anyhow::{Context, Result};
use csv::Writer;
use log::info;

use crate::detect::Detection;

/// Flat field set for tabular output. The compound fit sub-record is
/// excluded by policy; consumers wanting fit parameters use the API.
const FIELDS: [&str; 5] = ["x", "y", "flux", "peak", "area"];

/// Write the catalog as CSV to `path`.
pub fn write_catalog<P: AsRef<Path>>(path: P, detections: &[Detection]) -> Result<()> {
    let path = path.as_ref();
    let writer = Writer::from_path(path)
        .with_context(|| format!("Failed to create catalog file {}", path.display()))?;
    write_records(writer, detections)?;
    info!("wrote {} detections to {}", detections.len(), path.display());
    Ok(())
}

/// Write the catalog as CSV to any writer.
pub fn write_catalog_to<W: io::Write>(writer: W, detections: &[Detection]) -> Result<()> {
    write_records(Writer::from_writer(writer), detections)
}

fn write_records<W: io::Write>(mut writer: Writer<W>, detections: &[Detection]) -> Result<()> {
    writer
        .write_record(FIELDS)
        .context("Failed to write catalog header")?;
    for d in detections {
        writer
            .write_record(&[
                d.x.to_string(),
                d.y.to_string(),
                d.flux.to_string(),
                d.peak.to_string(),
                d.area.to_string(),
            ])
            .context("Failed to write catalog record")?;
    }
    writer.flush().context("Failed to flush catalog")?;
    Ok(())
}
