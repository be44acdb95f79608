//! CSV staging of projected rows for bulk reload.

use crate::{EtlError, Result};
use almsync_schema::{StagedRow, TableLayout};
use std::io::Write;
use std::path::{Path, PathBuf};

/// Write `rows` as CSV: a header of layout column names, then one record per
/// row. NULL is an empty unquoted field, which `COPY ... (FORMAT csv)` reads
/// back as NULL.
pub fn write_csv<W: Write>(layout: &TableLayout, rows: &[StagedRow], out: W) -> csv::Result<()> {
    let mut writer = csv::Writer::from_writer(out);
    writer.write_record(layout.columns.iter().map(|c| c.name.as_str()))?;
    for row in rows {
        let id = row.object_id.to_string();
        writer.write_record(layout.columns.iter().map(|c| {
            if c.identifier {
                id.as_str()
            } else {
                row.value(&c.name).as_text().unwrap_or("")
            }
        }))?;
    }
    writer.flush()?;
    Ok(())
}

/// File an entity's staging data is kept in.
pub fn staging_path(dir: &Path, entity: &str) -> PathBuf {
    dir.join(format!("{}.csv", entity.replace('/', "_")))
}

/// Stage `rows` in memory and, when `dir` is set, persist a copy there.
pub fn stage(layout: &TableLayout, rows: &[StagedRow], dir: Option<&Path>) -> Result<Vec<u8>> {
    let mut buffer = Vec::new();
    write_csv(layout, rows, &mut buffer).map_err(|e| EtlError::Staging {
        target: layout.entity.clone(),
        message: e.to_string(),
    })?;

    if let Some(dir) = dir {
        let path = staging_path(dir, &layout.entity);
        let failed = |e: std::io::Error| EtlError::Staging {
            target: path.display().to_string(),
            message: e.to_string(),
        };
        std::fs::create_dir_all(dir).map_err(failed)?;
        std::fs::write(&path, &buffer).map_err(failed)?;
        tracing::debug!(path = %path.display(), bytes = buffer.len(), "staging file written");
    }
    Ok(buffer)
}
