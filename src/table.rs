use anyhow::{Context, Result};
use chrono::NaiveDate;
use csv::{ReaderBuilder, WriterBuilder};
use std::{collections::BTreeMap, fs, path::Path};
use tempfile::NamedTempFile;
use tracing::{debug, warn};

/// One daily observation: `YYYYMMDD` key plus the value as text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub date_key: String,
    pub value: String,
}

impl Record {
    pub fn new(date_key: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            date_key: date_key.into(),
            value: value.into(),
        }
    }
}

/// Date-key -> value. `BTreeMap` keeps keys unique and ascending, which is
/// also chronological since keys are fixed-width `YYYYMMDD`.
pub type Table = BTreeMap<String, String>;

/// Convert an ISO-8601 timestamp (or bare `YYYY-MM-DD` date) into a `YYYYMMDD` key.
///
/// Only the text before `T` is looked at, so the calendar date is taken as
/// written and any time or offset suffix is ignored.
pub fn date_key(timestamp: &str) -> Result<String> {
    let ts = timestamp.trim();
    let date_part = ts.split_once('T').map_or(ts, |(d, _)| d);
    let date = NaiveDate::parse_from_str(date_part, "%Y-%m-%d")
        .with_context(|| format!("unrecognized timestamp {:?}", timestamp))?;
    Ok(date.format("%Y%m%d").to_string())
}

/// Read a table file. A missing file yields an empty table.
///
/// Rows with fewer than two fields are skipped with a warning; fields past
/// the second are ignored.
///
/// # Errors
/// Returns an error if the file exists but cannot be read or parsed as CSV.
pub fn load(path: &Path) -> Result<Table> {
    let mut table = Table::new();
    if !path.exists() {
        return Ok(table);
    }
    let mut rdr = ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("open {}", path.display()))?;
    for rec in rdr.records() {
        let r = rec.with_context(|| format!("read {}", path.display()))?;
        match (r.get(0), r.get(1)) {
            (Some(key), Some(value)) => {
                table.insert(key.to_string(), value.to_string());
            }
            _ => {
                let line = r.position().map(|p| p.line()).unwrap_or_default();
                warn!("{}:{}: short row skipped", path.display(), line);
            }
        }
    }
    Ok(table)
}

/// Fold records into the table. Later records win over earlier ones and
/// over values already present.
pub fn merge<I>(table: &mut Table, records: I)
where
    I: IntoIterator<Item = Record>,
{
    for r in records {
        table.insert(r.date_key, r.value);
    }
}

/// Write the table as `key,v,v,v,v,0` rows in ascending key order.
///
/// The file is written to a temp file next to `path` and renamed into place.
/// An existing file keeps its permissions; a new one gets `0o644` on unix.
///
/// # Errors
/// Returns an error if the temp file cannot be created, written or persisted.
pub fn save(path: &Path, table: &Table) -> Result<()> {
    let dir = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let mut tmp = NamedTempFile::new_in(dir)
        .with_context(|| format!("create temp file in {}", dir.display()))?;
    {
        let mut wtr = WriterBuilder::new()
            .has_headers(false)
            .from_writer(tmp.as_file_mut());
        for (key, value) in table {
            let v = value.as_str();
            wtr.write_record([key.as_str(), v, v, v, v, "0"])?;
        }
        wtr.flush()?;
    }
    match fs::metadata(path) {
        Ok(meta) => tmp.as_file().set_permissions(meta.permissions())?,
        Err(_) => set_new_file_mode(tmp.as_file())?,
    }
    tmp.persist(path)
        .with_context(|| format!("replace {}", path.display()))?;
    Ok(())
}

#[cfg(unix)]
fn set_new_file_mode(file: &fs::File) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    file.set_permissions(fs::Permissions::from_mode(0o644))
}

#[cfg(not(unix))]
fn set_new_file_mode(_file: &fs::File) -> std::io::Result<()> {
    Ok(())
}

/// Load, merge and rewrite the table at `path`. Returns the merged table.
pub fn update<I>(path: &Path, records: I) -> Result<Table>
where
    I: IntoIterator<Item = Record>,
{
    let mut table = load(path)?;
    let before = table.len();
    merge(&mut table, records);
    save(path, &table)?;
    debug!(
        "{}: {} rows ({} added)",
        path.display(),
        table.len(),
        table.len() - before
    );
    Ok(table)
}
