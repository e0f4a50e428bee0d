//! The media folder and its change log. Files are added under
//! content-addressed dedup rules: a same-named file with identical bytes
//! is reused, a same-named file with different bytes is renamed with an
//! ` (n)` ordinal. Files already on disk are never overwritten or
//! deleted by any operation here.

use cardvault_core::{
    bump_ordinal, has_illegal, now_secs, split_ext, strip_illegal, Error, MediaEntry, MediaRefs,
    Result,
};
use cardvault_store::{bump_usn, db_err, media_from_row, Store};
use sqlx::Row;
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Result of a folder/database cross-reference.
#[derive(Clone, Debug, Default)]
pub struct MediaCheck {
    /// Referenced by a note field but absent from the folder.
    pub missing: Vec<String>,
    /// Present in the folder but referenced by no note.
    pub unused: Vec<String>,
    /// Present in the folder under a name the log cannot track.
    pub invalid: Vec<String>,
    /// Files the check could not read, with the reason. A bad file never
    /// aborts the cross-reference.
    pub errors: Vec<(String, String)>,
}

/// Outcome of a change-log scan.
#[derive(Clone, Debug, Default)]
pub struct ChangeReport {
    pub added: Vec<String>,
    pub removed: Vec<String>,
    /// Files the scan could not read, with the reason. A bad file never
    /// aborts the scan.
    pub errors: Vec<(String, String)>,
}

pub struct MediaManager {
    store: Arc<Store>,
    dir: PathBuf,
    refs: MediaRefs,
}

impl MediaManager {
    /// The folder sits next to the collection file, same stem with a
    /// `.media` extension, and is created on first use.
    pub fn new(store: Arc<Store>, col_path: &Path) -> Result<Self> {
        let dir = col_path.with_extension("media");
        std::fs::create_dir_all(&dir)?;
        Ok(Self {
            store,
            dir,
            refs: MediaRefs::new(),
        })
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub async fn add_file(&self, src: &Path) -> Result<String> {
        let name = src
            .file_name()
            .ok_or(Error::Invalid("media path has no filename"))?
            .to_string_lossy()
            .into_owned();
        let data = std::fs::read(src)?;
        self.add_data(&name, &data).await
    }

    /// Place `data` in the folder under `desired` or the first free
    /// ordinal variant of it, and return the name actually used.
    /// Identical content under a candidate name short-circuits to that
    /// name, which makes repeated adds idempotent.
    pub async fn add_data(&self, desired: &str, data: &[u8]) -> Result<String> {
        if data.is_empty() {
            return Err(Error::EmptyMedia(desired.to_string()));
        }
        let clean = strip_illegal(desired);
        if clean.is_empty() {
            return Err(Error::IllegalFilename(desired.to_string()));
        }
        let csum = checksum_hex(data);
        let (stem, ext) = split_ext(&clean);
        let mut stem = stem.to_string();
        loop {
            let candidate = format!("{stem}{ext}");
            let dest = self.dir.join(&candidate);
            if !dest.exists() {
                std::fs::write(&dest, data)?;
                self.record_addition(&candidate, &csum).await?;
                tracing::debug!(file = %candidate, "media file added");
                return Ok(candidate);
            }
            let existing = std::fs::read(&dest)?;
            if checksum_hex(&existing) == csum {
                // Same bytes already present under this name.
                self.record_addition(&candidate, &csum).await?;
                return Ok(candidate);
            }
            stem = bump_ordinal(&stem);
        }
    }

    /// Upsert the change-log row for a live file, marking it dirty.
    async fn record_addition(&self, fname: &str, csum: &str) -> Result<()> {
        let fname = fname.to_string();
        let csum = csum.to_string();
        self.store
            .transaction(move |conn| {
                Box::pin(async move {
                    bump_usn(conn).await?;
                    sqlx::query(
                        "INSERT OR REPLACE INTO media (fname, csum, mtime, dirty)
                         VALUES (?, ?, ?, 1)",
                    )
                    .bind(&fname)
                    .bind(&csum)
                    .bind(now_secs())
                    .execute(conn)
                    .await
                    .map_err(db_err)?;
                    Ok(())
                })
            })
            .await
    }

    /// Reconcile the change log with the folder. Cheap no-op when the
    /// folder mtime matches the last scan, unless `force`.
    pub async fn find_changes(&self, force: bool) -> Result<ChangeReport> {
        let dir_mod = mtime_secs(&self.dir)?;
        if !force {
            let seen: i64 = self
                .store
                .scalar("SELECT dir_mod FROM media_meta")
                .await?;
            if seen == dir_mod {
                return Ok(ChangeReport::default());
            }
        }

        let mut logged: HashMap<String, MediaEntry> = HashMap::new();
        for row in sqlx::query("SELECT fname, csum, mtime, dirty FROM media")
            .fetch_all(self.store.pool())
            .await
            .map_err(db_err)?
        {
            let entry = media_from_row(row)?;
            logged.insert(entry.fname.clone(), entry);
        }

        let mut report = ChangeReport::default();
        let mut on_disk: HashSet<String> = HashSet::new();
        let mut new_rows: Vec<(String, String, i64)> = Vec::new();

        for dirent in std::fs::read_dir(&self.dir)? {
            let dirent = dirent?;
            let name = dirent.file_name().to_string_lossy().into_owned();
            let meta = match dirent.metadata() {
                Ok(m) => m,
                Err(e) => {
                    report.errors.push((name, e.to_string()));
                    continue;
                }
            };
            // Subfolders, OS droppings and untrackable names are skipped.
            if meta.is_dir()
                || name.eq_ignore_ascii_case("thumbs.db")
                || name.eq_ignore_ascii_case(".ds_store")
            {
                continue;
            }
            if has_illegal(&name) {
                continue;
            }
            if meta.len() == 0 {
                continue;
            }
            on_disk.insert(name.clone());

            let mtime = meta
                .modified()
                .ok()
                .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                .map(|d| d.as_secs() as i64)
                .unwrap_or(0);
            let stale = match logged.get(&name) {
                // Known live file with an unchanged mtime is current.
                Some(entry) if entry.checksum.is_some() && entry.mtime_secs == mtime => false,
                _ => true,
            };
            if !stale {
                continue;
            }
            let data = match std::fs::read(dirent.path()) {
                Ok(d) => d,
                Err(e) => {
                    report.errors.push((name, e.to_string()));
                    continue;
                }
            };
            let csum = checksum_hex(&data);
            let changed = match logged.get(&name) {
                Some(entry) => entry.checksum.as_deref() != Some(csum.as_str()),
                None => true,
            };
            if changed {
                report.added.push(name.clone());
            }
            new_rows.push((name, csum, mtime));
        }

        // Logged files gone from disk become tombstones, once.
        let mut tombstones: Vec<String> = Vec::new();
        for (name, entry) in &logged {
            if entry.checksum.is_some() && !on_disk.contains(name) {
                tombstones.push(name.clone());
                report.removed.push(name.clone());
            }
        }

        if !new_rows.is_empty() || !tombstones.is_empty() || force {
            self.store
                .transaction(move |conn| {
                    Box::pin(async move {
                        bump_usn(conn).await?;
                        for (name, csum, mtime) in &new_rows {
                            sqlx::query(
                                "INSERT OR REPLACE INTO media (fname, csum, mtime, dirty)
                                 VALUES (?, ?, ?, 1)",
                            )
                            .bind(name)
                            .bind(csum)
                            .bind(mtime)
                            .execute(&mut *conn)
                            .await
                            .map_err(db_err)?;
                        }
                        for name in &tombstones {
                            sqlx::query(
                                "UPDATE media SET csum = NULL, mtime = ?, dirty = 1
                                 WHERE fname = ?",
                            )
                            .bind(now_secs())
                            .bind(name)
                            .execute(&mut *conn)
                            .await
                            .map_err(db_err)?;
                        }
                        sqlx::query("UPDATE media_meta SET dir_mod = ?")
                            .bind(dir_mod)
                            .execute(&mut *conn)
                            .await
                            .map_err(db_err)?;
                        Ok(())
                    })
                })
                .await?;
        } else {
            sqlx::query("UPDATE media_meta SET dir_mod = ?")
                .bind(dir_mod)
                .execute(self.store.pool())
                .await
                .map_err(db_err)?;
        }

        tracing::debug!(
            added = report.added.len(),
            removed = report.removed.len(),
            errors = report.errors.len(),
            "media scan finished"
        );
        Ok(report)
    }

    /// Cross-reference note fields against the folder. Filenames with a
    /// leading underscore are treated as static template assets and are
    /// never reported unused.
    pub async fn check(&self) -> Result<MediaCheck> {
        let mut referenced: HashSet<String> = HashSet::new();
        for row in sqlx::query("SELECT flds FROM notes")
            .fetch_all(self.store.pool())
            .await
            .map_err(db_err)?
        {
            let flds: String = row.get("flds");
            for fname in self.refs.files_in_str(&flds) {
                referenced.insert(fname.to_string());
            }
        }

        let mut check = MediaCheck::default();
        let mut on_disk: HashSet<String> = HashSet::new();
        for dirent in std::fs::read_dir(&self.dir)? {
            let dirent = dirent?;
            let name = dirent.file_name().to_string_lossy().into_owned();
            match dirent.metadata() {
                Ok(meta) if meta.is_dir() => continue,
                Ok(_) => {}
                Err(e) => {
                    check.errors.push((name, e.to_string()));
                    continue;
                }
            }
            if has_illegal(&name) {
                check.invalid.push(name);
                continue;
            }
            on_disk.insert(name);
        }

        for fname in &referenced {
            if !on_disk.contains(fname) {
                check.missing.push(fname.clone());
            }
        }
        for fname in &on_disk {
            if !referenced.contains(fname) && !fname.starts_with('_') {
                check.unused.push(fname.clone());
            }
        }
        check.missing.sort();
        check.unused.sort();
        check.invalid.sort();
        check.errors.sort();
        Ok(check)
    }

    /// Dirty change-log entries, for callers that sync the log elsewhere.
    pub async fn dirty_entries(&self) -> Result<Vec<MediaEntry>> {
        let rows = sqlx::query("SELECT fname, csum, mtime, dirty FROM media WHERE dirty = 1")
            .fetch_all(self.store.pool())
            .await
            .map_err(db_err)?;
        rows.into_iter().map(media_from_row).collect()
    }
}

pub(crate) fn checksum_hex(data: &[u8]) -> String {
    hex::encode(blake3::hash(data).as_bytes())
}

fn mtime_secs(path: &Path) -> Result<i64> {
    let meta = std::fs::metadata(path)?;
    Ok(meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0))
}
