//! Reading and writing collection packages: a zip holding the collection
//! database plus numbered media entries described by a JSON manifest.

use cardvault_core::{Error, Result};
use cardvault_store::{db_err, Store};
use std::collections::HashMap;
use std::fs::File;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use tempfile::TempDir;
use zip::write::SimpleFileOptions;
use zip::{ZipArchive, ZipWriter};

/// Name of the database entry inside a package.
pub const COLLECTION_ENTRY: &str = "collection.anki2";
/// Name of the media manifest entry: JSON object of zip entry number to
/// original filename.
pub const MANIFEST_ENTRY: &str = "media";

fn zip_err(e: zip::result::ZipError) -> Error {
    Error::Storage(format!("package: {e}"))
}

/// Write the collection at `db_path` plus the contents of `media_dir`
/// into a package at `out`. The WAL is checkpointed first so the copied
/// database file is self-contained. Returns the number of media files
/// packed.
pub async fn export_package(
    store: &Store,
    db_path: &Path,
    media_dir: Option<&Path>,
    out: &Path,
) -> Result<usize> {
    sqlx::query("PRAGMA wal_checkpoint(TRUNCATE)")
        .execute(store.pool())
        .await
        .map_err(db_err)?;
    let db_bytes = std::fs::read(db_path)?;

    let file = File::create(out)?;
    let mut zip = ZipWriter::new(file);
    let options = SimpleFileOptions::default()
        .compression_method(zip::CompressionMethod::Deflated);

    zip.start_file(COLLECTION_ENTRY, options).map_err(zip_err)?;
    zip.write_all(&db_bytes)?;

    let mut manifest: HashMap<String, String> = HashMap::new();
    let mut packed = 0usize;
    if let Some(dir) = media_dir {
        if dir.is_dir() {
            let mut names: Vec<String> = Vec::new();
            for dirent in std::fs::read_dir(dir)? {
                let dirent = dirent?;
                if dirent.metadata()?.is_file() {
                    names.push(dirent.file_name().to_string_lossy().into_owned());
                }
            }
            names.sort();
            for (idx, name) in names.iter().enumerate() {
                let num = idx.to_string();
                let data = std::fs::read(dir.join(name))?;
                zip.start_file(&num, options).map_err(zip_err)?;
                zip.write_all(&data)?;
                manifest.insert(num, name.clone());
                packed += 1;
            }
        }
    }

    zip.start_file(MANIFEST_ENTRY, options).map_err(zip_err)?;
    zip.write_all(serde_json::to_string(&manifest)?.as_bytes())?;
    zip.finish().map_err(zip_err)?;
    tracing::info!(media = packed, path = %out.display(), "package written");
    Ok(packed)
}

/// An opened package: the embedded database extracted to a temp dir, the
/// media manifest parsed, and the archive kept open for media reads.
pub struct PackageReader {
    archive: ZipArchive<File>,
    _tempdir: TempDir,
    db_path: PathBuf,
    manifest: HashMap<String, String>,
}

impl PackageReader {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)?;
        let mut archive = ZipArchive::new(file).map_err(zip_err)?;

        let tempdir = TempDir::new()?;
        let db_path = tempdir.path().join(COLLECTION_ENTRY);
        {
            let mut entry = archive
                .by_name(COLLECTION_ENTRY)
                .map_err(|_| Error::Invalid("package has no collection database"))?;
            let mut out = File::create(&db_path)?;
            std::io::copy(&mut entry, &mut out)?;
        }

        let manifest = match archive.by_name(MANIFEST_ENTRY) {
            Ok(mut entry) => {
                let mut buf = String::new();
                entry.read_to_string(&mut buf)?;
                serde_json::from_str(&buf)?
            }
            Err(_) => HashMap::new(),
        };

        Ok(Self {
            archive,
            _tempdir: tempdir,
            db_path,
            manifest,
        })
    }

    /// Path of the extracted database, valid while the reader lives.
    pub fn db_path(&self) -> &Path {
        &self.db_path
    }

    /// Manifest pairs of (zip entry number, original filename).
    pub fn media_entries(&self) -> impl Iterator<Item = (&str, &str)> {
        self.manifest
            .iter()
            .map(|(num, name)| (num.as_str(), name.as_str()))
    }

    pub fn media_count(&self) -> usize {
        self.manifest.len()
    }

    /// Bytes of the media file stored under zip entry `num`.
    pub fn read_media(&mut self, num: &str) -> Result<Vec<u8>> {
        let mut entry = self
            .archive
            .by_name(num)
            .map_err(|_| Error::NotFound("media entry"))?;
        let mut buf = Vec::with_capacity(entry.size() as usize);
        entry.read_to_end(&mut buf)?;
        Ok(buf)
    }
}
