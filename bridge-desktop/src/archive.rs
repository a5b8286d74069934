//! Local Archive Sources
//!
//! Two shapes of Takeout export on local disk:
//! - [`ZipArchiveSource`]: a directory of `.zip` files as downloaded
//! - [`DirectoryArchiveSource`]: a directory of already extracted exports,
//!   one sub-directory per archive
//!
//! Both address archives by their filesystem path, so [`ArchiveRef::id`] is
//! a path. Blocking zip and directory I/O runs on the blocking pool.

use async_trait::async_trait;
use bridge_traits::{
    archive::{ArchiveEntry, ArchiveRef, ArchiveSource},
    error::{BridgeError, Result},
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use core_async::task::spawn_blocking;
use std::fs;
use std::io::{self, Read};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};
use tracing::{debug, instrument};

/// Upper bound on the buffer reserved from a zip header's declared size.
const MAX_PREALLOCATION: u64 = 64 * 1024 * 1024;

/// Opened zips kept between reads.
const OPEN_ARCHIVE_LIMIT: usize = 4;

async fn blocking<T, F>(f: F) -> Result<T>
where
    F: FnOnce() -> Result<T> + Send + 'static,
    T: Send + 'static,
{
    spawn_blocking(f)
        .await
        .map_err(|e| BridgeError::OperationFailed(format!("blocking task failed: {}", e)))?
}

fn archive_ref(path: &Path, metadata: &fs::Metadata) -> ArchiveRef {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string_lossy().into_owned());
    let mut archive = ArchiveRef::new(path.to_string_lossy().into_owned(), name);
    archive.modified_at = metadata.modified().ok().map(DateTime::<Utc>::from);
    if metadata.is_file() {
        archive.size = Some(metadata.len());
    }
    archive
}

fn is_zip(path: &Path) -> bool {
    path.extension()
        .map(|ext| ext.eq_ignore_ascii_case("zip"))
        .unwrap_or(false)
}

/// Read `reader` to the end. `declared` only sizes the first allocation, so
/// a header claiming terabytes cannot abort the process.
fn read_declared(mut reader: impl Read, declared: u64) -> io::Result<Vec<u8>> {
    let mut data = Vec::with_capacity(declared.min(MAX_PREALLOCATION) as usize);
    reader.read_to_end(&mut data)?;
    Ok(data)
}

fn zip_error(archive: &str, e: zip::result::ZipError) -> BridgeError {
    match e {
        zip::result::ZipError::Io(io) => BridgeError::Io(io),
        zip::result::ZipError::FileNotFound => {
            BridgeError::NotFound(format!("entry missing in {}", archive))
        }
        other => BridgeError::OperationFailed(format!("{}: {}", archive, other)),
    }
}

type SharedZip = Arc<Mutex<zip::ZipArchive<fs::File>>>;

/// Parsed central directories, most recently used last.
#[derive(Default)]
struct OpenArchives {
    entries: Vec<(String, SharedZip)>,
}

impl OpenArchives {
    fn get(&mut self, id: &str) -> Option<SharedZip> {
        let index = self.entries.iter().position(|(key, _)| key == id)?;
        let entry = self.entries.remove(index);
        let zip = entry.1.clone();
        self.entries.push(entry);
        Some(zip)
    }

    fn insert(&mut self, id: &str, zip: SharedZip) {
        self.entries.retain(|(key, _)| key != id);
        if self.entries.len() >= OPEN_ARCHIVE_LIMIT {
            self.entries.remove(0);
        }
        self.entries.push((id.to_string(), zip));
    }
}

/// Directory of Takeout `.zip` files. A path that points at a single zip is
/// accepted too.
///
/// The central directory of a zip is parsed once and reused for every entry
/// read from it; listing an archive refreshes it.
pub struct ZipArchiveSource {
    root: PathBuf,
    open: Arc<Mutex<OpenArchives>>,
}

impl ZipArchiveSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            open: Arc::new(Mutex::new(OpenArchives::default())),
        }
    }

    fn open(path: &str) -> Result<zip::ZipArchive<fs::File>> {
        let file = fs::File::open(path)?;
        zip::ZipArchive::new(file).map_err(|e| zip_error(path, e))
    }

    fn cache(open: &Mutex<OpenArchives>) -> Result<std::sync::MutexGuard<'_, OpenArchives>> {
        open.lock()
            .map_err(|_| BridgeError::OperationFailed("zip cache poisoned".to_string()))
    }

    /// The cached archive for `id`, parsing it on first use.
    fn shared(open: &Mutex<OpenArchives>, id: &str) -> Result<SharedZip> {
        if let Some(zip) = Self::cache(open)?.get(id) {
            return Ok(zip);
        }
        let zip = Arc::new(Mutex::new(Self::open(id)?));
        Self::cache(open)?.insert(id, zip.clone());
        debug!(archive = id, "Zip index loaded");
        Ok(zip)
    }
}

#[async_trait]
impl ArchiveSource for ZipArchiveSource {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn list_archives(&self) -> Result<Vec<ArchiveRef>> {
        let root = self.root.clone();
        let archives = blocking(move || {
            let metadata = fs::metadata(&root)?;
            if metadata.is_file() {
                return Ok(if is_zip(&root) {
                    vec![archive_ref(&root, &metadata)]
                } else {
                    Vec::new()
                });
            }

            let mut archives = Vec::new();
            for entry in fs::read_dir(&root)? {
                let entry = entry?;
                let path = entry.path();
                let metadata = entry.metadata()?;
                if metadata.is_file() && is_zip(&path) {
                    archives.push(archive_ref(&path, &metadata));
                }
            }
            Ok(archives)
        })
        .await?;

        debug!(count = archives.len(), "Listed zip archives");
        Ok(archives)
    }

    async fn list_entries(&self, archive: &ArchiveRef) -> Result<Vec<ArchiveEntry>> {
        let id = archive.id.clone();
        let open = self.open.clone();
        blocking(move || {
            let mut zip = Self::open(&id)?;
            let mut entries = Vec::with_capacity(zip.len());
            for index in 0..zip.len() {
                let file = zip.by_index(index).map_err(|e| zip_error(&id, e))?;
                if file.is_dir() {
                    continue;
                }
                entries.push(ArchiveEntry::new(file.name(), file.size()));
            }
            Self::cache(&open)?.insert(&id, Arc::new(Mutex::new(zip)));
            Ok(entries)
        })
        .await
    }

    async fn read_entry(&self, archive: &ArchiveRef, path: &str) -> Result<Bytes> {
        let id = archive.id.clone();
        let path = path.to_string();
        let open = self.open.clone();
        blocking(move || {
            let shared = Self::shared(&open, &id)?;
            let mut zip = shared
                .lock()
                .map_err(|_| BridgeError::OperationFailed(format!("{}: zip handle poisoned", id)))?;
            let file = zip.by_name(&path).map_err(|e| match e {
                zip::result::ZipError::FileNotFound => {
                    BridgeError::NotFound(format!("{} in {}", path, id))
                }
                other => zip_error(&id, other),
            })?;
            let declared = file.size();
            Ok(Bytes::from(read_declared(file, declared)?))
        })
        .await
    }
}

/// Directory of extracted exports: every immediate sub-directory of the root
/// is one archive, and its files (recursively) are the entries.
pub struct DirectoryArchiveSource {
    root: PathBuf,
}

impl DirectoryArchiveSource {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn walk(base: &Path, dir: &Path, out: &mut Vec<ArchiveEntry>) -> Result<()> {
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            let path = entry.path();
            let metadata = entry.metadata()?;
            if metadata.is_dir() {
                Self::walk(base, &path, out)?;
            } else if metadata.is_file() {
                let relative = path.strip_prefix(base).unwrap_or(&path);
                let relative: Vec<String> = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy().into_owned())
                    .collect();
                out.push(ArchiveEntry::new(relative.join("/"), metadata.len()));
            }
        }
        Ok(())
    }

    /// Resolve `path` inside the archive, refusing anything that escapes it.
    fn resolve(archive: &ArchiveRef, path: &str) -> Result<PathBuf> {
        let mut resolved = PathBuf::from(&archive.id);
        for part in path.split('/') {
            match part {
                "" | "." => continue,
                ".." => {
                    return Err(BridgeError::OperationFailed(format!(
                        "entry path escapes archive: {}",
                        path
                    )))
                }
                part => resolved.push(part),
            }
        }
        Ok(resolved)
    }
}

#[async_trait]
impl ArchiveSource for DirectoryArchiveSource {
    #[instrument(skip(self), fields(root = %self.root.display()))]
    async fn list_archives(&self) -> Result<Vec<ArchiveRef>> {
        let root = self.root.clone();
        let archives = blocking(move || {
            let mut archives = Vec::new();
            for entry in fs::read_dir(&root)? {
                let entry = entry?;
                let metadata = entry.metadata()?;
                if metadata.is_dir() {
                    archives.push(archive_ref(&entry.path(), &metadata));
                }
            }
            Ok(archives)
        })
        .await?;

        debug!(count = archives.len(), "Listed extracted archives");
        Ok(archives)
    }

    async fn list_entries(&self, archive: &ArchiveRef) -> Result<Vec<ArchiveEntry>> {
        let base = PathBuf::from(&archive.id);
        blocking(move || {
            let mut entries = Vec::new();
            Self::walk(&base, &base, &mut entries)?;
            entries.sort_by(|a, b| a.path.cmp(&b.path));
            Ok(entries)
        })
        .await
    }

    async fn read_entry(&self, archive: &ArchiveRef, path: &str) -> Result<Bytes> {
        let resolved = Self::resolve(archive, path)?;
        match core_async::fs::read(&resolved).await {
            Ok(data) => Ok(Bytes::from(data)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BridgeError::NotFound(
                format!("{} in {}", path, archive.name),
            )),
            Err(e) => Err(BridgeError::Io(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use zip::write::SimpleFileOptions;

    fn write_zip(path: &Path, files: &[(&str, &[u8])]) {
        let file = fs::File::create(path).unwrap();
        let mut zip = zip::ZipWriter::new(file);
        zip.add_directory("Takeout/", SimpleFileOptions::default())
            .unwrap();
        for (name, data) in files {
            zip.start_file(*name, SimpleFileOptions::default()).unwrap();
            zip.write_all(data).unwrap();
        }
        zip.finish().unwrap();
    }

    #[tokio::test]
    async fn test_zip_source_lists_and_reads() {
        let dir = tempfile::tempdir().unwrap();
        write_zip(
            &dir.path().join("takeout-001.zip"),
            &[
                ("Takeout/Google Photos/a.jpg", b"jpeg-bytes"),
                ("Takeout/Google Photos/a.jpg.json", b"{}"),
            ],
        );
        fs::write(dir.path().join("readme.txt"), b"not an archive").unwrap();

        let source = ZipArchiveSource::new(dir.path());
        let archives = source.list_archives().await.unwrap();
        assert_eq!(archives.len(), 1);
        assert_eq!(archives[0].name, "takeout-001.zip");
        assert!(archives[0].modified_at.is_some());

        let entries = source.list_entries(&archives[0]).await.unwrap();
        let paths: Vec<&str> = entries.iter().map(|e| e.path.as_str()).collect();
        assert_eq!(
            paths,
            vec!["Takeout/Google Photos/a.jpg", "Takeout/Google Photos/a.jpg.json"]
        );

        let data = source
            .read_entry(&archives[0], "Takeout/Google Photos/a.jpg")
            .await
            .unwrap();
        assert_eq!(&data[..], b"jpeg-bytes");
    }

    #[tokio::test]
    async fn test_zip_source_missing_entry() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("takeout-001.zip");
        write_zip(&path, &[("Takeout/a.jpg", b"x")]);

        let source = ZipArchiveSource::new(&path);
        let archives = source.list_archives().await.unwrap();
        assert_eq!(archives.len(), 1);

        let err = source
            .read_entry(&archives[0], "Takeout/b.jpg")
            .await
            .unwrap_err();
        assert!(matches!(err, BridgeError::NotFound(_)));
    }

    #[tokio::test]
    async fn test_zip_index_is_reused_across_reads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("takeout-001.zip");
        write_zip(
            &path,
            &[("Takeout/a.jpg", b"first"), ("Takeout/b.jpg", b"second")],
        );

        let source = ZipArchiveSource::new(dir.path());
        let archives = source.list_archives().await.unwrap();
        source.list_entries(&archives[0]).await.unwrap();

        // Reads go through the handle opened while listing.
        fs::remove_file(&path).unwrap();
        let a = source.read_entry(&archives[0], "Takeout/a.jpg").await.unwrap();
        let b = source.read_entry(&archives[0], "Takeout/b.jpg").await.unwrap();
        assert_eq!(&a[..], b"first");
        assert_eq!(&b[..], b"second");
        assert!(matches!(
            source.read_entry(&archives[0], "Takeout/c.jpg").await,
            Err(BridgeError::NotFound(_))
        ));
    }

    #[test]
    fn test_open_archive_cache_is_bounded() {
        let dir = tempfile::tempdir().unwrap();
        let mut cache = OpenArchives::default();
        for i in 0..OPEN_ARCHIVE_LIMIT + 2 {
            let path = dir.path().join(format!("takeout-{i}.zip"));
            write_zip(&path, &[("Takeout/a.jpg", b"x")]);
            let id = path.to_string_lossy().into_owned();
            let zip = ZipArchiveSource::open(&id).unwrap();
            cache.insert(&id, Arc::new(Mutex::new(zip)));
        }

        assert_eq!(cache.entries.len(), OPEN_ARCHIVE_LIMIT);
        let oldest = dir.path().join("takeout-0.zip").to_string_lossy().into_owned();
        let newest = dir
            .path()
            .join(format!("takeout-{}.zip", OPEN_ARCHIVE_LIMIT + 1))
            .to_string_lossy()
            .into_owned();
        assert!(cache.get(&oldest).is_none());
        assert!(cache.get(&newest).is_some());
    }

    #[test]
    fn test_oversized_declared_size_is_not_trusted() {
        let data = read_declared(&b"small entry"[..], 1 << 40).unwrap();
        assert_eq!(data, b"small entry");
        assert!(data.capacity() as u64 <= MAX_PREALLOCATION);
    }

    #[tokio::test]
    async fn test_corrupt_zip_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.zip");
        fs::write(&path, b"definitely not a zip").unwrap();

        let source = ZipArchiveSource::new(dir.path());
        let archives = source.list_archives().await.unwrap();
        assert!(source.list_entries(&archives[0]).await.is_err());
    }

    #[tokio::test]
    async fn test_directory_source() {
        let dir = tempfile::tempdir().unwrap();
        let photos = dir.path().join("takeout-20260101").join("Google Photos");
        fs::create_dir_all(&photos).unwrap();
        fs::write(photos.join("b.jpg"), b"bbb").unwrap();
        fs::write(photos.join("b.jpg.json"), b"{}").unwrap();
        fs::write(dir.path().join("stray.txt"), b"ignored").unwrap();

        let source = DirectoryArchiveSource::new(dir.path());
        let archives = source.list_archives().await.unwrap();
        assert_eq!(archives.len(), 1);
        assert_eq!(archives[0].name, "takeout-20260101");

        let entries = source.list_entries(&archives[0]).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].path, "Google Photos/b.jpg");
        assert_eq!(entries[0].size, 3);

        let data = source
            .read_entry(&archives[0], "Google Photos/b.jpg")
            .await
            .unwrap();
        assert_eq!(&data[..], b"bbb");

        assert!(source
            .read_entry(&archives[0], "../stray.txt")
            .await
            .is_err());
        assert!(matches!(
            source.read_entry(&archives[0], "Google Photos/c.jpg").await,
            Err(BridgeError::NotFound(_))
        ));
    }
}
