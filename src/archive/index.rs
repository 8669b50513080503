use std::collections::hash_map::Entry;
use std::collections::{HashMap, VecDeque};
use std::fs::File;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use parking_lot::Mutex;
use tempfile::TempDir;
use tracing::{debug, trace, warn};

use super::location::Location;
use super::source::ArchiveSource;
use super::ArchiveError;
use crate::config::{ExtractionConfig, NestedArchivePolicy, NestedConfig};

/// Flattened entry map of one module archive and every archive it bundles.
///
/// The map is built once and never mutated. Only the archive handles and
/// the extraction directory change state, and only when the index is closed.
pub struct ArchiveIndex {
    entries: HashMap<String, Location>,
    sources: Vec<Arc<ArchiveSource>>,
    storage: Mutex<Option<TempDir>>,
}

/// A bundled archive discovered while enumerating a source.
struct NestedEntry {
    index: usize,
    name: String,
}

/// Accumulates entries while the index is being built.
///
/// Dropping a partially built index drops its extraction directory with it.
struct IndexBuilder<'a> {
    nested: &'a NestedConfig,
    extraction: &'a ExtractionConfig,
    entries: HashMap<String, Location>,
    sources: Vec<Arc<ArchiveSource>>,
    storage: Option<TempDir>,
    extracted: usize,
    shadowed: usize,
}

impl ArchiveIndex {
    /// Index the archive at `path`, following bundled archives per `nested`.
    ///
    /// Fails if the outer archive cannot be opened or enumerated. Bundled
    /// archives that cannot be read are skipped or fatal per
    /// [`NestedArchivePolicy`].
    pub fn build(
        path: &Path,
        nested: &NestedConfig,
        extraction: &ExtractionConfig,
    ) -> Result<Self, ArchiveError> {
        let label = path.display().to_string();
        let outer = Arc::new(ArchiveSource::open(path, label)?);

        let mut builder = IndexBuilder {
            nested,
            extraction,
            entries: HashMap::new(),
            sources: Vec::new(),
            storage: None,
            extracted: 0,
            shadowed: 0,
        };

        let mut queue = VecDeque::new();
        queue.push_back((outer, 0usize));

        while let Some((source, depth)) = queue.pop_front() {
            let bundled = builder.index_source(&source, depth == 0)?;
            builder.sources.push(Arc::clone(&source));

            if depth >= nested.max_depth {
                if !bundled.is_empty() {
                    debug!(target: "modfed::archive", archive = source.label(), count = bundled.len(), depth, "Not following bundled archives past max depth");
                }
                continue;
            }

            for entry in bundled {
                match builder.extract(&source, &entry) {
                    Ok(child) => queue.push_back((child, depth + 1)),
                    Err(e) => builder.reject_nested(&source, &entry.name, e)?,
                }
            }
        }

        debug!(
            target: "modfed::archive",
            archive = %path.display(),
            entries = builder.entries.len(),
            sources = builder.sources.len(),
            shadowed = builder.shadowed,
            "Indexed archive"
        );

        Ok(Self {
            entries: builder.entries,
            sources: builder.sources,
            storage: Mutex::new(builder.storage),
        })
    }

    /// Look up an entry path.
    pub fn get(&self, entry: &str) -> Option<&Location> {
        self.entries.get(entry)
    }

    pub fn contains(&self, entry: &str) -> bool {
        self.entries.contains_key(entry)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// All indexed entry paths, sorted.
    pub fn entry_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.entries.keys().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Number of bundled archives that were indexed.
    pub fn nested_archive_count(&self) -> usize {
        self.sources.len().saturating_sub(1)
    }

    /// Directory holding extracted bundled archives, if any were extracted.
    pub fn extraction_dir(&self) -> Option<PathBuf> {
        self.storage.lock().as_ref().map(|dir| dir.path().to_path_buf())
    }

    /// Release every archive handle and delete extraction storage.
    ///
    /// Returns `false` if the index was already closed. Failing to delete
    /// the extraction directory is logged and otherwise ignored.
    pub fn close(&self) -> bool {
        let mut closed_any = false;
        for source in &self.sources {
            closed_any |= source.close();
        }

        if let Some(dir) = self.storage.lock().take() {
            closed_any = true;
            let dir_path = dir.path().to_path_buf();
            if let Err(e) = dir.close() {
                warn!(target: "modfed::archive", dir = %dir_path.display(), error = %e, "Failed to delete extraction storage");
            } else {
                trace!(target: "modfed::archive", dir = %dir_path.display(), "Deleted extraction storage");
            }
        }

        closed_any
    }
}

impl<'a> IndexBuilder<'a> {
    /// Insert every file entry of `source`, returning the bundled archives it lists.
    ///
    /// Errors enumerating the outer archive are fatal. In a bundled archive a
    /// single unreadable entry is skipped or fatal per policy.
    fn index_source(
        &mut self,
        source: &Arc<ArchiveSource>,
        is_outer: bool,
    ) -> Result<Vec<NestedEntry>, ArchiveError> {
        let listed = source
            .with_handle(|archive| {
                let mut listed = Vec::with_capacity(archive.len());
                for idx in 0..archive.len() {
                    // Metadata only: entries this build cannot decompress or
                    // decrypt are still indexed and fail when read.
                    match archive.by_index_raw(idx) {
                        Ok(entry) => {
                            if !entry.is_dir() {
                                listed.push(Ok((idx, entry.name().to_string(), entry.size())));
                            }
                        }
                        Err(source_err) => listed.push(Err((idx, source_err))),
                    }
                }
                listed
            })
            .unwrap_or_default();

        let mut bundled = Vec::new();
        for item in listed {
            let (idx, name, size) = match item {
                Ok(entry) => entry,
                Err((idx, zip_err)) => {
                    let err = ArchiveError::Zip {
                        archive: source.label().to_string(),
                        source: zip_err,
                    };
                    if is_outer || self.nested.policy == NestedArchivePolicy::FailModule {
                        return Err(err);
                    }
                    warn!(target: "modfed::archive", archive = source.label(), index = idx, error = %err, "Skipping unreadable entry in bundled archive");
                    continue;
                }
            };

            if self.nested.matches(&name) {
                bundled.push(NestedEntry {
                    index: idx,
                    name: name.clone(),
                });
            }

            match self.entries.entry(name) {
                Entry::Vacant(slot) => {
                    let location = Location::new(Arc::clone(source), idx, slot.key(), size);
                    slot.insert(location);
                }
                Entry::Occupied(slot) => {
                    self.shadowed += 1;
                    trace!(target: "modfed::archive", entry = slot.key().as_str(), archive = source.label(), "Entry shadowed by earlier source");
                }
            }
        }

        Ok(bundled)
    }

    /// Copy a bundled archive to extraction storage and open it.
    fn extract(
        &mut self,
        parent: &ArchiveSource,
        entry: &NestedEntry,
    ) -> Result<Arc<ArchiveSource>, ArchiveError> {
        let ordinal = self.extracted;
        self.extracted += 1;
        let dir = self.storage_dir().map_err(|source| ArchiveError::Extract {
            archive: parent.label().to_string(),
            entry: entry.name.clone(),
            source,
        })?;
        let target = dir.join(format!("nested-{}.jar", ordinal));

        let copied = parent.with_handle(|archive| -> Result<u64, ArchiveError> {
            let mut zipped = archive.by_index(entry.index).map_err(|source| ArchiveError::Zip {
                archive: parent.label().to_string(),
                source,
            })?;
            let mut out = File::create(&target).map_err(|source| ArchiveError::Extract {
                archive: parent.label().to_string(),
                entry: entry.name.clone(),
                source,
            })?;
            io::copy(&mut zipped, &mut out).map_err(|source| ArchiveError::Extract {
                archive: parent.label().to_string(),
                entry: entry.name.clone(),
                source,
            })
        });
        let bytes = match copied {
            Some(result) => result?,
            None => {
                return Err(ArchiveError::Extract {
                    archive: parent.label().to_string(),
                    entry: entry.name.clone(),
                    source: io::Error::new(io::ErrorKind::Other, "archive closed during indexing"),
                })
            }
        };

        let label = format!("{}!/{}", parent.label(), entry.name);
        trace!(target: "modfed::archive", archive = %label, bytes, "Extracted bundled archive");
        ArchiveSource::open(&target, label).map(Arc::new)
    }

    /// Apply the nested-archive policy to a bundled archive that failed.
    fn reject_nested(
        &self,
        parent: &ArchiveSource,
        entry: &str,
        error: ArchiveError,
    ) -> Result<(), ArchiveError> {
        match self.nested.policy {
            NestedArchivePolicy::SkipBadNestedEntry => {
                warn!(target: "modfed::archive", archive = parent.label(), entry, error = %error, "Skipping unreadable bundled archive");
                Ok(())
            }
            NestedArchivePolicy::FailModule => Err(ArchiveError::Nested {
                archive: parent.label().to_string(),
                entry: entry.to_string(),
                source: Box::new(error),
            }),
        }
    }

    /// Extraction directory, created on first use.
    fn storage_dir(&mut self) -> io::Result<PathBuf> {
        if self.storage.is_none() {
            let mut builder = tempfile::Builder::new();
            builder.prefix("modfed-");
            let dir = match &self.extraction.temp_dir {
                Some(root) => {
                    std::fs::create_dir_all(root)?;
                    builder.tempdir_in(root)?
                }
                None => builder.tempdir()?,
            };
            self.storage = Some(dir);
        }
        Ok(self
            .storage
            .as_ref()
            .map(|dir| dir.path().to_path_buf())
            .unwrap_or_default())
    }
}

impl Drop for ArchiveIndex {
    fn drop(&mut self) {
        self.close();
    }
}

impl std::fmt::Debug for ArchiveIndex {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ArchiveIndex")
            .field("entries", &self.entries.len())
            .field("nested_archives", &self.nested_archive_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::archive::ReadError;
    use crate::testing::{archive_bytes, break_local_header, raw_archive, write_archive, RawEntry};

    fn build(path: &Path) -> Result<ArchiveIndex, ArchiveError> {
        ArchiveIndex::build(path, &NestedConfig::default(), &ExtractionConfig::default())
    }

    #[test]
    fn test_index_flat_archive() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.jar");
        write_archive(&path, &[("com/x/Foo.class", b"foo"), ("plugin.txt", b"hello")]);

        let index = build(&path).unwrap();
        assert_eq!(index.len(), 2);
        assert_eq!(index.get("com/x/Foo.class").unwrap().read().unwrap(), b"foo");
        assert_eq!(index.get("plugin.txt").unwrap().read().unwrap(), b"hello");
        assert_eq!(index.nested_archive_count(), 0);
        assert!(index.extraction_dir().is_none());
    }

    #[test]
    fn test_empty_archive_is_valid() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("empty.jar");
        write_archive(&path, &[]);

        let index = build(&path).unwrap();
        assert!(index.is_empty());
        assert!(index.get("anything").is_none());
    }

    #[test]
    fn test_missing_archive_fails() {
        let err = build(Path::new("/nonexistent/plugin.jar")).unwrap_err();
        assert!(matches!(err, ArchiveError::Io { .. }));
    }

    #[test]
    fn test_corrupt_archive_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("corrupt.jar");
        std::fs::write(&path, b"definitely not a zip file").unwrap();

        let err = build(&path).unwrap_err();
        assert!(matches!(err, ArchiveError::Zip { .. }));
    }

    #[test]
    fn test_nested_archive_flattened() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.jar");
        let nested = archive_bytes(&[("org/dep/Dep.class", b"dep")]);
        write_archive(
            &path,
            &[("com/x/Foo.class", b"foo"), ("META-INF/lib/dep.jar", &nested)],
        );

        let index = build(&path).unwrap();
        assert_eq!(index.nested_archive_count(), 1);
        let location = index.get("org/dep/Dep.class").unwrap();
        assert_eq!(location.read().unwrap(), b"dep");
        assert!(location.origin().ends_with("!/META-INF/lib/dep.jar"));
        // The bundled archive itself stays addressable as a resource.
        assert!(index.contains("META-INF/lib/dep.jar"));
        assert!(index.extraction_dir().is_some());
    }

    #[test]
    fn test_outer_shadows_nested() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.jar");
        let nested = archive_bytes(&[("com/x/Foo.class", b"nested")]);
        write_archive(
            &path,
            &[("META-INF/lib/dep.jar", &nested), ("com/x/Foo.class", b"outer")],
        );

        let index = build(&path).unwrap();
        assert_eq!(index.get("com/x/Foo.class").unwrap().read().unwrap(), b"outer");
    }

    #[test]
    fn test_earlier_nested_shadows_later_nested() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.jar");
        let first = archive_bytes(&[("shared.txt", b"first")]);
        let second = archive_bytes(&[("shared.txt", b"second")]);
        write_archive(
            &path,
            &[("META-INF/lib/a.jar", &first), ("META-INF/lib/b.jar", &second)],
        );

        let index = build(&path).unwrap();
        assert_eq!(index.get("shared.txt").unwrap().read().unwrap(), b"first");
    }

    #[test]
    fn test_max_depth_limits_nesting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.jar");
        let inner = archive_bytes(&[("deep.txt", b"deep")]);
        let middle = archive_bytes(&[("mid.txt", b"mid"), ("META-INF/lib/inner.jar", &inner)]);
        write_archive(&path, &[("META-INF/lib/middle.jar", &middle)]);

        let shallow = build(&path).unwrap();
        assert!(shallow.contains("mid.txt"));
        assert!(!shallow.contains("deep.txt"));

        let nested = NestedConfig {
            max_depth: 2,
            ..NestedConfig::default()
        };
        let deep = ArchiveIndex::build(&path, &nested, &ExtractionConfig::default()).unwrap();
        assert_eq!(deep.get("deep.txt").unwrap().read().unwrap(), b"deep");
        assert_eq!(deep.nested_archive_count(), 2);
    }

    #[test]
    fn test_zero_depth_disables_nesting() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.jar");
        let nested = archive_bytes(&[("org/dep/Dep.class", b"dep")]);
        write_archive(&path, &[("META-INF/lib/dep.jar", &nested)]);

        let config = NestedConfig {
            max_depth: 0,
            ..NestedConfig::default()
        };
        let index = ArchiveIndex::build(&path, &config, &ExtractionConfig::default()).unwrap();
        assert!(!index.contains("org/dep/Dep.class"));
        assert!(index.extraction_dir().is_none());
    }

    #[test]
    fn test_corrupt_nested_skipped_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.jar");
        write_archive(
            &path,
            &[("com/x/Foo.class", b"foo"), ("META-INF/lib/bad.jar", b"not a zip")],
        );

        let index = build(&path).unwrap();
        assert!(index.contains("com/x/Foo.class"));
        assert_eq!(index.nested_archive_count(), 0);
    }

    #[test]
    fn test_corrupt_nested_fails_module_under_fail_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.jar");
        write_archive(&path, &[("META-INF/lib/bad.jar", b"not a zip")]);

        let config = NestedConfig {
            policy: NestedArchivePolicy::FailModule,
            ..NestedConfig::default()
        };
        let err = ArchiveIndex::build(&path, &config, &ExtractionConfig::default()).unwrap_err();
        assert!(matches!(err, ArchiveError::Nested { .. }));
        assert!(err.to_string().contains("META-INF/lib/bad.jar"));
    }

    #[test]
    fn test_custom_temp_dir_used_and_cleaned() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path().join("extract");
        let path = dir.path().join("plugin.jar");
        let nested = archive_bytes(&[("a.txt", b"a")]);
        write_archive(&path, &[("META-INF/lib/dep.jar", &nested)]);

        let extraction = ExtractionConfig {
            temp_dir: Some(root.clone()),
        };
        let index = ArchiveIndex::build(&path, &NestedConfig::default(), &extraction).unwrap();
        let storage = index.extraction_dir().unwrap();
        assert!(storage.starts_with(&root));
        assert!(storage.exists());

        assert!(index.close());
        assert!(!storage.exists());
    }

    #[test]
    fn test_close_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.jar");
        let nested = archive_bytes(&[("a.txt", b"a")]);
        write_archive(&path, &[("b.txt", b"b"), ("META-INF/lib/dep.jar", &nested)]);

        let index = build(&path).unwrap();
        let location = index.get("b.txt").unwrap().clone();

        assert!(index.close());
        assert!(!index.close());
        assert!(matches!(location.read(), Err(ReadError::Closed { .. })));
    }

    #[test]
    fn test_entry_names_sorted() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.jar");
        write_archive(&path, &[("b.txt", b"b"), ("a.txt", b"a")]);

        let index = build(&path).unwrap();
        assert_eq!(index.entry_names(), vec!["a.txt", "b.txt"]);
    }

    #[test]
    fn test_undecodable_entry_fails_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.jar");
        let bzip2 = RawEntry {
            method: 12,
            ..RawEntry::stored("notes.bz", b"BZh9")
        };
        std::fs::write(
            &path,
            raw_archive(&[RawEntry::stored("com/x/Foo.class", b"foo"), bzip2]),
        )
        .unwrap();

        let index = build(&path).unwrap();
        assert_eq!(index.get("com/x/Foo.class").unwrap().read().unwrap(), b"foo");
        let notes = index.get("notes.bz").unwrap();
        assert!(matches!(notes.read(), Err(ReadError::Zip { .. })));
    }

    #[test]
    fn test_oversized_declared_size_fails_on_read() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.jar");
        let big = RawEntry {
            declared_size: Some(1 << 63),
            ..RawEntry::stored("big.txt", b"tiny")
        };
        std::fs::write(&path, raw_archive(&[big])).unwrap();

        let index = build(&path).unwrap();
        let location = index.get("big.txt").unwrap();
        assert_eq!(location.size(), 1 << 63);
        match location.read() {
            Err(ReadError::SizeMismatch { declared, actual, .. }) => {
                assert_eq!(declared, 1 << 63);
                assert_eq!(actual, 4);
            }
            other => panic!("expected a size mismatch, got {:?}", other),
        }
    }

    #[test]
    fn test_bad_outer_entry_fails() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("plugin.jar");
        let mut bytes = archive_bytes(&[("a.txt", b"a"), ("b.txt", b"b")]);
        break_local_header(&mut bytes, 1);
        std::fs::write(&path, bytes).unwrap();

        let err = build(&path).unwrap_err();
        assert!(matches!(err, ArchiveError::Zip { .. }));
    }

    fn archive_with_bad_nested_entry(dir: &Path) -> PathBuf {
        let mut nested = archive_bytes(&[("good.txt", b"good"), ("bad.txt", b"bad")]);
        break_local_header(&mut nested, 1);
        let path = dir.join("plugin.jar");
        write_archive(&path, &[("outer.txt", b"outer"), ("META-INF/lib/dep.jar", &nested)]);
        path
    }

    #[test]
    fn test_bad_nested_entry_skipped_by_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = archive_with_bad_nested_entry(dir.path());

        let index = build(&path).unwrap();
        assert_eq!(index.nested_archive_count(), 1);
        assert_eq!(index.get("good.txt").unwrap().read().unwrap(), b"good");
        assert!(!index.contains("bad.txt"));
        assert!(index.contains("outer.txt"));
    }

    #[test]
    fn test_bad_nested_entry_fails_under_fail_policy() {
        let dir = tempfile::tempdir().unwrap();
        let path = archive_with_bad_nested_entry(dir.path());

        let config = NestedConfig {
            policy: NestedArchivePolicy::FailModule,
            ..NestedConfig::default()
        };
        let err = ArchiveIndex::build(&path, &config, &ExtractionConfig::default()).unwrap_err();
        assert!(matches!(err, ArchiveError::Zip { .. }));
        assert!(err.to_string().contains("META-INF/lib/dep.jar"));
    }
}
