//! Test utilities for module federation integration tests
//!
//! Builds module archives on disk inside a temporary directory and installs
//! them into a registry with a resolver attached.
#![allow(dead_code)]

use std::fs::File;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use modfed::{AggregateResolver, LoaderConfig, ModKey, ModuleRegistry};
use tempfile::TempDir;
use zip::write::FileOptions;
use zip::ZipWriter;

/// Encode `entries` as a zip archive in memory.
pub fn archive_bytes(entries: &[(&str, &[u8])]) -> Vec<u8> {
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    for (name, bytes) in entries {
        writer
            .start_file(*name, FileOptions::default())
            .expect("start zip entry");
        writer.write_all(bytes).expect("write zip entry");
    }
    writer.finish().expect("finish zip").into_inner()
}

/// Write a zip archive containing `entries` to `path`.
pub fn write_archive(path: &Path, entries: &[(&str, &[u8])]) {
    let mut file = File::create(path).expect("create archive");
    file.write_all(&archive_bytes(entries))
        .expect("write archive");
}

/// A registry, an attached resolver and the directory holding the archives.
pub struct Fixture {
    pub dir: TempDir,
    pub registry: Arc<ModuleRegistry>,
    pub resolver: Arc<AggregateResolver>,
}

impl Fixture {
    pub fn new() -> Self {
        Self::with_config(LoaderConfig::default())
    }

    pub fn with_config(config: LoaderConfig) -> Self {
        let registry = Arc::new(ModuleRegistry::with_config(config));
        let resolver = AggregateResolver::attach(&registry);
        Self {
            dir: tempfile::tempdir().expect("temp dir"),
            registry,
            resolver,
        }
    }

    /// Path of the archive file for module `key`.
    pub fn archive_path(&self, key: &str) -> PathBuf {
        self.dir.path().join(format!("{}.jar", key))
    }

    /// Write an archive for `key` and install it, disabled.
    pub fn install(&self, key: &str, entries: &[(&str, &[u8])]) -> ModKey {
        let path = self.archive_path(key);
        write_archive(&path, entries);
        let key = ModKey::new(key);
        self.registry
            .install(key.clone(), &path)
            .expect("install module");
        key
    }

    /// Write, install and enable an archive for `key`.
    pub fn enable(&self, key: &str, entries: &[(&str, &[u8])]) -> ModKey {
        let key = self.install(key, entries);
        self.registry.enable(&key).expect("enable module");
        key
    }
}
