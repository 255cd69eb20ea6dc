//! Named blob containers.
//!
//! Archive extraction itself lives outside this crate; engines only need an
//! ordered list of `(name, bytes)` entries.

use {
    crate::error::Result,
    log::debug,
    std::{fs, path::Path},
};

/// One file inside an archive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveEntry {
    /// File name.
    pub name: String,
    /// File contents.
    pub data: Vec<u8>,
}

/// Source of named blobs in encounter order.
pub trait ArchiveReader {
    /// All entries, in the order the archive stores them.
    fn entries(&self) -> &[ArchiveEntry];
}

/// In-memory archive.
#[derive(Debug, Clone, Default)]
pub struct Archive {
    entries: Vec<ArchiveEntry>,
}

impl Archive {
    /// Create an empty archive.
    pub fn new() -> Self {
        Self::default()
    }

    /// Append an entry.
    pub fn push(&mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) {
        self.entries
            .push(ArchiveEntry {
                name: name.into(),
                data: data.into(),
            });
    }

    /// Builder form of [`Archive::push`].
    #[must_use]
    pub fn with_entry(mut self, name: impl Into<String>, data: impl Into<Vec<u8>>) -> Self {
        self.push(name, data);
        self
    }

    /// Load every regular file of an extracted archive directory, sorted by
    /// name.
    pub fn from_dir(dir: impl AsRef<Path>) -> Result<Self> {
        let dir = dir.as_ref();
        let mut files = Vec::new();
        for entry in fs::read_dir(dir)? {
            let entry = entry?;
            if entry
                .file_type()?
                .is_file()
            {
                files.push(entry.path());
            }
        }
        files.sort();

        let mut archive = Self::new();
        for path in files {
            let name = path
                .file_name()
                .map(|n| {
                    n.to_string_lossy()
                        .into_owned()
                })
                .unwrap_or_default();
            let data = fs::read(&path)?;
            debug!("archive entry {name}: {} bytes", data.len());
            archive.push(name, data);
        }
        Ok(archive)
    }

    /// Number of entries.
    pub fn len(&self) -> usize {
        self.entries
            .len()
    }

    /// Whether the archive has no entries.
    pub fn is_empty(&self) -> bool {
        self.entries
            .is_empty()
    }
}

impl ArchiveReader for Archive {
    fn entries(&self) -> &[ArchiveEntry] {
        &self.entries
    }
}
