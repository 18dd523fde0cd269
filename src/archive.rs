//! Source archive reading.
//!
//! Archives are memory-mapped and walked entry by entry; only `.java` units
//! that pass the package allow-list are decoded and handed to the caller.

use memmap2::Mmap;
use std::fs::File;
use std::io::{Cursor, Read};
use std::path::Path;
use zip::ZipArchive;

use crate::error::{Error, Result};
use crate::model::{ApiRecord, STANDARD_LIBRARY_ROOTS};

/// Largest compilation unit read out of an archive.
pub const MAX_SOURCE_BYTES: u64 = 16 * 1024 * 1024;

/// Package-prefix filter. An empty list admits everything.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AllowList {
    roots: Vec<String>,
}

impl AllowList {
    pub fn new<I, S>(roots: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            roots: roots.into_iter().map(Into::into).collect(),
        }
    }

    pub fn all() -> Self {
        Self::default()
    }

    /// The standard library is restricted to its core namespaces.
    pub fn for_api(api: &ApiRecord) -> Self {
        if api.is_standard_library() {
            Self::new(STANDARD_LIBRARY_ROOTS)
        } else {
            Self::all()
        }
    }

    pub fn roots(&self) -> &[String] {
        &self.roots
    }

    pub fn matches_package(&self, package: &str) -> bool {
        self.roots.is_empty()
            || self.roots.iter().any(|root| {
                package == root
                    || package
                        .strip_prefix(root.as_str())
                        .is_some_and(|rest| rest.starts_with('.'))
            })
    }

    /// Matches an archive entry path such as `java/lang/String.java`. A leading
    /// module directory (`java.base/java/lang/String.java`) is ignored.
    pub fn matches_entry(&self, entry_path: &str) -> bool {
        if self.roots.is_empty() {
            return true;
        }
        let path = strip_module_dir(entry_path);
        self.roots.iter().any(|root| {
            path.strip_prefix(root.as_str())
                .is_some_and(|rest| rest.starts_with('/'))
        })
    }
}

fn strip_module_dir(entry_path: &str) -> &str {
    match entry_path.split_once('/') {
        Some((first, rest)) if first.contains('.') => rest,
        _ => entry_path,
    }
}

/// A decoded compilation unit.
#[derive(Debug, Clone)]
pub struct SourceEntry {
    pub path: String,
    pub text: String,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ArchiveSummary {
    pub entries: usize,
    pub sources: usize,
    pub filtered: usize,
}

pub fn is_source_entry(name: &str) -> bool {
    name.ends_with(".java")
        && !name.ends_with("package-info.java")
        && !name.ends_with("module-info.java")
}

/// Streams every allow-listed source unit in `archive_path` to `visit`.
///
/// Open and read failures are `ArchiveIo`, as is any source entry larger than
/// `MAX_SOURCE_BYTES`, whether declared or actual. An error returned by
/// `visit` stops the walk and is passed through.
pub fn for_each_source<F>(
    archive_path: &Path,
    allow: &AllowList,
    mut visit: F,
) -> Result<ArchiveSummary>
where
    F: FnMut(SourceEntry) -> Result<()>,
{
    let file = File::open(archive_path).map_err(|e| Error::archive(archive_path, e))?;
    // SAFETY: The file is opened read-only and outlives the mmap, which is
    // dropped at the end of this function.
    let mmap = unsafe { Mmap::map(&file) }.map_err(|e| Error::archive(archive_path, e))?;
    let mut archive =
        ZipArchive::new(Cursor::new(&mmap[..])).map_err(|e| Error::archive(archive_path, e))?;

    let mut summary = ArchiveSummary {
        entries: archive.len(),
        ..ArchiveSummary::default()
    };

    for i in 0..archive.len() {
        let mut entry = archive
            .by_index(i)
            .map_err(|e| Error::archive(archive_path, e))?;
        if entry.is_dir() {
            continue;
        }
        let name = entry.name().to_string();
        if !is_source_entry(&name) {
            continue;
        }
        if !allow.matches_entry(&name) {
            summary.filtered += 1;
            continue;
        }

        if entry.size() > MAX_SOURCE_BYTES {
            return Err(Error::archive(
                archive_path,
                format!("{name} declares {} bytes", entry.size()),
            ));
        }
        let mut bytes = Vec::with_capacity(entry.size() as usize);
        (&mut entry)
            .take(MAX_SOURCE_BYTES + 1)
            .read_to_end(&mut bytes)
            .map_err(|e| Error::archive(archive_path, e))?;
        if bytes.len() as u64 > MAX_SOURCE_BYTES {
            return Err(Error::archive(
                archive_path,
                format!("{name} exceeds {MAX_SOURCE_BYTES} bytes"),
            ));
        }
        let text = match String::from_utf8(bytes) {
            Ok(text) => text,
            Err(e) => {
                tracing::debug!(entry = %name, "source is not valid UTF-8, decoding lossily");
                String::from_utf8_lossy(e.as_bytes()).into_owned()
            }
        };

        summary.sources += 1;
        visit(SourceEntry { path: name, text })?;
    }

    Ok(summary)
}
