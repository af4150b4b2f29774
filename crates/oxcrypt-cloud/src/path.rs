//! Remote entry identity and metadata.
//!
//! A [`Path`] names an entry in a backend: `/` separated segments plus a type
//! tag. The first segment is the *container* (a volume or bucket in object
//! stores). Paths carry the [`PathAttributes`] of the listing or lookup that
//! produced them, but attributes never take part in equality.

use std::fmt;
use std::hash::{Hash, Hasher};
use std::time::SystemTime;

use relative_path::{RelativePath, RelativePathBuf};

use crate::checksum::Checksum;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntryType {
    File,
    Directory,
    /// Top-level container of an object store
    Volume,
}

/// Metadata of a remote entry as reported by a backend or computed by a vault.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PathAttributes {
    pub size: Option<u64>,
    pub checksum: Option<Checksum>,
    pub modified: Option<SystemTime>,
    pub version_id: Option<String>,
}

impl PathAttributes {
    #[must_use]
    pub fn with_size(mut self, size: u64) -> Self {
        self.size = Some(size);
        self
    }

    #[must_use]
    pub fn with_checksum(mut self, checksum: Checksum) -> Self {
        self.checksum = Some(checksum);
        self
    }

    #[must_use]
    pub fn with_modified(mut self, modified: SystemTime) -> Self {
        self.modified = Some(modified);
        self
    }
}

#[derive(Debug, Clone)]
pub struct Path {
    path: RelativePathBuf,
    kind: EntryType,
    attributes: PathAttributes,
}

fn normalize(raw: &str) -> RelativePathBuf {
    let mut normalized = RelativePathBuf::new();
    for component in RelativePath::new(raw.trim_matches('/')).components() {
        normalized.push(component.as_str());
    }
    normalized
}

impl Path {
    /// Build a path from `/` separated text. Empty segments are dropped.
    pub fn new(path: impl AsRef<str>, kind: EntryType) -> Self {
        Path {
            path: normalize(path.as_ref()),
            kind,
            attributes: PathAttributes::default(),
        }
    }

    pub fn file(path: impl AsRef<str>) -> Self {
        Self::new(path, EntryType::File)
    }

    pub fn directory(path: impl AsRef<str>) -> Self {
        Self::new(path, EntryType::Directory)
    }

    pub fn root() -> Self {
        Self::new("", EntryType::Directory)
    }

    pub fn kind(&self) -> EntryType {
        self.kind
    }

    pub fn is_directory(&self) -> bool {
        matches!(self.kind, EntryType::Directory | EntryType::Volume)
    }

    pub fn is_file(&self) -> bool {
        self.kind == EntryType::File
    }

    pub fn is_root(&self) -> bool {
        self.path.as_str().is_empty()
    }

    /// Relative form without leading slash (`""` for the root).
    pub fn as_str(&self) -> &str {
        self.path.as_str()
    }

    /// Absolute form with a leading slash.
    pub fn absolute(&self) -> String {
        format!("/{}", self.path)
    }

    /// Last segment, or `""` for the root.
    pub fn name(&self) -> &str {
        self.path.file_name().unwrap_or("")
    }

    pub fn segments(&self) -> impl Iterator<Item = &str> {
        self.path.components().map(|c| c.as_str())
    }

    pub fn depth(&self) -> usize {
        self.segments().count()
    }

    /// Parent directory; the container's parent is the root.
    pub fn parent(&self) -> Option<Path> {
        let parent = self.path.parent()?;
        let kind = if parent.components().count() == 1 {
            EntryType::Volume
        } else {
            EntryType::Directory
        };
        Some(Path {
            path: parent.to_relative_path_buf(),
            kind,
            attributes: PathAttributes::default(),
        })
    }

    pub fn child(&self, name: &str, kind: EntryType) -> Path {
        Path {
            path: self.path.join(name),
            kind,
            attributes: PathAttributes::default(),
        }
    }

    /// Whether `ancestor` is this path or one of its ancestors.
    pub fn starts_with(&self, ancestor: &Path) -> bool {
        self.path.starts_with(&ancestor.path)
    }

    /// Segments below `ancestor`, if `ancestor` is ancestor-or-self.
    pub fn strip_prefix(&self, ancestor: &Path) -> Option<Vec<&str>> {
        self.path
            .strip_prefix(&ancestor.path)
            .ok()
            .map(|rest| rest.components().map(|c| c.as_str()).collect())
    }

    /// Same path re-rooted from `from` to `to`, keeping its type.
    pub fn rebase(&self, from: &Path, to: &Path) -> Option<Path> {
        let rest = self.path.strip_prefix(&from.path).ok()?;
        Some(Path {
            path: to.path.join(rest),
            kind: self.kind,
            attributes: self.attributes.clone(),
        })
    }

    /// First segment as a volume, `None` for the root.
    pub fn container(&self) -> Option<Path> {
        self.segments()
            .next()
            .map(|first| Path::new(first, EntryType::Volume))
    }

    /// Path below the container, `None` for the root and the container itself.
    pub fn key(&self) -> Option<String> {
        let mut segments = self.segments();
        segments.next()?;
        let rest: Vec<&str> = segments.collect();
        (!rest.is_empty()).then(|| rest.join("/"))
    }

    pub fn attributes(&self) -> &PathAttributes {
        &self.attributes
    }

    #[must_use]
    pub fn with_attributes(mut self, attributes: PathAttributes) -> Self {
        self.attributes = attributes;
        self
    }

    #[must_use]
    pub fn with_kind(mut self, kind: EntryType) -> Self {
        self.kind = kind;
        self
    }
}

impl PartialEq for Path {
    fn eq(&self, other: &Self) -> bool {
        self.path == other.path && self.is_directory() == other.is_directory()
    }
}

impl Eq for Path {}

impl Hash for Path {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.path.hash(state);
        self.is_directory().hash(state);
    }
}

impl PartialOrd for Path {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Path {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.path
            .as_str()
            .cmp(other.path.as_str())
            .then(self.is_directory().cmp(&other.is_directory()))
    }
}

impl fmt::Display for Path {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalization() {
        assert_eq!(Path::file("/a//b/c/").as_str(), "a/b/c");
        assert_eq!(Path::file("a/b").absolute(), "/a/b");
        assert!(Path::directory("/").is_root());
        assert_eq!(Path::root().to_string(), "/");
    }

    #[test]
    fn test_equality_ignores_attributes_but_not_type() {
        let a = Path::file("/c/x");
        let b = Path::file("/c/x").with_attributes(PathAttributes::default().with_size(4));
        assert_eq!(a, b);
        assert_ne!(Path::file("/c/x"), Path::directory("/c/x"));
        assert_eq!(Path::directory("/c"), Path::new("/c", EntryType::Volume));
    }

    #[test]
    fn test_structure() {
        let p = Path::file("/container/dir/file.txt");
        assert_eq!(p.name(), "file.txt");
        assert_eq!(p.depth(), 3);
        assert_eq!(p.container().unwrap().kind(), EntryType::Volume);
        assert_eq!(p.container().unwrap().as_str(), "container");
        assert_eq!(p.key().as_deref(), Some("dir/file.txt"));
        assert_eq!(Path::directory("/container").key(), None);

        let parent = p.parent().unwrap();
        assert_eq!(parent, Path::directory("/container/dir"));
        assert_eq!(parent.parent().unwrap().kind(), EntryType::Volume);
        assert!(Path::root().parent().is_none());
    }

    #[test]
    fn test_prefix_operations() {
        let home = Path::directory("/v");
        let p = Path::file("/v/a/f");
        assert!(p.starts_with(&home));
        assert!(home.starts_with(&home));
        assert!(!Path::file("/vv/a").starts_with(&home));
        assert_eq!(p.strip_prefix(&home).unwrap(), vec!["a", "f"]);

        let moved = p
            .rebase(&Path::directory("/v/a"), &Path::directory("/v/b"))
            .unwrap();
        assert_eq!(moved, Path::file("/v/b/f"));
    }
}
