//! Path resolution for references into the remote tree.
//!
//! A [`TreePath`] is an ordered sequence of non-empty segments. Callers
//! address children with "korks": either a sequence of segments or an
//! already-joined path string such as `"users/alice/score"`.

use std::fmt;
use std::iter::FusedIterator;
use std::str::FromStr;

use crate::error::{Result, TreeError};

/// Maximum segment length in bytes.
pub const MAX_SEGMENT_LENGTH: usize = 768;

/// Maximum number of segments in a path.
pub const MAX_DEPTH: usize = 32;

/// Characters that may not appear inside a segment.
const FORBIDDEN_CHARS: &[char] = &['.', '#', '$', '[', ']', '/'];

/// Validate that a single path segment is well-formed.
pub fn validate_segment(segment: &str) -> Result<()> {
    if segment.is_empty() {
        return Err(TreeError::invalid_path(segment, "segment cannot be empty"));
    }
    if segment.len() > MAX_SEGMENT_LENGTH {
        return Err(TreeError::invalid_path(
            segment,
            format!("segment exceeds maximum length of {} bytes", MAX_SEGMENT_LENGTH),
        ));
    }
    if let Some(c) = segment
        .chars()
        .find(|c| FORBIDDEN_CHARS.contains(c) || c.is_ascii_control())
    {
        return Err(TreeError::invalid_path(
            segment,
            format!("forbidden character {:?}", c),
        ));
    }
    Ok(())
}

/// Anything that can address a descendant: segment sequences or a joined path.
pub trait IntoKorks {
    /// Split into raw, not yet validated, segments.
    fn into_korks(self) -> Vec<String>;
}

impl IntoKorks for &str {
    /// A single leading `/` is ignored, so `"/a/b"` and `"a/b"` agree.
    fn into_korks(self) -> Vec<String> {
        let joined = self.strip_prefix('/').unwrap_or(self);
        if joined.is_empty() {
            return Vec::new();
        }
        joined.split('/').map(str::to_string).collect()
    }
}

impl IntoKorks for String {
    fn into_korks(self) -> Vec<String> {
        self.as_str().into_korks()
    }
}

impl IntoKorks for &String {
    fn into_korks(self) -> Vec<String> {
        self.as_str().into_korks()
    }
}

impl<S: AsRef<str>> IntoKorks for Vec<S> {
    fn into_korks(self) -> Vec<String> {
        self.iter().map(|s| s.as_ref().to_string()).collect()
    }
}

impl<S: AsRef<str>> IntoKorks for &[S] {
    fn into_korks(self) -> Vec<String> {
        self.iter().map(|s| s.as_ref().to_string()).collect()
    }
}

impl<S: AsRef<str>, const N: usize> IntoKorks for [S; N] {
    fn into_korks(self) -> Vec<String> {
        self.iter().map(|s| s.as_ref().to_string()).collect()
    }
}

impl IntoKorks for &TreePath {
    fn into_korks(self) -> Vec<String> {
        self.segments.clone()
    }
}

/// Canonical location of a node in the tree.
#[derive(Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TreePath {
    segments: Vec<String>,
}

impl TreePath {
    /// The root of the tree.
    pub fn root() -> Self {
        Self::default()
    }

    /// Check if this is the root path.
    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    /// Segments from the root downwards.
    pub fn segments(&self) -> &[String] {
        &self.segments
    }

    /// Number of segments.
    pub fn depth(&self) -> usize {
        self.segments.len()
    }

    /// The last segment, or `None` at the root.
    pub fn key(&self) -> Option<&str> {
        self.segments.last().map(String::as_str)
    }

    /// Path of a direct child.
    pub fn child(&self, segment: &str) -> Result<Self> {
        self.resolve([segment])
    }

    /// Descend one segment at a time.
    ///
    /// Empty korks return a copy of this path unchanged.
    pub fn resolve(&self, korks: impl IntoKorks) -> Result<Self> {
        let korks = korks.into_korks();
        if korks.is_empty() {
            return Ok(self.clone());
        }

        let mut segments = self.segments.clone();
        for segment in korks {
            validate_segment(&segment)?;
            segments.push(segment);
        }
        if segments.len() > MAX_DEPTH {
            return Err(TreeError::invalid_path(
                segments.join("/"),
                format!("path exceeds maximum depth of {}", MAX_DEPTH),
            ));
        }
        Ok(Self { segments })
    }

    /// The immediate ancestor, or `None` at the root.
    pub fn parent(&self) -> Option<Self> {
        if self.is_root() {
            return None;
        }
        let mut segments = self.segments.clone();
        segments.pop();
        Some(Self { segments })
    }

    /// Walk parent links upward, nearest first, ending at the root.
    pub fn ancestors(&self) -> Ancestors {
        Ancestors {
            next: self.parent(),
        }
    }

    /// True if `self` equals `other` or lies below it.
    pub fn starts_with(&self, other: &TreePath) -> bool {
        self.segments.starts_with(&other.segments)
    }
}

impl fmt::Display for TreePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str("/");
        }
        for segment in &self.segments {
            write!(f, "/{}", segment)?;
        }
        Ok(())
    }
}

impl FromStr for TreePath {
    type Err = TreeError;

    /// Parse an absolute path as rendered by `Display` (`/a/b`, or `/`).
    fn from_str(s: &str) -> Result<Self> {
        TreePath::root().resolve(s)
    }
}

/// Lazy walk up the parent chain. Every call to `ancestors()` starts over.
#[derive(Debug, Clone)]
pub struct Ancestors {
    next: Option<TreePath>,
}

impl Iterator for Ancestors {
    type Item = TreePath;

    fn next(&mut self) -> Option<TreePath> {
        let current = self.next.take()?;
        self.next = current.parent();
        Some(current)
    }
}

impl FusedIterator for Ancestors {}
