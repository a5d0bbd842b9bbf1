//! Parsed, slash-delimited references into the state database.
//!
//! References arrive from clients as strings like `"test/increase/first"`. They are parsed into a
//! [`Path`] once, at the edge of the data model, and every tree operation works on the parsed segments.

use borsh::{BorshDeserialize, BorshSerialize};
use std::fmt::{self, Display, Formatter};

pub const DELIMITER: char = '/';

/// An ordered sequence of non-empty path segments. The empty sequence is the root of the tree.
#[derive(
    Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Default, BorshSerialize, BorshDeserialize,
)]
pub struct Path(Vec<String>);

impl Path {
    /// The path to the root of the state database.
    pub const fn root() -> Path {
        Path(Vec::new())
    }

    /// Parse a reference.
    ///
    /// A single leading delimiter is allowed (`"/a/b"` is the same as `"a/b"`), and `"/"` alone parses to
    /// the [root](Self::root). Empty references and references with empty segments (e.g., `"a//b"` or
    /// `"a/b/"`) are rejected.
    pub fn parse(reference: &str) -> Result<Path, PathError> {
        if reference == "/" {
            return Ok(Path::root());
        }
        let trimmed = reference.strip_prefix(DELIMITER).unwrap_or(reference);
        if trimmed.is_empty() {
            return Err(PathError::Empty);
        }
        let segments: Vec<String> = trimmed.split(DELIMITER).map(String::from).collect();
        if segments.iter().any(|segment| segment.is_empty()) {
            return Err(PathError::EmptySegment {
                reference: reference.to_string(),
            });
        }
        Ok(Path(segments))
    }

    /// Create a path from already-split segments.
    pub fn from_segments<S: Into<String>>(
        segments: impl IntoIterator<Item = S>,
    ) -> Result<Path, PathError> {
        let segments: Vec<String> = segments.into_iter().map(Into::into).collect();
        if segments
            .iter()
            .any(|segment| segment.is_empty() || segment.contains(DELIMITER))
        {
            return Err(PathError::EmptySegment {
                reference: segments.join("/"),
            });
        }
        Ok(Path(segments))
    }

    pub fn segments(&self) -> &[String] {
        &self.0
    }

    pub fn is_root(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// Check whether `prefix` is this path or one of its ancestors.
    pub fn starts_with(&self, prefix: &Path) -> bool {
        self.0.starts_with(&prefix.0)
    }

    /// Check that every segment is non-empty and free of delimiters. Paths built by [`parse`](Self::parse)
    /// always are, but paths decoded from the network must be checked.
    pub fn is_well_formed(&self) -> bool {
        self.0
            .iter()
            .all(|segment| !segment.is_empty() && !segment.contains(DELIMITER))
    }
}

impl Display for Path {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        write!(f, "/{}", self.0.join("/"))
    }
}

/// Error when a reference cannot be parsed into a [`Path`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PathError {
    Empty,
    EmptySegment { reference: String },
}

impl Display for PathError {
    fn fmt(&self, f: &mut Formatter<'_>) -> fmt::Result {
        match self {
            PathError::Empty => write!(f, "empty reference"),
            PathError::EmptySegment { reference } => {
                write!(f, "reference {:?} contains an empty segment", reference)
            }
        }
    }
}

#[test]
fn parse_path_test() {
    assert_eq!(
        Path::parse("test/b/u").unwrap().segments(),
        &["test".to_string(), "b".to_string(), "u".to_string()]
    );
    assert_eq!(Path::parse("/test/b").unwrap(), Path::parse("test/b").unwrap());
    assert!(Path::parse("/").unwrap().is_root());
    assert_eq!(Path::parse(""), Err(PathError::Empty));
    assert!(Path::parse("a//b").is_err());
    assert!(Path::parse("a/b/").is_err());
    assert!(Path::parse("//").is_err());
}
