//! Property path parser - dotted and bracketed access
//!
//! Supports:
//! - a.b.c (dot notation)
//! - a[0].b (array index)
//! - a[foo.bar].c (bracketed literal key, may contain dots)
//!
//! Does NOT support wildcards, slices, or filters.

use crate::error::MasonryError;

/// A parsed path segment
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    /// Object field or map key access: .field or [literal.key]
    Field(String),
    /// Array index access: [0]
    Index(usize),
}

impl Segment {
    pub fn as_field(&self) -> Option<&str> {
        match self {
            Segment::Field(f) => Some(f.as_str()),
            Segment::Index(_) => None,
        }
    }
}

/// Parse a property path into segments
///
/// Examples:
/// - "a.b.c" → [Field("a"), Field("b"), Field("c")]
/// - "items[0].name" → [Field("items"), Index(0), Field("name")]
/// - "tags[kubernetes.io/name]" → [Field("tags"), Field("kubernetes.io/name")]
pub fn parse(path: &str) -> Result<Vec<Segment>, MasonryError> {
    if path.is_empty() {
        return Ok(vec![]);
    }

    let mut segments = Vec::new();
    let mut field = String::new();
    let mut chars = path.chars().peekable();

    while let Some(ch) = chars.next() {
        match ch {
            '.' => {
                if !field.is_empty() {
                    segments.push(Segment::Field(std::mem::take(&mut field)));
                }
            }
            '[' => {
                if !field.is_empty() {
                    segments.push(Segment::Field(std::mem::take(&mut field)));
                }
                let mut key = String::new();
                let mut closed = false;
                for inner in chars.by_ref() {
                    if inner == ']' {
                        closed = true;
                        break;
                    }
                    key.push(inner);
                }
                if !closed || key.is_empty() {
                    return Err(MasonryError::InvalidPath {
                        path: path.to_string(),
                        reason: "unterminated or empty bracket".to_string(),
                    });
                }
                if let Ok(index) = key.parse::<usize>() {
                    segments.push(Segment::Index(index));
                } else {
                    segments.push(Segment::Field(key));
                }
                // A dot directly after ']' is a separator, not part of a field
                if chars.peek() == Some(&'.') {
                    chars.next();
                }
            }
            _ => field.push(ch),
        }
    }

    if !field.is_empty() {
        segments.push(Segment::Field(field));
    }

    if segments.is_empty() {
        return Err(MasonryError::InvalidPath {
            path: path.to_string(),
            reason: "no segments".to_string(),
        });
    }

    Ok(segments)
}

/// Rejoin segments into a path string (inverse of `parse` for simple paths).
///
/// Used by the interpolation walker to retry an unresolved suffix as one
/// flat literal key.
pub fn join(segments: &[Segment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            Segment::Field(f) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(f);
            }
            Segment::Index(i) => {
                out.push('[');
                out.push_str(&i.to_string());
                out.push(']');
            }
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_simple_path() {
        let segments = parse("a.b.c").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Field("a".to_string()),
                Segment::Field("b".to_string()),
                Segment::Field("c".to_string()),
            ]
        );
    }

    #[test]
    fn parse_with_array_index() {
        let segments = parse("items[0].name").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Field("items".to_string()),
                Segment::Index(0),
                Segment::Field("name".to_string()),
            ]
        );
    }

    #[test]
    fn parse_bracketed_key_with_dots() {
        let segments = parse("tags[kubernetes.io/name]").unwrap();
        assert_eq!(
            segments,
            vec![
                Segment::Field("tags".to_string()),
                Segment::Field("kubernetes.io/name".to_string()),
            ]
        );
    }

    #[test]
    fn parse_empty_bracket_fails() {
        assert!(parse("a[]").is_err());
    }

    #[test]
    fn parse_unterminated_bracket_fails() {
        assert!(parse("a[0").is_err());
    }

    #[test]
    fn parse_empty_is_empty() {
        assert!(parse("").unwrap().is_empty());
    }

    #[test]
    fn join_round_trips_simple_paths() {
        for path in ["a.b.c", "items[0].name", "a"] {
            let segments = parse(path).unwrap();
            assert_eq!(join(&segments), path);
        }
    }
}
