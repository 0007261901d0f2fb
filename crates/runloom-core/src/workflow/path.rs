//! Field path parsing and resolution over JSON values.
//!
//! Paths are dot-separated segments with optional `[index]` suffixes, e.g.
//! `a.b[0].c`. The root path (`""` or `"."`) selects the value itself.
//!
//! Resolution never fails on missing data: traversing through `null`, an
//! absent key, an out-of-range index or a non-numeric index against an array
//! yields `None`. The property names `__proto__`, `constructor` and
//! `prototype` are always treated as absent.

use std::fmt;

use serde_json::Value;

/// Property names that are never traversed or merged.
pub const FORBIDDEN_KEYS: [&str; 3] = ["__proto__", "constructor", "prototype"];

/// Whether `key` is one of [`FORBIDDEN_KEYS`].
pub fn is_forbidden_key(key: &str) -> bool {
    FORBIDDEN_KEYS.contains(&key)
}

/// One step of a parsed path.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PathSegment {
    /// `name` -- object key (or numeric index against an array).
    Key(String),
    /// `[n]` -- bracketed index; non-numeric contents are kept and resolve to nothing
    /// against arrays.
    Index(String),
}

impl PathSegment {
    fn text(&self) -> &str {
        match self {
            PathSegment::Key(k) | PathSegment::Index(k) => k,
        }
    }
}

/// Malformed path syntax.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("malformed path '{path}': {reason}")]
pub struct PathSyntaxError {
    pub path: String,
    pub reason: String,
}

/// A parsed, reusable field path.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FieldPath {
    raw: String,
    segments: Vec<PathSegment>,
}

impl FieldPath {
    /// Parse a path. Empty segments, unclosed or empty brackets and stray
    /// characters after `]` are syntax errors.
    pub fn parse(raw: &str) -> Result<Self, PathSyntaxError> {
        let err = |reason: &str| PathSyntaxError {
            path: raw.to_string(),
            reason: reason.to_string(),
        };

        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "." {
            return Ok(Self {
                raw: raw.to_string(),
                segments: Vec::new(),
            });
        }

        let mut segments = Vec::new();
        for part in trimmed.split('.') {
            if part.is_empty() {
                return Err(err("empty segment"));
            }

            let (name, mut rest) = match part.find('[') {
                Some(pos) => (&part[..pos], &part[pos..]),
                None => (part, ""),
            };
            if name.contains(']') {
                return Err(err("unexpected ']'"));
            }
            if !name.is_empty() {
                segments.push(PathSegment::Key(name.to_string()));
            } else if rest.is_empty() {
                return Err(err("empty segment"));
            }

            while !rest.is_empty() {
                let Some(body) = rest.strip_prefix('[') else {
                    return Err(err("expected '[' after ']'"));
                };
                let Some(close) = body.find(']') else {
                    return Err(err("unclosed '['"));
                };
                let index = body[..close].trim();
                if index.is_empty() {
                    return Err(err("empty index"));
                }
                if index.contains('[') {
                    return Err(err("nested '['"));
                }
                segments.push(PathSegment::Index(index.to_string()));
                rest = &body[close + 1..];
            }
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    /// The root path.
    pub fn root() -> Self {
        Self::default()
    }

    pub fn is_root(&self) -> bool {
        self.segments.is_empty()
    }

    pub fn segments(&self) -> &[PathSegment] {
        &self.segments
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Split off the first segment, returning it and the remaining path.
    pub fn split_first(&self) -> Option<(&PathSegment, FieldPath)> {
        let (first, rest) = self.segments.split_first()?;
        Some((
            first,
            FieldPath {
                raw: render(rest),
                segments: rest.to_vec(),
            },
        ))
    }

    /// Resolve this path against `value`.
    pub fn resolve<'a>(&self, value: &'a Value) -> Option<&'a Value> {
        resolve_segments(value, &self.segments)
    }
}

impl fmt::Display for FieldPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

/// Resolve `segments` against `value`.
pub fn resolve_segments<'a>(value: &'a Value, segments: &[PathSegment]) -> Option<&'a Value> {
    let mut current = value;
    for segment in segments {
        current = step_into(current, segment.text())?;
    }
    Some(current)
}

fn step_into<'a>(value: &'a Value, key: &str) -> Option<&'a Value> {
    if is_forbidden_key(key) {
        return None;
    }
    match value {
        Value::Object(map) => map.get(key),
        Value::Array(items) => {
            let index: usize = key.parse().ok()?;
            items.get(index)
        }
        _ => None,
    }
}

fn render(segments: &[PathSegment]) -> String {
    let mut out = String::new();
    for segment in segments {
        match segment {
            PathSegment::Key(k) => {
                if !out.is_empty() {
                    out.push('.');
                }
                out.push_str(k);
            }
            PathSegment::Index(i) => {
                out.push('[');
                out.push_str(i);
                out.push(']');
            }
        }
    }
    out
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
