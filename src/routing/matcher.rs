//! Path template matching.
//!
//! # Responsibilities
//! - Parse path templates (`/v1/widgets/{id}`, `/v1/files/{path=**}`,
//!   `/v1/widgets/{id}:watch`)
//! - Match request path segments and capture variable values
//! - Rank templates by specificity and detect overlaps
//!
//! # Design Decisions
//! - Path matching is case-sensitive
//! - Captures are returned raw; percent-decoding happens in the transcoder,
//!   which can report a bad request
//! - No regex: segment-by-segment comparison, O(segments)

use thiserror::Error;

/// One segment of a compiled template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Segment {
    Literal(String),
    /// Unnamed `*`: any single non-empty segment.
    Wildcard,
    /// `{field}`: one non-empty segment, captured into variable `n`.
    Variable(usize),
    /// `{field=**}`: the remainder of the path, captured into variable `n`.
    CatchAll(usize),
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TemplateError {
    #[error("template must start with '/'")]
    MissingLeadingSlash,

    #[error("empty segment")]
    EmptySegment,

    #[error("malformed variable '{0}'")]
    MalformedVariable(String),

    #[error("unsupported variable pattern '{0}'")]
    UnsupportedPattern(String),

    #[error("variable '{0}' appears more than once")]
    DuplicateVariable(String),

    #[error("'**' is only allowed in the last segment")]
    CatchAllNotLast,

    #[error("empty verb")]
    EmptyVerb,
}

/// Ordering key: a larger value is the more specific template.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct Specificity {
    /// Literal segments before the first non-literal.
    pub literal_prefix: usize,
    /// Segments that consume exactly one path segment.
    pub fixed_segments: usize,
    /// Templates without a trailing `**` outrank those with one.
    pub bounded: bool,
    /// A `:verb` suffix outranks a bare variable in the same position.
    pub has_verb: bool,
    pub literals: usize,
}

/// A compiled path template.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathTemplate {
    raw: String,
    segments: Vec<Segment>,
    /// Field path of each variable, indexed by capture position.
    variables: Vec<Vec<String>>,
    /// Custom method suffix, e.g. `watch` in `/v1/widgets/{id}:watch`.
    verb: Option<String>,
}

impl PathTemplate {
    pub fn parse(raw: &str) -> Result<Self, TemplateError> {
        let rest = raw.strip_prefix('/').ok_or(TemplateError::MissingLeadingSlash)?;
        let (rest, verb) = split_verb(rest);
        if verb.is_some_and(str::is_empty) {
            return Err(TemplateError::EmptyVerb);
        }

        let mut segments = Vec::new();
        let mut variables: Vec<Vec<String>> = Vec::new();
        let parts: Vec<&str> = if rest.is_empty() {
            Vec::new()
        } else {
            rest.split('/').collect()
        };

        for (i, part) in parts.iter().enumerate() {
            let is_last = i + 1 == parts.len();
            let segment = match *part {
                "" => return Err(TemplateError::EmptySegment),
                "*" => Segment::Wildcard,
                "**" => return Err(TemplateError::UnsupportedPattern("**".into())),
                part if part.starts_with('{') => {
                    let inner = part
                        .strip_prefix('{')
                        .and_then(|p| p.strip_suffix('}'))
                        .ok_or_else(|| TemplateError::MalformedVariable(part.to_string()))?;
                    let (name, pattern) = match inner.split_once('=') {
                        Some((name, pattern)) => (name, Some(pattern)),
                        None => (inner, None),
                    };

                    let path = parse_field_path(name)
                        .ok_or_else(|| TemplateError::MalformedVariable(part.to_string()))?;
                    if variables.contains(&path) {
                        return Err(TemplateError::DuplicateVariable(name.to_string()));
                    }
                    let index = variables.len();
                    variables.push(path);

                    match pattern {
                        None | Some("*") => Segment::Variable(index),
                        Some("**") if is_last => Segment::CatchAll(index),
                        Some("**") => return Err(TemplateError::CatchAllNotLast),
                        Some(other) => return Err(TemplateError::UnsupportedPattern(other.to_string())),
                    }
                }
                part if part.contains(['{', '}']) => {
                    return Err(TemplateError::MalformedVariable(part.to_string()))
                }
                part => Segment::Literal(part.to_string()),
            };
            segments.push(segment);
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
            variables,
            verb: verb.map(str::to_string),
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn segments(&self) -> &[Segment] {
        &self.segments
    }

    /// Field paths bound by this template, in capture order.
    pub fn variables(&self) -> &[Vec<String>] {
        &self.variables
    }

    pub fn verb(&self) -> Option<&str> {
        self.verb.as_deref()
    }

    /// Match split path segments; returns raw captures in variable order.
    pub fn matches(&self, path: &[&str]) -> Option<Vec<String>> {
        match &self.verb {
            Some(verb) => {
                let (last, init) = path.split_last()?;
                let stripped = last.strip_suffix(verb.as_str())?.strip_suffix(':')?;
                let mut path = init.to_vec();
                path.push(stripped);
                self.match_segments(&path)
            }
            None => self.match_segments(path),
        }
    }

    fn match_segments(&self, path: &[&str]) -> Option<Vec<String>> {
        let mut captures = vec![String::new(); self.variables.len()];

        for (i, segment) in self.segments.iter().enumerate() {
            match segment {
                Segment::Literal(literal) => {
                    if path.get(i) != Some(&literal.as_str()) {
                        return None;
                    }
                }
                Segment::Wildcard => match path.get(i) {
                    Some(s) if !s.is_empty() => {}
                    _ => return None,
                },
                Segment::Variable(index) => match path.get(i) {
                    Some(s) if !s.is_empty() => captures[*index] = (*s).to_string(),
                    _ => return None,
                },
                Segment::CatchAll(index) => {
                    captures[*index] = path.get(i..).unwrap_or_default().join("/");
                    return Some(captures);
                }
            }
        }

        (path.len() == self.segments.len()).then_some(captures)
    }

    pub fn specificity(&self) -> Specificity {
        let literal_prefix = self
            .segments
            .iter()
            .take_while(|s| matches!(s, Segment::Literal(_)))
            .count();
        let literals = self
            .segments
            .iter()
            .filter(|s| matches!(s, Segment::Literal(_)))
            .count();

        Specificity {
            literal_prefix,
            fixed_segments: self.fixed_segments().len(),
            bounded: !self.has_catch_all(),
            has_verb: self.verb.is_some(),
            literals,
        }
    }

    /// True if some concrete path matches both templates.
    pub fn overlaps(&self, other: &Self) -> bool {
        if let (Some(x), Some(y)) = (&self.verb, &other.verb) {
            if x != y {
                return false;
            }
        }

        let (a, b) = (self.fixed_segments(), other.fixed_segments());
        let lengths_compatible = match (self.has_catch_all(), other.has_catch_all()) {
            (false, false) => a.len() == b.len(),
            (true, false) => b.len() >= a.len(),
            (false, true) => a.len() >= b.len(),
            (true, true) => true,
        };

        lengths_compatible
            && a.iter().zip(b.iter()).all(|pair| match pair {
                (Segment::Literal(x), Segment::Literal(y)) => x == y,
                _ => true,
            })
    }

    fn fixed_segments(&self) -> &[Segment] {
        match self.segments.last() {
            Some(Segment::CatchAll(_)) => &self.segments[..self.segments.len() - 1],
            _ => &self.segments,
        }
    }

    fn has_catch_all(&self) -> bool {
        matches!(self.segments.last(), Some(Segment::CatchAll(_)))
    }
}

/// Separate a trailing `:verb` from the last segment, outside any `{...}`.
fn split_verb(rest: &str) -> (&str, Option<&str>) {
    let last_start = rest.rfind('/').map_or(0, |i| i + 1);
    let last = &rest[last_start..];
    let search_from = last.rfind('}').map_or(0, |i| i + 1);
    match last[search_from..].rfind(':') {
        Some(i) => {
            let colon = last_start + search_from + i;
            (&rest[..colon], Some(&rest[colon + 1..]))
        }
        None => (rest, None),
    }
}

/// Split a request path into segments. `None` if it is not absolute.
pub fn split_path(path: &str) -> Option<Vec<&str>> {
    let rest = path.strip_prefix('/')?;
    if rest.is_empty() {
        return Some(Vec::new());
    }
    Some(rest.split('/').collect())
}

fn parse_field_path(name: &str) -> Option<Vec<String>> {
    let parts: Vec<String> = name.split('.').map(str::to_string).collect();
    let valid = parts.iter().all(|p| {
        !p.is_empty() && p.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
    });
    valid.then_some(parts)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn t(raw: &str) -> PathTemplate {
        PathTemplate::parse(raw).unwrap()
    }

    fn segs(path: &str) -> Vec<&str> {
        split_path(path).unwrap()
    }

    #[test]
    fn variable_capture() {
        let template = t("/v1/widgets/{id}");
        assert_eq!(template.matches(&segs("/v1/widgets/42")), Some(vec!["42".to_string()]));
        assert_eq!(template.matches(&segs("/v1/widgets")), None);
        assert_eq!(template.matches(&segs("/v1/widgets/")), None);
        assert_eq!(template.matches(&segs("/v1/widgets/42/sub")), None);
        assert_eq!(template.variables(), &[vec!["id".to_string()]]);
    }

    #[test]
    fn path_matching_is_case_sensitive() {
        assert!(t("/v1/widgets/{id}").matches(&segs("/V1/widgets/42")).is_none());
    }

    #[test]
    fn nested_field_and_catch_all() {
        let template = t("/v1/{shelf.id}/files/{path=**}");
        assert_eq!(
            template.matches(&segs("/v1/s1/files/a/b/c.txt")),
            Some(vec!["s1".to_string(), "a/b/c.txt".to_string()])
        );
        assert_eq!(
            template.matches(&segs("/v1/s1/files")),
            Some(vec!["s1".to_string(), String::new()])
        );
        assert_eq!(template.variables()[0], vec!["shelf".to_string(), "id".to_string()]);
    }

    #[test]
    fn root_template() {
        assert_eq!(t("/").matches(&segs("/")), Some(vec![]));
        assert!(t("/").matches(&segs("/x")).is_none());
    }

    #[test]
    fn parse_errors() {
        assert_eq!(PathTemplate::parse("v1/x"), Err(TemplateError::MissingLeadingSlash));
        assert_eq!(PathTemplate::parse("/v1//x"), Err(TemplateError::EmptySegment));
        assert!(matches!(PathTemplate::parse("/v1/{id"), Err(TemplateError::MalformedVariable(_))));
        assert!(matches!(PathTemplate::parse("/v1/{a-b}"), Err(TemplateError::MalformedVariable(_))));
        assert!(matches!(PathTemplate::parse("/v1/{id}/{id}"), Err(TemplateError::DuplicateVariable(_))));
        assert_eq!(PathTemplate::parse("/v1/{p=**}/x"), Err(TemplateError::CatchAllNotLast));
        assert!(matches!(
            PathTemplate::parse("/v1/{name=shelves/*}"),
            Err(TemplateError::MalformedVariable(_))
        ));
    }

    #[test]
    fn specificity_orders_literal_prefix_then_length() {
        let item = t("/v1/items/{id}").specificity();
        let special = t("/v1/items/special").specificity();
        let sub = t("/v1/items/{id}/sub").specificity();
        let any = t("/v1/items/{rest=**}").specificity();

        assert!(special > item);
        assert!(sub > item);
        assert!(item > any);
    }

    #[test]
    fn custom_verb() {
        let watch = t("/v1/widgets/{id}:watch");
        assert_eq!(watch.verb(), Some("watch"));
        assert_eq!(watch.matches(&segs("/v1/widgets/7:watch")), Some(vec!["7".to_string()]));
        assert!(watch.matches(&segs("/v1/widgets/7")).is_none());
        assert!(watch.matches(&segs("/v1/widgets/7:cancel")).is_none());

        let get = t("/v1/widgets/{id}");
        assert!(watch.specificity() > get.specificity());
        assert!(!watch.overlaps(&t("/v1/widgets/{id}:cancel")));
        assert_eq!(PathTemplate::parse("/v1/widgets:"), Err(TemplateError::EmptyVerb));
    }

    #[test]
    fn overlap_detection() {
        assert!(t("/v1/items/{id}").overlaps(&t("/v1/items/{name}")));
        assert!(t("/v1/items/{id}").overlaps(&t("/v1/items/special")));
        assert!(!t("/v1/items/{id}").overlaps(&t("/v1/items/{id}/sub")));
        assert!(!t("/v1/items/{id}").overlaps(&t("/v1/things/{id}")));
        assert!(t("/v1/{rest=**}").overlaps(&t("/v1/items/{id}/sub")));
        assert!(!t("/v2/{rest=**}").overlaps(&t("/v1/items")));
    }
}
