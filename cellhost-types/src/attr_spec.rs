//! Attribute spec expressions
//!
//! An attr spec names an attribute's element type and, optionally, a series
//! qualifier and a name:
//!
//! ```text
//! [Series]ElemType:Name
//! ```
//!
//! Whitespace around tokens is ignored. Two specs that differ only in
//! whitespace share a canonical form and therefore resolve to the same
//! attribute.

use crate::TypeError;
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct AttrSpec {
    pub series: Option<String>,
    pub elem_type: String,
    pub name: Option<String>,
}

impl AttrSpec {
    pub fn parse(spec: &str) -> Result<Self, TypeError> {
        let invalid = |reason| TypeError::InvalidAttrSpec {
            spec: spec.to_string(),
            reason,
        };

        let mut rest = spec.trim();
        let mut series = None;
        if let Some(after_open) = rest.strip_prefix('[') {
            let close = after_open
                .find(']')
                .ok_or_else(|| invalid("unterminated series qualifier"))?;
            let token = after_open[..close].trim();
            if token.is_empty() {
                return Err(invalid("empty series qualifier"));
            }
            series = Some(token.to_string());
            rest = after_open[close + 1..].trim_start();
        }

        let (elem_type, name) = match rest.split_once(':') {
            Some((elem, name)) => (elem.trim(), Some(name.trim())),
            None => (rest.trim(), None),
        };

        if elem_type.is_empty() {
            return Err(invalid("missing element type"));
        }
        if !is_token(elem_type) {
            return Err(invalid("element type has illegal characters"));
        }
        if let Some(s) = &series {
            if !is_token(s) {
                return Err(invalid("series qualifier has illegal characters"));
            }
        }
        let name = match name {
            Some("") => return Err(invalid("empty attribute name")),
            Some(n) if !is_token(n) => return Err(invalid("attribute name has illegal characters")),
            Some(n) => Some(n.to_string()),
            None => None,
        };

        Ok(Self {
            series,
            elem_type: elem_type.to_string(),
            name,
        })
    }

    /// The whitespace-free form used as the interning key
    pub fn canonical(&self) -> String {
        let mut out = String::new();
        if let Some(series) = &self.series {
            out.push('[');
            out.push_str(series);
            out.push(']');
        }
        out.push_str(&self.elem_type);
        if let Some(name) = &self.name {
            out.push(':');
            out.push_str(name);
        }
        out
    }
}

fn is_token(s: &str) -> bool {
    s.chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-'))
}

impl FromStr for AttrSpec {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl fmt::Display for AttrSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.canonical())
    }
}
