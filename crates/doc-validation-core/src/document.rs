//! Markdown document helpers
//!
//! Splits YAML frontmatter from the body and maps byte offsets back to line
//! numbers for issue locations.

use serde_yaml::Mapping;

const DELIMITER: &str = "---";

/// A document split into frontmatter and body
#[derive(Debug, Clone, PartialEq)]
pub struct SplitDocument<'a> {
    /// Raw frontmatter text between the delimiters, if present
    pub frontmatter: Option<&'a str>,
    /// Body text after the closing delimiter
    pub body: &'a str,
    /// Byte offset of the body inside the original content
    pub body_offset: usize,
    /// Whether an opening delimiter was found without a closing one
    pub unterminated: bool,
}

impl<'a> SplitDocument<'a> {
    /// Split `content` at its frontmatter delimiters
    pub fn parse(content: &'a str) -> Self {
        let no_frontmatter = SplitDocument {
            frontmatter: None,
            body: content,
            body_offset: 0,
            unterminated: false,
        };

        let first_line_end = content.find('\n').unwrap_or(content.len());
        if content[..first_line_end].trim_end() != DELIMITER {
            return no_frontmatter;
        }

        let fm_start = (first_line_end + 1).min(content.len());
        let mut offset = fm_start;
        for line in content[fm_start..].split_inclusive('\n') {
            if line.trim_end() == DELIMITER {
                let body_offset = offset + line.len();
                return SplitDocument {
                    frontmatter: Some(&content[fm_start..offset]),
                    body: &content[body_offset..],
                    body_offset,
                    unterminated: false,
                };
            }
            offset += line.len();
        }

        SplitDocument {
            unterminated: true,
            ..no_frontmatter
        }
    }

    /// Parse the frontmatter as a YAML mapping
    ///
    /// Returns `Ok(None)` when the document has no frontmatter. An empty
    /// frontmatter block parses to an empty mapping.
    pub fn mapping(&self) -> Result<Option<Mapping>, serde_yaml::Error> {
        match self.frontmatter {
            None => Ok(None),
            Some(raw) if raw.trim().is_empty() => Ok(Some(Mapping::new())),
            Some(raw) => serde_yaml::from_str::<Mapping>(raw).map(Some),
        }
    }
}

/// 1-based line number of a byte offset
pub fn line_of(content: &str, offset: usize) -> usize {
    let offset = offset.min(content.len());
    content.as_bytes()[..offset].iter().filter(|b| **b == b'\n').count() + 1
}

/// The full line containing `offset`, trimmed and capped to `max_chars`
pub fn snippet_at(content: &str, offset: usize, max_chars: usize) -> String {
    let offset = offset.min(content.len());
    let start = content[..offset].rfind('\n').map(|i| i + 1).unwrap_or(0);
    let end = content[offset..]
        .find('\n')
        .map(|i| offset + i)
        .unwrap_or(content.len());
    content[start..end].trim().chars().take(max_chars).collect()
}

/// Read a frontmatter value as a list of strings
///
/// Accepts either a YAML sequence of scalars or a comma separated string.
pub fn string_list(mapping: &Mapping, key: &str) -> Vec<String> {
    match mapping.get(key) {
        Some(serde_yaml::Value::Sequence(items)) => items
            .iter()
            .filter_map(|v| match v {
                serde_yaml::Value::String(s) => Some(s.trim().to_string()),
                serde_yaml::Value::Number(n) => Some(n.to_string()),
                _ => None,
            })
            .filter(|s| !s.is_empty())
            .collect(),
        Some(serde_yaml::Value::String(s)) => s
            .split(',')
            .map(|p| p.trim().to_string())
            .filter(|p| !p.is_empty())
            .collect(),
        _ => Vec::new(),
    }
}
