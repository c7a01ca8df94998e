//! Delimited metadata block parsing.
//!
//! Leaf and descriptor files may open with a YAML block fenced by `---`
//! lines. Scalar values are kept as strings; lists are joined with `, `.
//! A file without a leading fence has no metadata and its whole content is
//! the body.

use anyhow::{bail, Context, Result};
use std::collections::BTreeMap;

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Frontmatter {
    pub fields: BTreeMap<String, String>,
    pub body: String,
}

impl Frontmatter {
    /// Non-empty value of a metadata key.
    pub fn get(&self, key: &str) -> Option<&str> {
        self.fields
            .get(key)
            .map(|v| v.trim())
            .filter(|v| !v.is_empty())
    }
}

pub fn parse(content: &str) -> Result<Frontmatter> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);

    let mut lines = content.split_inclusive('\n');
    let first = match lines.next() {
        Some(line) => line,
        None => return Ok(Frontmatter::default()),
    };
    if first.trim_end() != "---" {
        return Ok(Frontmatter {
            fields: BTreeMap::new(),
            body: content.to_string(),
        });
    }

    let mut yaml = String::new();
    let mut consumed = first.len();
    let mut closed = false;
    for line in lines {
        consumed += line.len();
        if line.trim_end() == "---" {
            closed = true;
            break;
        }
        yaml.push_str(line);
    }
    if !closed {
        bail!("metadata block is not terminated by a closing '---' line");
    }

    let fields = parse_fields(&yaml)?;
    Ok(Frontmatter {
        fields,
        body: content[consumed..].to_string(),
    })
}

fn parse_fields(yaml: &str) -> Result<BTreeMap<String, String>> {
    if yaml.trim().is_empty() {
        return Ok(BTreeMap::new());
    }

    let value: serde_yaml::Value =
        serde_yaml::from_str(yaml).context("malformed metadata block")?;
    let mapping = match value {
        serde_yaml::Value::Mapping(m) => m,
        serde_yaml::Value::Null => return Ok(BTreeMap::new()),
        _ => bail!("metadata block must be a key/value mapping"),
    };

    let mut fields = BTreeMap::new();
    for (k, v) in mapping {
        let key = match scalar_to_string(&k) {
            Some(key) => key,
            None => bail!("metadata keys must be scalars"),
        };
        let value = match &v {
            serde_yaml::Value::Sequence(items) => Some(
                items
                    .iter()
                    .filter_map(scalar_to_string)
                    .collect::<Vec<_>>()
                    .join(", "),
            ),
            other => scalar_to_string(other),
        };
        if let Some(value) = value {
            fields.insert(key, value);
        }
    }
    Ok(fields)
}

fn scalar_to_string(v: &serde_yaml::Value) -> Option<String> {
    match v {
        serde_yaml::Value::String(s) => Some(s.clone()),
        serde_yaml::Value::Number(n) => Some(n.to_string()),
        serde_yaml::Value::Bool(b) => Some(b.to_string()),
        _ => None,
    }
}

/// First level-one heading in a markdown body, without the `# ` marker.
pub fn first_heading(body: &str) -> Option<String> {
    body.lines()
        .map(str::trim)
        .find_map(|line| line.strip_prefix("# "))
        .map(|h| h.trim().to_string())
        .filter(|h| !h.is_empty())
}
