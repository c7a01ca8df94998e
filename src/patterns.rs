//! Path classification with ordered, validated regex patterns.
//!
//! Each entity kind has an ordered list of patterns carrying named capture
//! groups. The list is tried front to back and the first pattern whose
//! required groups all participate in the match wins, which lets a strict
//! naming scheme sit in front of looser fallbacks.
//!
//! Patterns are validated once, when the matcher is built:
//!
//! | Kind | Required groups |
//! |------|-----------------|
//! | Unit | `unit_id` \| `unit_num` \| `number` |
//! | SubUnit | (`unit_id` \| `unit_num`) and (`sub_unit_id` \| `sub_unit_num` \| `number`) |
//! | Item | (`unit_id` \| `unit_num`) and (`sub_unit_id` \| `sub_unit_num`) and (`item_id` \| `number` \| `slug`) |
//!
//! Patterns with nested unbounded quantifiers such as `(a+)+` are rejected
//! outright. Unit and SubUnit patterns are matched against a single folder
//! name; Item patterns are matched against the project-relative file path
//! (`/`-separated).

use regex::Regex;
use serde::Deserialize;
use std::collections::HashMap;

use crate::models::EntityKind;

/// Capture group names the matcher understands.
pub const RECOGNIZED_GROUPS: &[&str] = &[
    "unit_id",
    "unit_num",
    "sub_unit_id",
    "sub_unit_num",
    "item_id",
    "number",
    "slug",
];

/// Ordered regex lists per entity kind, as written in the config file.
#[derive(Debug, Deserialize, Clone, PartialEq)]
pub struct PatternConfig {
    #[serde(default = "default_unit_patterns")]
    pub unit: Vec<String>,
    #[serde(default = "default_sub_unit_patterns")]
    pub sub_unit: Vec<String>,
    #[serde(default = "default_item_patterns")]
    pub item: Vec<String>,
}

impl Default for PatternConfig {
    fn default() -> Self {
        Self {
            unit: default_unit_patterns(),
            sub_unit: default_sub_unit_patterns(),
            item: default_item_patterns(),
        }
    }
}

fn default_unit_patterns() -> Vec<String> {
    vec![
        r"^U(?P<unit_num>\d{2})-(?P<slug>[a-z0-9-]+)$".to_string(),
        r"^(?P<unit_id>backlog|bugs|tech-debt)$".to_string(),
    ]
}

fn default_sub_unit_patterns() -> Vec<String> {
    vec![r"^U(?P<unit_num>\d{2})-S(?P<sub_unit_num>\d{2})-(?P<slug>[a-z0-9-]+)$".to_string()]
}

fn default_item_patterns() -> Vec<String> {
    vec![
        r"(?:^|/)T-U(?P<unit_num>\d{2})-S(?P<sub_unit_num>\d{2})-(?P<number>\d{3})[^/]*\.md$"
            .to_string(),
        r"(?:^|/)U(?P<unit_num>\d{2})-S(?P<sub_unit_num>\d{2})[^/]*/(?:tasks/)?(?P<number>\d{3})-(?P<slug>[a-z0-9-]+)\.md$"
            .to_string(),
        r"(?:^|/)U(?P<unit_num>\d{2})-S(?P<sub_unit_num>\d{2})[^/]*/(?P<slug>[a-z0-9-]+)\.md$"
            .to_string(),
    ]
}

/// A pattern rejected at load time.
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
#[error("[{kind} pattern #{position}] {pattern}: {message}")]
pub struct PatternError {
    pub kind: EntityKind,
    /// 1-based position in the configured list.
    pub position: usize,
    pub pattern: String,
    pub message: String,
}

#[derive(Debug, Clone)]
pub struct CompiledPattern {
    pub kind: EntityKind,
    /// 0-based position in the configured list.
    pub index: usize,
    pub source: String,
    regex: Regex,
}

impl CompiledPattern {
    /// Short label used in reports, e.g. `item#0`.
    pub fn label(&self) -> String {
        let kind = match self.kind {
            EntityKind::Unit => "unit",
            EntityKind::SubUnit => "sub_unit",
            EntityKind::Item => "item",
        };
        format!("{}#{}", kind, self.index)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitMatch {
    pub pattern_index: usize,
    pub key: String,
    pub slug: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubUnitMatch {
    pub pattern_index: usize,
    pub unit_key: String,
    pub key: String,
    pub slug: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ItemMatch {
    pub pattern_index: usize,
    pub unit_key: String,
    pub sub_unit_key: String,
    pub key: String,
    pub slug: Option<String>,
}

/// Compiled, validated pattern lists for all three kinds.
#[derive(Debug, Clone)]
pub struct PatternMatcher {
    units: Vec<CompiledPattern>,
    sub_units: Vec<CompiledPattern>,
    items: Vec<CompiledPattern>,
    warnings: Vec<String>,
}

impl PatternMatcher {
    /// Validate and compile every configured pattern.
    ///
    /// Fails on the first invalid pattern; unknown capture group names only
    /// produce warnings.
    pub fn from_config(config: &PatternConfig) -> Result<Self, PatternError> {
        let mut warnings = Vec::new();
        let units = compile_list(EntityKind::Unit, &config.unit, &mut warnings)?;
        let sub_units = compile_list(EntityKind::SubUnit, &config.sub_unit, &mut warnings)?;
        let items = compile_list(EntityKind::Item, &config.item, &mut warnings)?;

        for w in &warnings {
            tracing::warn!("{}", w);
        }

        Ok(Self {
            units,
            sub_units,
            items,
            warnings,
        })
    }

    pub fn warnings(&self) -> &[String] {
        &self.warnings
    }

    pub fn patterns(&self, kind: EntityKind) -> &[CompiledPattern] {
        match kind {
            EntityKind::Unit => &self.units,
            EntityKind::SubUnit => &self.sub_units,
            EntityKind::Item => &self.items,
        }
    }

    /// Classify a folder name as a Unit.
    pub fn match_unit(&self, segment: &str) -> Option<UnitMatch> {
        self.units.iter().find_map(|p| {
            let caps = Captured::from_match(&p.regex, segment)?;
            let key = caps.unit_key()?;
            Some(UnitMatch {
                pattern_index: p.index,
                key,
                slug: caps.get("slug"),
            })
        })
    }

    /// Classify a folder name as a SubUnit.
    pub fn match_sub_unit(&self, segment: &str) -> Option<SubUnitMatch> {
        self.sub_units.iter().find_map(|p| {
            let caps = Captured::from_match(&p.regex, segment)?;
            let unit_key = caps.unit_key()?;
            let key = match (caps.get("sub_unit_id"), caps.get("sub_unit_num"), caps.get("number")) {
                (Some(id), _, _) => format!("{}-{}", unit_key, id),
                (None, Some(n), _) | (None, None, Some(n)) => format!("{}-S{}", unit_key, n),
                _ => return None,
            };
            Some(SubUnitMatch {
                pattern_index: p.index,
                unit_key,
                key,
                slug: caps.get("slug"),
            })
        })
    }

    /// Classify a project-relative file path as an Item.
    pub fn match_item(&self, rel_path: &str) -> Option<ItemMatch> {
        self.items.iter().find_map(|p| {
            let caps = Captured::from_match(&p.regex, rel_path)?;
            let unit_key = caps.unit_key()?;
            let sub_unit_key = match (caps.get("sub_unit_id"), caps.get("sub_unit_num")) {
                (Some(id), _) => format!("{}-{}", unit_key, id),
                (None, Some(n)) => format!("{}-S{}", unit_key, n),
                _ => return None,
            };
            let slug = caps.get("slug");
            let key = match (caps.get("item_id"), caps.get("number"), slug.as_deref()) {
                (Some(id), _, _) => id,
                (None, Some(n), _) => format!("{}-{}", sub_unit_key, n),
                (None, None, Some(s)) => format!("{}-{}", sub_unit_key, s),
                _ => return None,
            };
            Some(ItemMatch {
                pattern_index: p.index,
                unit_key,
                sub_unit_key,
                key,
                slug,
            })
        })
    }
}

/// Named captures of one successful match, empty strings dropped.
struct Captured(HashMap<String, String>);

impl Captured {
    fn from_match(regex: &Regex, input: &str) -> Option<Self> {
        let caps = regex.captures(input)?;
        let values = regex
            .capture_names()
            .flatten()
            .filter_map(|name| {
                caps.name(name)
                    .filter(|m| !m.as_str().is_empty())
                    .map(|m| (name.to_string(), m.as_str().to_string()))
            })
            .collect();
        Some(Self(values))
    }

    fn get(&self, name: &str) -> Option<String> {
        self.0.get(name).cloned()
    }

    fn unit_key(&self) -> Option<String> {
        match (self.get("unit_id"), self.get("unit_num"), self.get("number")) {
            (Some(id), _, _) => Some(id),
            (None, Some(n), _) => Some(format!("U{}", n)),
            // `number` names the unit only in unit patterns; other kinds
            // require unit_id/unit_num at validation time.
            (None, None, Some(n)) if !self.0.contains_key("sub_unit_num")
                && !self.0.contains_key("sub_unit_id") =>
            {
                Some(format!("U{}", n))
            }
            _ => None,
        }
    }
}

fn compile_list(
    kind: EntityKind,
    patterns: &[String],
    warnings: &mut Vec<String>,
) -> Result<Vec<CompiledPattern>, PatternError> {
    patterns
        .iter()
        .enumerate()
        .map(|(index, source)| {
            let regex = validate_pattern(kind, index, source)?;
            warnings.extend(unknown_group_warnings(kind, index, &regex));
            Ok(CompiledPattern {
                kind,
                index,
                source: source.clone(),
                regex,
            })
        })
        .collect()
}

/// Validate one pattern and return its compiled form.
pub fn validate_pattern(kind: EntityKind, index: usize, pattern: &str) -> Result<Regex, PatternError> {
    let err = |message: String| PatternError {
        kind,
        position: index + 1,
        pattern: pattern.to_string(),
        message,
    };

    let regex = Regex::new(pattern).map_err(|e| err(format!("invalid regex syntax: {}", e)))?;

    if has_nested_unbounded_quantifier(pattern) {
        return Err(err(
            "nested unbounded quantifiers (e.g. (a+)+) are not allowed".to_string(),
        ));
    }

    let groups: Vec<&str> = regex.capture_names().flatten().collect();
    let has = |names: &[&str]| names.iter().any(|n| groups.contains(n));

    match kind {
        EntityKind::Unit => {
            if !has(&["unit_id", "unit_num", "number"]) {
                return Err(err(
                    "missing required capture group: one of 'unit_id', 'unit_num' or 'number'"
                        .to_string(),
                ));
            }
        }
        EntityKind::SubUnit => {
            if !has(&["unit_id", "unit_num"]) {
                return Err(err(
                    "missing required capture group: 'unit_id' or 'unit_num' to identify the parent unit"
                        .to_string(),
                ));
            }
            if !has(&["sub_unit_id", "sub_unit_num", "number"]) {
                return Err(err(
                    "missing required capture group: one of 'sub_unit_id', 'sub_unit_num' or 'number'"
                        .to_string(),
                ));
            }
        }
        EntityKind::Item => {
            if !has(&["unit_id", "unit_num"]) {
                return Err(err(
                    "missing required capture group: 'unit_id' or 'unit_num' to identify the parent unit"
                        .to_string(),
                ));
            }
            if !has(&["sub_unit_id", "sub_unit_num"]) {
                return Err(err(
                    "missing required capture group: 'sub_unit_id' or 'sub_unit_num' to identify the parent sub-unit"
                        .to_string(),
                ));
            }
            if !has(&["item_id", "number", "slug"]) {
                return Err(err(
                    "missing required capture group: one of 'item_id', 'number' or 'slug'"
                        .to_string(),
                ));
            }
        }
    }

    Ok(regex)
}

fn unknown_group_warnings(kind: EntityKind, index: usize, regex: &Regex) -> Vec<String> {
    regex
        .capture_names()
        .flatten()
        .filter(|name| !RECOGNIZED_GROUPS.contains(name))
        .map(|name| {
            let lower = name.to_lowercase();
            let suggestions: Vec<&str> = RECOGNIZED_GROUPS
                .iter()
                .copied()
                .filter(|r| r.contains(lower.as_str()) || lower.contains(r))
                .take(2)
                .collect();
            let mut msg = format!(
                "[{} pattern #{}] capture group '{}' is not recognized and will be ignored",
                kind,
                index + 1,
                name
            );
            if !suggestions.is_empty() {
                msg.push_str(&format!(". Did you mean '{}'?", suggestions.join("' or '")));
            }
            msg
        })
        .collect()
}

/// Detects a group that contains an unbounded quantifier and is itself
/// repeated without bound, e.g. `(a+)+`, `(?:x*y)*`, `(a+){2,}`.
pub fn has_nested_unbounded_quantifier(pattern: &str) -> bool {
    let chars: Vec<char> = pattern.chars().collect();
    // One flag per open group: does it contain an unbounded quantifier?
    let mut stack: Vec<bool> = vec![false];
    // Set right after `)`: whether the group just closed was unbounded inside.
    let mut closed_group: Option<bool> = None;
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        match c {
            '\\' => {
                i += 1;
                if matches!(chars.get(i), Some('p') | Some('P')) && chars.get(i + 1) == Some(&'{') {
                    while i < chars.len() && chars[i] != '}' {
                        i += 1;
                    }
                }
                closed_group = None;
            }
            '[' => {
                i = skip_class(&chars, i);
                closed_group = None;
            }
            '(' => {
                stack.push(false);
                closed_group = None;
            }
            ')' => {
                let inner = stack.pop().unwrap_or(false);
                if stack.is_empty() {
                    stack.push(false);
                }
                if inner {
                    if let Some(top) = stack.last_mut() {
                        *top = true;
                    }
                }
                closed_group = Some(inner);
                i += 1;
                continue;
            }
            '*' | '+' => {
                if closed_group == Some(true) {
                    return true;
                }
                if let Some(top) = stack.last_mut() {
                    *top = true;
                }
                closed_group = None;
            }
            '{' => {
                let (unbounded, end) = parse_repetition(&chars, i);
                if unbounded {
                    if closed_group == Some(true) {
                        return true;
                    }
                    if let Some(top) = stack.last_mut() {
                        *top = true;
                    }
                }
                closed_group = None;
                i = end;
            }
            _ => closed_group = None,
        }
        i += 1;
    }

    false
}

/// Returns the index of the `]` closing the class that opens at `start`.
fn skip_class(chars: &[char], start: usize) -> usize {
    let mut depth = 0;
    let mut i = start;
    while i < chars.len() {
        match chars[i] {
            '\\' => i += 1,
            '[' => {
                depth += 1;
                // A `]` directly after `[` or `[^` is a literal
                if chars.get(i + 1) == Some(&'^') {
                    i += 1;
                }
                if chars.get(i + 1) == Some(&']') {
                    i += 1;
                }
            }
            ']' => {
                depth -= 1;
                if depth == 0 {
                    return i;
                }
            }
            _ => {}
        }
        i += 1;
    }
    i
}

/// Parses `{n}`, `{n,}` or `{n,m}` at `start`; returns (unbounded, index of `}`).
fn parse_repetition(chars: &[char], start: usize) -> (bool, usize) {
    let mut i = start + 1;
    let mut body = String::new();
    while i < chars.len() && chars[i] != '}' {
        body.push(chars[i]);
        i += 1;
    }
    let unbounded = match body.split_once(',') {
        Some((_, max)) => max.trim().is_empty(),
        None => false,
    };
    (unbounded, i.min(chars.len().saturating_sub(1)))
}
