use std::collections::HashMap;
use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::OnceLock;

use regex::{Regex, RegexBuilder};

// ---------------------------------------------------------------------------
// TagId & flags
// ---------------------------------------------------------------------------

/// Handle for an interned [`Tag`] inside a [`TagStore`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct TagId(pub u32);

/// Comparison operator carried by a numeric tag such as `<W>=10>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NumOp {
    Eq,
    Ne,
    Lt,
    Gt,
    Le,
    Ge,
}

impl NumOp {
    pub fn compare(self, lhs: f64, rhs: f64) -> bool {
        match self {
            NumOp::Eq => lhs == rhs,
            NumOp::Ne => lhs != rhs,
            NumOp::Lt => lhs < rhs,
            NumOp::Gt => lhs > rhs,
            NumOp::Le => lhs <= rhs,
            NumOp::Ge => lhs >= rhs,
        }
    }
}

/// Semantic flags derived from a tag's surface form at intern time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct TagFlags {
    /// `*` — matches any tag.
    pub any: bool,
    /// `<key OP value>` comparison tag.
    pub numerical: bool,
    /// Grammatical-function mapping tag (`@`-prefixed).
    pub mapping: bool,
    /// `"<...>"` surface wordform.
    pub wordform: bool,
    /// `"..."` baseform / lemma.
    pub baseform: bool,
    /// Any quoted tag (wordform or baseform).
    pub textual: bool,
    /// `^`-prefixed — vetoes a composite match when present.
    pub failfast: bool,
    /// `i` modifier — case-insensitive textual match.
    pub case_insensitive: bool,
    /// `r` modifier — the quoted body is a regular expression.
    pub regexp: bool,
    /// Contains `$1`..`$9` — resolved against regex captures at apply time.
    pub varstring: bool,
    /// Sentence boundary magic tag (`>>>` / `<<<`).
    pub boundary: bool,
}

impl TagFlags {
    /// True when membership cannot be decided by plain tag identity and the
    /// matcher must evaluate the tag against the reading.
    pub fn is_special(&self) -> bool {
        self.any
            || self.numerical
            || self.failfast
            || self.case_insensitive
            || self.regexp
            || self.varstring
    }
}

// ---------------------------------------------------------------------------
// Tag
// ---------------------------------------------------------------------------

/// An interned, content-hashed tag. Identity is the content hash; two interns
/// of the same text yield the same [`TagId`].
#[derive(Debug)]
pub struct Tag {
    pub id: TagId,
    /// The surface text exactly as interned, including quotes and modifiers.
    pub text: String,
    pub hash: u64,
    pub flags: TagFlags,
    pub num_key: Option<String>,
    pub num_op: Option<NumOp>,
    pub num_value: Option<f64>,
    /// Inner comparison body for textual tags (quotes and modifiers stripped).
    pattern: String,
    compiled: OnceLock<Option<Regex>>,
}

impl Tag {
    /// The comparison body: quoted tags yield the unquoted text, everything
    /// else the full surface text.
    pub fn pattern_text(&self) -> &str {
        &self.pattern
    }

    /// Lazily compiled regex for `r`-modified textual tags.
    pub fn regex(&self) -> Option<&Regex> {
        self.compiled
            .get_or_init(|| {
                if !self.flags.regexp {
                    return None;
                }
                RegexBuilder::new(&self.pattern)
                    .case_insensitive(self.flags.case_insensitive)
                    .build()
                    .map_err(|e| {
                        log::warn!("tag {:?}: invalid regex: {e}", self.text);
                        e
                    })
                    .ok()
            })
            .as_ref()
    }

    /// Match this tag's textual body against a subject string, honoring the
    /// regex and case-insensitive modifiers.
    pub fn matches_text(&self, subject: &str) -> bool {
        if self.flags.regexp {
            match self.regex() {
                Some(re) => re.is_match(subject),
                None => false,
            }
        } else if self.flags.case_insensitive {
            self.pattern.eq_ignore_ascii_case(subject)
        } else {
            self.pattern == subject
        }
    }

    /// Like [`matches_text`](Self::matches_text), but returns the capture
    /// groups of a regex match for later varstring substitution.
    pub fn match_captures(&self, subject: &str) -> Option<Vec<String>> {
        if self.flags.regexp {
            let caps = self.regex()?.captures(subject)?;
            Some(
                caps.iter()
                    .skip(1)
                    .map(|m| m.map(|m| m.as_str().to_owned()).unwrap_or_default())
                    .collect(),
            )
        } else if self.matches_text(subject) {
            Some(Vec::new())
        } else {
            None
        }
    }
}

// ---------------------------------------------------------------------------
// TagStore — global interner
// ---------------------------------------------------------------------------

/// Append-only tag interner. Tags are deduplicated by content hash and never
/// removed; runtime-generated varstring resolutions intern through the same
/// path as grammar-compile-time tags.
#[derive(Debug, Default)]
pub struct TagStore {
    tags: Vec<Tag>,
    by_hash: HashMap<u64, Vec<TagId>>,
    mapping_prefix: char,
}

impl TagStore {
    pub fn new() -> Self {
        Self {
            tags: Vec::new(),
            by_hash: HashMap::new(),
            mapping_prefix: '@',
        }
    }

    pub fn len(&self) -> usize {
        self.tags.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tags.is_empty()
    }

    pub fn get(&self, id: TagId) -> &Tag {
        &self.tags[id.0 as usize]
    }

    pub fn find(&self, text: &str) -> Option<TagId> {
        let hash = content_hash(text);
        self.by_hash
            .get(&hash)?
            .iter()
            .copied()
            .find(|id| self.get(*id).text == text)
    }

    /// Intern a tag by surface text, deriving its flags. Returns the existing
    /// id when the exact text was interned before.
    pub fn intern(&mut self, text: &str) -> TagId {
        if let Some(id) = self.find(text) {
            return id;
        }
        let id = TagId(self.tags.len() as u32);
        let tag = parse_tag(id, text, self.mapping_prefix);
        self.by_hash.entry(tag.hash).or_default().push(id);
        self.tags.push(tag);
        id
    }

    /// Iterate all interned tags in id order.
    pub fn iter(&self) -> impl Iterator<Item = &Tag> {
        self.tags.iter()
    }
}

pub(crate) fn content_hash(text: &str) -> u64 {
    let mut h = DefaultHasher::new();
    text.hash(&mut h);
    h.finish()
}

// ---------------------------------------------------------------------------
// Surface-form parsing
// ---------------------------------------------------------------------------

fn parse_tag(id: TagId, text: &str, mapping_prefix: char) -> Tag {
    let mut flags = TagFlags::default();
    let mut body = text;

    if let Some(rest) = body.strip_prefix('^') {
        flags.failfast = true;
        body = rest;
    }

    if body == "*" {
        flags.any = true;
    }
    if body == ">>>" || body == "<<<" {
        flags.boundary = true;
    }
    if body.starts_with(mapping_prefix) && body.len() > 1 {
        flags.mapping = true;
    }
    if contains_capture_ref(body) {
        flags.varstring = true;
    }

    let mut pattern = body.to_owned();
    let mut num = None;

    if body.starts_with('"') {
        // Quoted textual tag with optional trailing r/i modifiers.
        let (inner, modifiers) = split_quoted(body);
        if let Some(inner) = inner {
            flags.textual = true;
            for m in modifiers.chars() {
                match m {
                    'r' => flags.regexp = true,
                    'i' => flags.case_insensitive = true,
                    _ => {}
                }
            }
            if inner.starts_with('<') && inner.ends_with('>') && inner.len() > 2 {
                flags.wordform = true;
                pattern = inner[1..inner.len() - 1].to_owned();
            } else {
                flags.baseform = true;
                pattern = inner.to_owned();
            }
        }
    } else if let Some(parsed) = parse_numeric(body) {
        flags.numerical = true;
        num = Some(parsed);
    }

    let (num_key, num_op, num_value) = match num {
        Some((k, op, v)) => (Some(k), Some(op), Some(v)),
        None => (None, None, None),
    };

    Tag {
        id,
        text: text.to_owned(),
        hash: content_hash(text),
        flags,
        num_key,
        num_op,
        num_value,
        pattern,
        compiled: OnceLock::new(),
    }
}

fn contains_capture_ref(text: &str) -> bool {
    let bytes = text.as_bytes();
    bytes.iter().enumerate().any(|(i, &b)| {
        b == b'$' && bytes.get(i + 1).is_some_and(|c| c.is_ascii_digit() && *c != b'0')
    })
}

/// Split `"body"mods` into the quoted body and trailing modifier chars.
fn split_quoted(text: &str) -> (Option<&str>, &str) {
    debug_assert!(text.starts_with('"'));
    match text[1..].rfind('"') {
        Some(pos) => {
            let inner = &text[1..pos + 1];
            let modifiers = &text[pos + 2..];
            (Some(inner), modifiers)
        }
        None => (None, ""),
    }
}

/// Parse `<key OP value>` numeric comparison tags. Returns `None` for plain
/// angle-bracket tags like `<adv>`.
fn parse_numeric(text: &str) -> Option<(String, NumOp, f64)> {
    let inner = text.strip_prefix('<')?.strip_suffix('>')?;
    let op_pos = inner.find(['=', '<', '>', '!'])?;
    let key = &inner[..op_pos];
    if key.is_empty() {
        return None;
    }
    let rest = &inner[op_pos..];
    let (op, value_str) = if let Some(v) = rest.strip_prefix("!=") {
        (NumOp::Ne, v)
    } else if let Some(v) = rest.strip_prefix("<=") {
        (NumOp::Le, v)
    } else if let Some(v) = rest.strip_prefix(">=") {
        (NumOp::Ge, v)
    } else if let Some(v) = rest.strip_prefix('=') {
        (NumOp::Eq, v)
    } else if let Some(v) = rest.strip_prefix('<') {
        (NumOp::Lt, v)
    } else if let Some(v) = rest.strip_prefix('>') {
        (NumOp::Gt, v)
    } else {
        return None;
    };
    let value: f64 = value_str.parse().ok()?;
    Some((key.to_owned(), op, value))
}
