//! SQL text with structured parameter placeholders.
//!
//! Authored SQL refers to parameters as `@name`. Instead of carrying those
//! markers around as raw text, a fragment keeps each usage as a [`Placeholder`]
//! tagged with the scope (parameter manager) it was parsed in:
//!
//! ```text
//! "x = @code AND y = '@notme'"
//!   -> [Text("x = "), Param(code, scope 3), Text(" AND y = '@notme'")]
//! ```
//!
//! Renames produced when a subquery's parameters are folded into a parent
//! only touch placeholders of the subquery's scope, and names are substituted
//! when the fragment is rendered, so a rename can never hit unrelated text.

use std::collections::BTreeMap;
use std::fmt;

/// Identity of a parameter manager.
pub type ScopeId = u64;

/// A parameter usage inside a fragment.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct Placeholder {
    pub name: String,
    pub scope: ScopeId,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FragmentPart {
    Text(String),
    Param(Placeholder),
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SqlFragment {
    parts: Vec<FragmentPart>,
}

impl SqlFragment {
    pub fn new() -> Self {
        Self::default()
    }

    /// Literal text, no placeholder detection.
    pub fn text(s: impl Into<String>) -> Self {
        let mut fragment = Self::new();
        fragment.push_str(&s.into());
        fragment
    }

    /// Parse authored SQL, turning every `@name` outside literals, quoted
    /// identifiers and comments into a placeholder of `scope`.
    ///
    /// `@@name` (server variables) stays text.
    pub fn parse(sql: &str, scope: ScopeId) -> Self {
        let chars: Vec<char> = sql.chars().collect();
        let mut fragment = Self::new();
        let mut text = String::new();
        let mut i = 0;

        while i < chars.len() {
            let c = chars[i];
            let next = chars.get(i + 1).copied();

            match c {
                '\'' | '"' | '`' | '[' => {
                    let close = if c == '[' { ']' } else { c };
                    text.push(c);
                    i += 1;
                    while i < chars.len() {
                        text.push(chars[i]);
                        i += 1;
                        if chars[i - 1] == close {
                            break;
                        }
                    }
                }
                '-' if next == Some('-') => {
                    while i < chars.len() && chars[i] != '\n' {
                        text.push(chars[i]);
                        i += 1;
                    }
                }
                '/' if next == Some('*') => {
                    text.push_str("/*");
                    i += 2;
                    while i < chars.len() {
                        if chars[i] == '*' && chars.get(i + 1) == Some(&'/') {
                            text.push_str("*/");
                            i += 2;
                            break;
                        }
                        text.push(chars[i]);
                        i += 1;
                    }
                }
                '@' if next == Some('@') => {
                    text.push_str("@@");
                    i += 2;
                    while i < chars.len() && is_ident_char(chars[i]) {
                        text.push(chars[i]);
                        i += 1;
                    }
                }
                '@' if next.is_some_and(is_ident_start)
                    && !(i > 0 && is_ident_char(chars[i - 1])) =>
                {
                    let start = i + 1;
                    let mut end = start;
                    while end < chars.len() && is_ident_char(chars[end]) {
                        end += 1;
                    }
                    if !text.is_empty() {
                        fragment.push_str(&std::mem::take(&mut text));
                    }
                    fragment.push_placeholder(Placeholder {
                        name: chars[start..end].iter().collect(),
                        scope,
                    });
                    i = end;
                }
                _ => {
                    text.push(c);
                    i += 1;
                }
            }
        }

        if !text.is_empty() {
            fragment.push_str(&text);
        }
        fragment
    }

    pub fn parts(&self) -> &[FragmentPart] {
        &self.parts
    }

    pub fn push_str(&mut self, s: &str) {
        if s.is_empty() {
            return;
        }
        if let Some(FragmentPart::Text(last)) = self.parts.last_mut() {
            last.push_str(s);
        } else {
            self.parts.push(FragmentPart::Text(s.to_string()));
        }
    }

    pub fn push_placeholder(&mut self, placeholder: Placeholder) {
        self.parts.push(FragmentPart::Param(placeholder));
    }

    pub fn append(&mut self, other: &SqlFragment) {
        for part in &other.parts {
            match part {
                FragmentPart::Text(t) => self.push_str(t),
                FragmentPart::Param(p) => self.push_placeholder(p.clone()),
            }
        }
    }

    /// Join fragments with a text separator.
    pub fn join<'a>(fragments: impl IntoIterator<Item = &'a SqlFragment>, sep: &str) -> Self {
        let mut out = Self::new();
        for (i, fragment) in fragments.into_iter().enumerate() {
            if i > 0 {
                out.push_str(sep);
            }
            out.append(fragment);
        }
        out
    }

    pub fn is_empty(&self) -> bool {
        self.parts.is_empty()
    }

    /// No placeholders and nothing but whitespace.
    pub fn is_blank(&self) -> bool {
        self.parts.iter().all(|p| match p {
            FragmentPart::Text(t) => t.trim().is_empty(),
            FragmentPart::Param(_) => false,
        })
    }

    pub fn placeholders(&self) -> impl Iterator<Item = &Placeholder> {
        self.parts.iter().filter_map(|p| match p {
            FragmentPart::Param(p) => Some(p),
            FragmentPart::Text(_) => None,
        })
    }

    /// Rename and re-scope placeholders belonging to the map's source scope.
    pub fn apply_renames(&mut self, map: &RenameMap) {
        for part in &mut self.parts {
            if let FragmentPart::Param(p) = part {
                if p.scope != map.from_scope {
                    continue;
                }
                if let Some(new_name) = map.renames.get(&p.name) {
                    p.name = new_name.clone();
                }
                p.scope = map.to_scope;
            }
        }
    }

    pub fn with_renames(&self, map: &RenameMap) -> Self {
        let mut out = self.clone();
        out.apply_renames(map);
        out
    }

    /// Render to text, asking `bind` for the text of every placeholder.
    pub fn render_with<F>(&self, mut bind: F) -> String
    where
        F: FnMut(&Placeholder) -> String,
    {
        let mut out = String::new();
        for part in &self.parts {
            match part {
                FragmentPart::Text(t) => out.push_str(t),
                FragmentPart::Param(p) => out.push_str(&bind(p)),
            }
        }
        out
    }
}

fn is_ident_start(c: char) -> bool {
    c.is_ascii_alphabetic() || c == '_'
}

fn is_ident_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '_'
}

/// Renders with `@name` markers.
impl fmt::Display for SqlFragment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.render_with(|p| format!("@{}", p.name)))
    }
}

impl From<&str> for SqlFragment {
    fn from(s: &str) -> Self {
        SqlFragment::text(s)
    }
}

impl From<String> for SqlFragment {
    fn from(s: String) -> Self {
        SqlFragment::text(s)
    }
}

/// Renames produced by folding one parameter scope into another.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RenameMap {
    pub from_scope: ScopeId,
    pub to_scope: ScopeId,
    renames: BTreeMap<String, String>,
}

impl RenameMap {
    pub fn new(from_scope: ScopeId, to_scope: ScopeId) -> Self {
        Self {
            from_scope,
            to_scope,
            renames: BTreeMap::new(),
        }
    }

    pub fn insert(&mut self, old: impl Into<String>, new: impl Into<String>) {
        self.renames.insert(old.into(), new.into());
    }

    pub fn get(&self, old: &str) -> Option<&str> {
        self.renames.get(old).map(|s| s.as_str())
    }

    pub fn is_empty(&self) -> bool {
        self.renames.is_empty()
    }

    pub fn len(&self) -> usize {
        self.renames.len()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.renames.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}
