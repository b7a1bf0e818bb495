//! Computed-style snapshots.
//!
//! A [`StyleMap`] is a plain property→value mapping with sorted iteration.
//! Properties absent from a map are understood as "default for the tag";
//! the capture engine's style utilities fill that side in.

use std::collections::BTreeMap;
use std::sync::Arc;

use cssparser::{Delimiter, ParseError, Parser, ParserInput};

/// The pseudo-elements the capture engine materializes.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum PseudoKind {
    Before,
    After,
    FirstLetter,
}

impl PseudoKind {
    pub const ALL: [PseudoKind; 3] = [PseudoKind::Before, PseudoKind::After, PseudoKind::FirstLetter];

    /// The canonical double-colon selector text.
    pub fn selector(self) -> &'static str {
        match self {
            PseudoKind::Before => "::before",
            PseudoKind::After => "::after",
            PseudoKind::FirstLetter => "::first-letter",
        }
    }
}

/// A resolved property→value mapping. Keys are lowercase property names;
/// values are kept verbatim as declared/computed.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct StyleMap {
    properties: BTreeMap<String, String>,
}

impl StyleMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_empty(&self) -> bool {
        self.properties.is_empty()
    }

    pub fn len(&self) -> usize {
        self.properties.len()
    }

    pub fn get(&self, property: &str) -> Option<&str> {
        self.properties.get(property).map(String::as_str)
    }

    /// `get` with a fallback for absent properties.
    pub fn get_or<'a>(&'a self, property: &str, default: &'a str) -> &'a str {
        self.get(property).unwrap_or(default)
    }

    pub fn set(&mut self, property: impl Into<String>, value: impl Into<String>) {
        self.properties
            .insert(property.into().to_ascii_lowercase(), value.into());
    }

    pub fn remove(&mut self, property: &str) -> Option<String> {
        self.properties.remove(property)
    }

    /// Sorted (property, value) iteration — the basis of stable style keys.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.properties
            .iter()
            .map(|(k, v)| (k.as_str(), v.as_str()))
    }

    /// Parses a CSS declaration list (the contents of a `style` attribute).
    /// Malformed declarations are skipped, the rest are kept — the same
    /// error recovery a UA applies.
    pub fn from_inline_css(css: &str) -> Self {
        let mut map = StyleMap::new();
        let mut input = ParserInput::new(css);
        let mut parser = Parser::new(&mut input);

        loop {
            parser.skip_whitespace();
            if parser.is_exhausted() {
                break;
            }
            let _ = parser
                .parse_until_after(Delimiter::Semicolon, |p| parse_declaration_into(&mut map, p));
        }
        map
    }

    /// Serializes to `prop: value; prop: value` declaration-list text.
    pub fn to_css_block(&self) -> String {
        let mut out = String::new();
        for (prop, value) in self.iter() {
            if !out.is_empty() {
                out.push(' ');
            }
            out.push_str(prop);
            out.push_str(": ");
            out.push_str(value);
            out.push(';');
        }
        out
    }
}

/// One `name: value` declaration, with the raw value captured verbatim
/// (nested functions and blocks included) and `!important` stripped.
fn parse_declaration_into<'i>(
    map: &mut StyleMap,
    p: &mut Parser<'i, '_>,
) -> Result<(), ParseError<'i, ()>> {
    let name = p.expect_ident()?.to_string();
    p.expect_colon()?;
    p.skip_whitespace();
    let start = p.position();
    while p.next().is_ok() {}
    let value = p.slice_from(start).trim();
    let value = value
        .strip_suffix("!important")
        .map(|v| v.trim_end())
        .unwrap_or(value);
    if !value.is_empty() {
        map.set(name, value);
    }
    Ok(())
}

impl FromIterator<(String, String)> for StyleMap {
    fn from_iter<T: IntoIterator<Item = (String, String)>>(iter: T) -> Self {
        let mut map = StyleMap::new();
        for (k, v) in iter {
            map.set(k, v);
        }
        map
    }
}

/// Resolved styles attached to an element: the primary snapshot plus the
/// pseudo-element snapshots the host observed for it. A `None` pseudo entry
/// means no rule targets that pseudo on this element.
#[derive(Clone, Debug, Default)]
pub struct ElementStyles {
    pub primary: Option<Arc<StyleMap>>,
    pub before: Option<Arc<StyleMap>>,
    pub after: Option<Arc<StyleMap>>,
    pub first_letter: Option<Arc<StyleMap>>,
}

impl ElementStyles {
    pub fn pseudo(&self, kind: PseudoKind) -> Option<&Arc<StyleMap>> {
        match kind {
            PseudoKind::Before => self.before.as_ref(),
            PseudoKind::After => self.after.as_ref(),
            PseudoKind::FirstLetter => self.first_letter.as_ref(),
        }
    }

    pub fn set_pseudo(&mut self, kind: PseudoKind, style: Arc<StyleMap>) {
        match kind {
            PseudoKind::Before => self.before = Some(style),
            PseudoKind::After => self.after = Some(style),
            PseudoKind::FirstLetter => self.first_letter = Some(style),
        }
    }

    pub fn has_any_pseudo(&self) -> bool {
        self.before.is_some() || self.after.is_some() || self.first_letter.is_some()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_declaration_lists() {
        let map = StyleMap::from_inline_css("color: red; background-image: url(a.png)");
        assert_eq!(map.get("color"), Some("red"));
        assert_eq!(map.get("background-image"), Some("url(a.png)"));
    }

    #[test]
    fn recovers_from_malformed_declarations() {
        let map = StyleMap::from_inline_css("color red; font-size: 12px; ; : broken");
        assert_eq!(map.get("color"), None);
        assert_eq!(map.get("font-size"), Some("12px"));
        assert_eq!(map.len(), 1);
    }

    #[test]
    fn strips_important() {
        let map = StyleMap::from_inline_css("display: none !important");
        assert_eq!(map.get("display"), Some("none"));
    }

    #[test]
    fn keeps_nested_functions_whole() {
        let map =
            StyleMap::from_inline_css("transform: matrix(1, 0, 0, 1, 10, 20); color: blue");
        assert_eq!(map.get("transform"), Some("matrix(1, 0, 0, 1, 10, 20)"));
        assert_eq!(map.get("color"), Some("blue"));
    }

    #[test]
    fn iteration_is_sorted() {
        let map = StyleMap::from_inline_css("z-index: 1; color: red; background: blue");
        let keys: Vec<_> = map.iter().map(|(k, _)| k.to_string()).collect();
        assert_eq!(keys, ["background", "color", "z-index"]);
    }
}
