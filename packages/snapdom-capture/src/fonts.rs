//! The font engine: collects which font variants and codepoints a capture
//! actually uses, matches them against `@font-face` declarations, and emits
//! a self-contained CSS block with every surviving binary inlined as a data
//! URI.

use percent_encoding::utf8_percent_encode;
use rustc_hash::FxHashSet;
use snapdom_dom::{Document, PseudoKind, StyleMap, TreeTraverser};
use snapdom_dom::stylesheet::{StylesheetOrigin, StylesheetSource};
use snapdom_traits::layout::{LayoutProbe, TextProbe};

use crate::cache::Bucket;
use crate::fetch::{COMPONENT, FetchOptions, Fetcher};
use crate::options::{CaptureContext, FontExclusion, LocalFontFace};
use crate::pseudo::{ContentToken, parse_content_tokens};

/// Engine stylesheet tags (the `data-snapdom` markers of the injected
/// `<style>`/`<link>` elements).
pub const EMBED_FONTS_TAG: &str = "embedFonts";

const GENERIC_FAMILIES: &[&str] = &[
    "serif",
    "sans-serif",
    "monospace",
    "cursive",
    "fantasy",
    "system-ui",
    "emoji",
    "math",
    "fangsong",
];

const ICON_FAMILY_MARKERS: &[&str] = &[
    "font awesome",
    "fontawesome",
    "material icons",
    "material symbols",
    "icomoon",
    "glyphicons",
    "ionicons",
    "bootstrap-icons",
    "remixicon",
];

const FONT_CDN_HOSTS: &[&str] = &[
    "fonts.googleapis.com",
    "fonts.gstatic.com",
    "use.typekit.net",
    "p.typekit.net",
    "use.fontawesome.com",
    "kit.fontawesome.com",
];

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum VariantStyle {
    Normal,
    Italic,
    Oblique,
}

impl VariantStyle {
    fn parse(raw: &str) -> Self {
        let raw = raw.trim().to_ascii_lowercase();
        if raw.starts_with("italic") {
            VariantStyle::Italic
        } else if raw.starts_with("oblique") {
            VariantStyle::Oblique
        } else {
            VariantStyle::Normal
        }
    }

    fn as_str(self) -> &'static str {
        match self {
            VariantStyle::Normal => "normal",
            VariantStyle::Italic => "italic",
            VariantStyle::Oblique => "oblique",
        }
    }

    /// Italic and oblique satisfy each other; normal only matches normal.
    fn is_compatible(self, declared: VariantStyle) -> bool {
        match self {
            VariantStyle::Normal => declared == VariantStyle::Normal,
            VariantStyle::Italic | VariantStyle::Oblique => declared != VariantStyle::Normal,
        }
    }
}

/// A required (family, weight, style, stretch) combination observed under
/// the capture root.
#[derive(Clone, Debug, PartialEq)]
pub struct FontVariant {
    pub family: String,
    /// Normalized 100..=900.
    pub weight: u16,
    pub style: VariantStyle,
    /// Normalized 50..=200 percent.
    pub stretch_pct: f32,
}

impl FontVariant {
    /// The opaque `family__weight__style__stretchPct` key.
    pub fn key(&self) -> String {
        format!(
            "{}__{}__{}__{}",
            self.family,
            self.weight,
            self.style.as_str(),
            self.stretch_pct.round() as i32
        )
    }
}

/// `normal`→400, `bold`→700, numbers clamped into 100..=900.
pub fn normalize_weight(raw: &str) -> u16 {
    match raw.trim().to_ascii_lowercase().as_str() {
        "normal" => 400,
        "bold" => 700,
        "bolder" => 700,
        "lighter" => 300,
        other => other
            .parse::<f32>()
            .map(|w| (w.round() as i32).clamp(100, 900) as u16)
            .unwrap_or(400),
    }
}

/// Font-stretch keyword or percentage → percent in 50..=200.
pub fn normalize_stretch(raw: &str) -> f32 {
    let raw = raw.trim().to_ascii_lowercase();
    let pct = match raw.as_str() {
        "ultra-condensed" => 50.0,
        "extra-condensed" => 62.5,
        "condensed" => 75.0,
        "semi-condensed" => 87.5,
        "normal" | "" => 100.0,
        "semi-expanded" => 112.5,
        "expanded" => 125.0,
        "extra-expanded" => 150.0,
        "ultra-expanded" => 200.0,
        other => other
            .strip_suffix('%')
            .and_then(|v| v.trim().parse::<f32>().ok())
            .unwrap_or(100.0),
    };
    pct.clamp(50.0, 200.0)
}

/// A declared range: a single value (`min == max`) or `min max`.
fn parse_weight_range(raw: &str) -> (u16, u16) {
    let mut parts = raw.split_ascii_whitespace();
    let min = parts.next().map(normalize_weight).unwrap_or(400);
    let max = parts.next().map(normalize_weight).unwrap_or(min);
    (min.min(max), min.max(max))
}

fn parse_stretch_range(raw: &str) -> (f32, f32) {
    let mut parts = raw.split_ascii_whitespace();
    let min = parts.next().map(normalize_stretch).unwrap_or(100.0);
    let max = parts.next().map(normalize_stretch).unwrap_or(min);
    (min.min(max), min.max(max))
}

/// Strips quotes from a family name.
pub fn unquote_family(raw: &str) -> String {
    raw.trim().trim_matches(['"', '\'']).trim().to_string()
}

/// First non-generic family out of a `font-family` list, if any.
pub fn primary_family(font_family: &str) -> Option<String> {
    for entry in split_top_level_commas(font_family) {
        let family = unquote_family(&entry);
        if family.is_empty() {
            continue;
        }
        let lower = family.to_ascii_lowercase();
        if GENERIC_FAMILIES.contains(&lower.as_str()) || lower.starts_with("ui-") {
            continue;
        }
        return Some(family);
    }
    None
}

/// Whether a family name looks like an icon font (built-in markers plus the
/// capture's configured patterns).
pub fn is_icon_family(family: &str, ctx: &CaptureContext) -> bool {
    let lower = family.to_ascii_lowercase();
    ICON_FAMILY_MARKERS.iter().any(|m| lower.contains(m))
        || ctx
            .icon_fonts
            .iter()
            .any(|pattern| lower.contains(&pattern.to_ascii_lowercase()))
}

fn variant_from_style(family: String, style: &StyleMap) -> FontVariant {
    FontVariant {
        family,
        weight: normalize_weight(style.get_or("font-weight", "400")),
        style: VariantStyle::parse(style.get_or("font-style", "normal")),
        stretch_pct: normalize_stretch(style.get_or("font-stretch", "normal")),
    }
}

/// Collects the font variants used by elements (and their `::before` /
/// `::after`) under `root`, deduplicated by variant key.
pub fn collect_used_font_variants(doc: &Document, root: usize) -> Vec<FontVariant> {
    let mut seen = FxHashSet::default();
    let mut variants = Vec::new();

    let mut push = |style: &StyleMap| {
        let Some(family) = style.get("font-family").and_then(primary_family) else {
            return;
        };
        let variant = variant_from_style(family, style);
        if seen.insert(variant.key()) {
            variants.push(variant);
        }
    };

    for id in TreeTraverser::new_with_root(doc, root) {
        let Some(node) = doc.get_node(id) else { continue };
        if !node.is_element() {
            continue;
        }
        if let Some(style) = &node.styles.primary {
            push(style);
        }
        for kind in [PseudoKind::Before, PseudoKind::After] {
            if let Some(style) = node.styles.pseudo(kind) {
                push(style);
            }
        }
    }
    variants
}

/// Collects every codepoint that can render under `root`: text node
/// contents plus pseudo `content` strings (CSS escapes already decoded by
/// the tokenizer).
pub fn collect_used_codepoints(doc: &Document, root: usize) -> FxHashSet<u32> {
    let mut codepoints = FxHashSet::default();
    for id in TreeTraverser::new_with_root(doc, root) {
        let Some(node) = doc.get_node(id) else { continue };
        if let Some(text) = node.text_data() {
            codepoints.extend(text.content.chars().map(|c| c as u32));
        }
        for kind in PseudoKind::ALL {
            let Some(style) = node.styles.pseudo(kind) else {
                continue;
            };
            let Some(content) = style.get("content") else {
                continue;
            };
            for token in parse_content_tokens(content) {
                if let ContentToken::Text(text) = token {
                    codepoints.extend(text.chars().map(|c| c as u32));
                }
            }
        }
    }
    codepoints
}

// ------- @font-face harvesting -------

/// A parsed `@font-face` block, descriptors kept raw.
#[derive(Clone, Debug)]
pub struct FontFaceDecl {
    pub family: String,
    pub weight: String,
    pub style: String,
    pub stretch: String,
    pub unicode_range: Option<String>,
    pub src: String,
}

impl FontFaceDecl {
    /// Whether this face can serve the required variant: compatible style,
    /// weight inside the declared range, stretch inside the declared range
    /// — or the single-weight ±300 fallback that covers UA-synthesized
    /// bold/italic.
    pub fn matches(&self, required: &FontVariant) -> bool {
        if !required.style.is_compatible(VariantStyle::parse(&self.style)) {
            return false;
        }
        let (stretch_min, stretch_max) = parse_stretch_range(&self.stretch);
        if required.stretch_pct < stretch_min || required.stretch_pct > stretch_max {
            return false;
        }
        let (weight_min, weight_max) = parse_weight_range(&self.weight);
        if (weight_min..=weight_max).contains(&required.weight) {
            return true;
        }
        // Single-weight faces match within ±300.
        weight_min == weight_max
            && required.weight.abs_diff(weight_min) <= 300
    }
}

/// Extracts every `@font-face` block out of raw CSS.
pub fn parse_font_faces(css: &str) -> Vec<FontFaceDecl> {
    let mut faces = Vec::new();
    let lower = css.to_ascii_lowercase();
    let mut search_from = 0;

    while let Some(at) = lower[search_from..].find("@font-face") {
        let at = search_from + at;
        let Some(open_rel) = css[at..].find('{') else {
            break;
        };
        let open = at + open_rel;
        let Some(close) = find_matching_brace(css, open) else {
            break;
        };
        let block = &css[open + 1..close];
        search_from = close + 1;

        let decls = StyleMap::from_inline_css(block);
        let Some(family) = decls.get("font-family").map(unquote_family) else {
            continue;
        };
        let Some(src) = decls.get("src") else {
            continue;
        };
        faces.push(FontFaceDecl {
            family,
            weight: decls.get_or("font-weight", "normal").to_string(),
            style: decls.get_or("font-style", "normal").to_string(),
            stretch: decls.get_or("font-stretch", "normal").to_string(),
            unicode_range: decls.get("unicode-range").map(str::to_string),
            src: src.to_string(),
        });
    }
    faces
}

fn find_matching_brace(text: &str, open: usize) -> Option<usize> {
    let mut depth = 0usize;
    for (i, byte) in text.bytes().enumerate().skip(open) {
        match byte {
            b'{' => depth += 1,
            b'}' => {
                depth -= 1;
                if depth == 0 {
                    return Some(i);
                }
            }
            _ => {}
        }
    }
    None
}

// ------- unicode ranges -------

/// Parses `U+0-FF, U+26??, U+1EA0-1EF9` style lists.
pub fn parse_unicode_ranges(raw: &str) -> Vec<(u32, u32)> {
    let mut ranges = Vec::new();
    for token in raw.split(',') {
        let token = token.trim();
        let Some(body) = token
            .strip_prefix("U+")
            .or_else(|| token.strip_prefix("u+"))
        else {
            continue;
        };
        let range = if let Some((lo, hi)) = body.split_once('-') {
            let lo = u32::from_str_radix(lo.trim(), 16).ok();
            let hi = u32::from_str_radix(hi.trim(), 16).ok();
            lo.zip(hi)
        } else if body.contains('?') {
            let lo = u32::from_str_radix(&body.replace('?', "0"), 16).ok();
            let hi = u32::from_str_radix(&body.replace('?', "F"), 16).ok();
            lo.zip(hi)
        } else {
            u32::from_str_radix(body.trim(), 16).ok().map(|v| (v, v))
        };
        if let Some((lo, hi)) = range {
            ranges.push((lo.min(hi), lo.max(hi)));
        }
    }
    ranges
}

/// Whether any used codepoint falls inside the declared ranges. Faces
/// without a declared range cover everything.
pub fn ranges_intersect_codepoints(
    unicode_range: Option<&str>,
    codepoints: &FxHashSet<u32>,
) -> bool {
    let Some(raw) = unicode_range else {
        return true;
    };
    let ranges = parse_unicode_ranges(raw);
    if ranges.is_empty() {
        return true;
    }
    codepoints
        .iter()
        .any(|cp| ranges.iter().any(|(lo, hi)| cp >= lo && cp <= hi))
}

/// Subset labels inferred from a declared unicode-range.
pub fn subsets_of_ranges(raw: &str) -> Vec<&'static str> {
    const BLOCKS: &[(&str, u32, u32)] = &[
        ("vietnamese", 0x1EA0, 0x1EF9),
        ("latin-ext", 0x0100, 0x024F),
        ("latin-ext", 0x1E00, 0x1EFF),
        ("latin", 0x0000, 0x00FF),
        ("greek", 0x0370, 0x03FF),
        ("cyrillic", 0x0400, 0x04FF),
    ];
    let ranges = parse_unicode_ranges(raw);
    let mut labels = Vec::new();
    for (label, lo, hi) in BLOCKS {
        if ranges.iter().any(|(a, b)| a <= hi && b >= lo) && !labels.contains(label) {
            labels.push(*label);
        }
    }
    labels
}

fn is_excluded(face: &FontFaceDecl, exclude: Option<&FontExclusion>) -> bool {
    let Some(exclude) = exclude else {
        return false;
    };
    if exclude
        .families
        .iter()
        .any(|f| f.eq_ignore_ascii_case(&face.family))
    {
        return true;
    }
    if !exclude.domains.is_empty() {
        for source in split_top_level_commas(&face.src) {
            if let Some(url) = extract_url(&source) {
                if exclude
                    .domains
                    .iter()
                    .any(|domain| url.contains(domain.as_str()))
                {
                    return true;
                }
            }
        }
    }
    if !exclude.subsets.is_empty() {
        if let Some(range) = &face.unicode_range {
            let labels = subsets_of_ranges(range);
            if labels
                .iter()
                .any(|label| exclude.subsets.iter().any(|s| s.eq_ignore_ascii_case(label)))
            {
                return true;
            }
        }
    }
    false
}

// ------- css value helpers -------

/// Splits on commas that are not inside parentheses or quotes.
pub fn split_top_level_commas(value: &str) -> Vec<String> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut quote: Option<char> = None;
    let mut current = String::new();
    for ch in value.chars() {
        match ch {
            '"' | '\'' => {
                if quote == Some(ch) {
                    quote = None;
                } else if quote.is_none() {
                    quote = Some(ch);
                }
                current.push(ch);
            }
            '(' if quote.is_none() => {
                depth += 1;
                current.push(ch);
            }
            ')' if quote.is_none() => {
                depth = depth.saturating_sub(1);
                current.push(ch);
            }
            ',' if depth == 0 && quote.is_none() => {
                parts.push(current.trim().to_string());
                current = String::new();
            }
            _ => current.push(ch),
        }
    }
    if !current.trim().is_empty() {
        parts.push(current.trim().to_string());
    }
    parts
}

/// The target of the first `url(...)` in a CSS value fragment.
pub fn extract_url(value: &str) -> Option<String> {
    let lower = value.to_ascii_lowercase();
    let start = lower.find("url(")?;
    let rest = &value[start + 4..];
    let end = rest.find(')')?;
    let url = rest[..end].trim().trim_matches(['"', '\'']).trim();
    (!url.is_empty()).then(|| url.to_string())
}

// ------- embedding -------

pub struct EmbedFontsParams<'a> {
    pub required: &'a [FontVariant],
    pub used_codepoints: &'a FxHashSet<u32>,
    /// Inject the result as the engine's `embedFonts` stylesheet.
    pub inject: bool,
}

/// Builds (and caches) the CSS that embeds exactly the fonts a capture
/// needs. See the staged rules in the module docs; unreadable sheets and
/// unfetchable faces degrade by dropping those faces only.
pub async fn embed_custom_fonts(
    doc: &mut Document,
    fetcher: &Fetcher,
    ctx: &CaptureContext,
    params: EmbedFontsParams<'_>,
) -> String {
    let cache_key = embed_cache_key(ctx, params.required);
    if let Some(css) = fetcher.registry().get(Bucket::Resource, &cache_key) {
        if params.inject {
            doc.set_engine_stylesheet(EMBED_FONTS_TAG, css.clone());
        }
        return css;
    }

    promote_font_imports(doc, params.required);

    // Snapshot sheet descriptors before fetching: readable text comes along,
    // the rest records an href to fetch.
    enum SheetSource {
        Text(String),
        Fetch(String),
    }
    let sources: Vec<SheetSource> = doc
        .stylesheets
        .iter()
        .filter_map(|sheet| match (&sheet.origin, &sheet.text) {
            (StylesheetOrigin::Engine { tag }, _) if tag == EMBED_FONTS_TAG => None,
            (_, Some(text)) => Some(SheetSource::Text(text.clone())),
            (StylesheetOrigin::Linked { href, .. }, None) => {
                if is_icon_url(href) {
                    return None;
                }
                looks_like_font_stylesheet(doc, href, params.required)
                    .then(|| SheetSource::Fetch(href.clone()))
            }
            _ => None,
        })
        .collect();

    let mut faces: Vec<FontFaceDecl> = Vec::new();
    for source in sources {
        let css = match source {
            SheetSource::Text(text) => text,
            SheetSource::Fetch(href) => {
                let result = fetcher
                    .snap_fetch(doc, &href, FetchOptions::text().silent())
                    .await;
                match result.data.and_then(|d| d.as_str().map(str::to_string)) {
                    Some(css) => css,
                    None => continue,
                }
            }
        };
        faces.extend(parse_font_faces(&css));
    }

    let mut css_out = String::new();
    for face in &faces {
        if is_icon_family(&face.family, ctx) {
            continue;
        }
        let family_matches = params
            .required
            .iter()
            .any(|req| req.family.eq_ignore_ascii_case(&face.family) && face.matches(req));
        if !family_matches {
            continue;
        }
        if !ranges_intersect_codepoints(face.unicode_range.as_deref(), params.used_codepoints) {
            continue;
        }
        if is_excluded(face, ctx.exclude_fonts.as_ref()) {
            continue;
        }
        if let Some(rule) = inline_face(doc, fetcher, face).await {
            css_out.push_str(&rule);
        }
    }

    // Dynamically registered faces with a declared source.
    for (_, handle, dynamic_src) in doc.fonts.iter() {
        let Some(src) = dynamic_src else { continue };
        if is_icon_family(&handle.family, ctx) {
            continue;
        }
        let face = FontFaceDecl {
            family: handle.family.clone(),
            weight: handle.weight.clone(),
            style: handle.style.clone(),
            stretch: handle.stretch.clone(),
            unicode_range: handle.unicode_range.clone(),
            src: format!("url({src})"),
        };
        let matches = params
            .required
            .iter()
            .any(|req| req.family.eq_ignore_ascii_case(&face.family) && face.matches(req));
        if !matches
            || !ranges_intersect_codepoints(face.unicode_range.as_deref(), params.used_codepoints)
            || is_excluded(&face, ctx.exclude_fonts.as_ref())
        {
            continue;
        }
        if let Some(rule) = inline_face(doc, fetcher, &face).await {
            css_out.push_str(&rule);
        }
    }

    // User-supplied faces embed unconditionally (minus icon families).
    for local in &ctx.local_fonts {
        if is_icon_family(&local.family, ctx) {
            continue;
        }
        let face = local_font_decl(local);
        if let Some(rule) = inline_face(doc, fetcher, &face).await {
            css_out.push_str(&rule);
        }
    }

    fetcher
        .registry()
        .set(Bucket::Resource, cache_key, css_out.clone());
    if params.inject {
        doc.set_engine_stylesheet(EMBED_FONTS_TAG, css_out.clone());
    }
    css_out
}

fn local_font_decl(local: &LocalFontFace) -> FontFaceDecl {
    FontFaceDecl {
        family: local.family.clone(),
        weight: local.weight.clone().unwrap_or_else(|| "normal".to_string()),
        style: local.style.clone().unwrap_or_else(|| "normal".to_string()),
        stretch: local
            .stretch_pct
            .map(|pct| format!("{pct}%"))
            .unwrap_or_else(|| "normal".to_string()),
        unicode_range: None,
        src: format!("url({})", local.src),
    }
}

fn embed_cache_key(ctx: &CaptureContext, required: &[FontVariant]) -> String {
    let mut keys: Vec<String> = required.iter().map(FontVariant::key).collect();
    keys.sort();

    let exclude = ctx
        .exclude_fonts
        .as_ref()
        .map(|ex| {
            let mut families = ex.families.clone();
            let mut domains = ex.domains.clone();
            let mut subsets = ex.subsets.clone();
            families.sort();
            domains.sort();
            subsets.sort();
            format!("{}/{}/{}", families.join(","), domains.join(","), subsets.join(","))
        })
        .unwrap_or_default();

    let mut locals: Vec<String> = ctx
        .local_fonts
        .iter()
        .map(|l| format!("{}@{}", l.family, l.src))
        .collect();
    locals.sort();

    format!(
        "fonts:{}|ex:{exclude}|local:{}|proxy:{}",
        keys.join(","),
        locals.join(","),
        ctx.use_proxy
    )
}

/// Promotes `@import url(...)` targets that look like font stylesheets into
/// linked stylesheet entries, so their `@font-face` rules are read like any
/// other sheet's.
fn promote_font_imports(doc: &mut Document, required: &[FontVariant]) {
    let mut hrefs: Vec<String> = Vec::new();
    for sheet in &doc.stylesheets {
        let Some(text) = &sheet.text else { continue };
        let lower = text.to_ascii_lowercase();
        let mut from = 0;
        while let Some(at) = lower[from..].find("@import") {
            let at = from + at;
            let line_end = text[at..].find(';').map(|i| at + i).unwrap_or(text.len());
            let stmt = &text[at..line_end];
            from = line_end;
            let Some(href) = extract_url(stmt).or_else(|| quoted_import_target(stmt)) else {
                continue;
            };
            if looks_like_font_stylesheet(doc, &href, required) && !is_icon_url(&href) {
                hrefs.push(href);
            }
        }
    }

    for href in hrefs {
        let already = doc
            .stylesheets
            .iter()
            .any(|s| s.href() == Some(href.as_str()));
        if already {
            continue;
        }
        let same_origin = doc
            .resolve_url(&href)
            .map(|url| doc.is_same_origin(&url))
            .unwrap_or(true);
        doc.stylesheets.push(StylesheetSource {
            origin: StylesheetOrigin::Linked {
                node: None,
                href,
                same_origin,
            },
            text: None,
        });
    }
}

fn quoted_import_target(stmt: &str) -> Option<String> {
    let rest = stmt.trim_start_matches("@import").trim_start();
    let quote = rest.chars().next().filter(|c| *c == '"' || *c == '\'')?;
    let inner = &rest[1..];
    let end = inner.find(quote)?;
    Some(inner[..end].to_string())
}

/// Whether a stylesheet URL is worth fetching for `@font-face` rules:
/// same-origin sheets, known font CDNs, fontish paths, or paths mentioning
/// a required family.
fn looks_like_font_stylesheet(doc: &Document, href: &str, required: &[FontVariant]) -> bool {
    let Some(url) = doc.resolve_url(href) else {
        return false;
    };
    if doc.is_same_origin(&url) {
        return true;
    }
    let host = url.host_str().unwrap_or("").to_ascii_lowercase();
    if FONT_CDN_HOSTS.iter().any(|h| host == *h) {
        return true;
    }
    let path = url.path().to_ascii_lowercase();
    if (host.contains("jsdelivr.net") || host.contains("unpkg.com") || host.contains("npmmirror.com"))
        && path.contains("katex")
    {
        return true;
    }
    if host.contains("mathjax") || path.contains("mathjax") {
        return true;
    }
    if path.contains("font") || path.contains("woff") {
        return true;
    }
    required.iter().any(|req| {
        let token = req.family.to_ascii_lowercase().replace(' ', "");
        !token.is_empty() && path.replace(['-', '_', '+'], "").contains(&token)
    })
}

fn is_icon_url(url: &str) -> bool {
    let lower = url.to_ascii_lowercase();
    ["fontawesome", "font-awesome", "icomoon", "material-icons", "glyphicons"]
        .iter()
        .any(|marker| lower.contains(marker))
}

/// Rewrites a face's `src` with every `url(...)` inlined as a data URI and
/// emits the final `@font-face` rule. A face whose every URL source fails
/// to inline is dropped (`None`).
async fn inline_face(doc: &Document, fetcher: &Fetcher, face: &FontFaceDecl) -> Option<String> {
    let mut sources = Vec::new();
    let mut inlined_any = false;
    let mut had_url_source = false;

    for source in split_top_level_commas(&face.src) {
        let lower = source.to_ascii_lowercase();
        if lower.starts_with("local(") {
            sources.push(source);
            continue;
        }
        let Some(url) = extract_url(&source) else {
            continue;
        };
        had_url_source = true;
        if url.starts_with("data:") {
            sources.push(source);
            inlined_any = true;
            continue;
        }

        let result = fetcher
            .snap_fetch(doc, &url, FetchOptions::data_url(Bucket::Resource).silent())
            .await;
        match result.payload() {
            Some(data_uri) => {
                if let Some(absolute) = doc.resolve_url(&url) {
                    fetcher.registry().mark_font(absolute.as_str());
                }
                let format = source
                    .to_ascii_lowercase()
                    .find("format(")
                    .map(|at| {
                        let rest = &source[at..];
                        let end = rest.find(')').map(|i| i + 1).unwrap_or(rest.len());
                        format!(" {}", &rest[..end])
                    })
                    .unwrap_or_default();
                sources.push(format!("url({data_uri}){format}"));
                inlined_any = true;
            }
            None => {
                tracing::warn!("dropping font source {url} for {}", face.family);
            }
        }
    }

    if had_url_source && !inlined_any {
        return None;
    }
    if sources.is_empty() {
        return None;
    }

    let mut rule = String::new();
    rule.push_str("@font-face{font-family:'");
    rule.push_str(&face.family);
    rule.push_str("';font-style:");
    rule.push_str(face.style.trim());
    rule.push_str(";font-weight:");
    rule.push_str(face.weight.trim());
    rule.push_str(";font-stretch:");
    rule.push_str(face.stretch.trim());
    if let Some(range) = &face.unicode_range {
        rule.push_str(";unicode-range:");
        rule.push_str(range.trim());
    }
    rule.push_str(";src:");
    rule.push_str(&sources.join(","));
    rule.push_str(";}");
    Some(rule)
}

// ------- icon glyph inlining -------

/// Inlines a single icon glyph as a standalone SVG data URI, sized from the
/// layout probe. Returns `(data_uri, width, height)`, or `None` when no
/// binary for the family can be found — the caller then falls back to plain
/// text content.
pub async fn icon_glyph_data_uri(
    doc: &Document,
    fetcher: &Fetcher,
    probe: &dyn LayoutProbe,
    family: &str,
    pseudo_style: &StyleMap,
    glyph: &str,
) -> Option<(String, f64, f64)> {
    let ch = glyph.chars().next()?;
    let font_size = pseudo_style
        .get_or("font-size", "16px")
        .trim_end_matches("px")
        .parse::<f64>()
        .unwrap_or(16.0);
    let font = TextProbe {
        font_family: family,
        font_size,
        line_height: font_size,
    };
    let glyph_box = probe.glyph_box(ch, &font);
    let width = glyph_box.width.max(1.0);
    let height = glyph_box.height.max(1.0);

    // Find a binary for the family: a declared @font-face, or a dynamic
    // registry entry.
    let mut source_url = None;
    for sheet in &doc.stylesheets {
        let Some(text) = &sheet.text else { continue };
        for face in parse_font_faces(text) {
            if face.family.eq_ignore_ascii_case(family) {
                if let Some(url) = split_top_level_commas(&face.src)
                    .iter()
                    .find_map(|s| extract_url(s))
                {
                    source_url = Some(url);
                    break;
                }
            }
        }
        if source_url.is_some() {
            break;
        }
    }
    if source_url.is_none() {
        source_url = doc
            .fonts
            .iter()
            .filter(|(_, handle, _)| handle.family.eq_ignore_ascii_case(family))
            .find_map(|(_, _, src)| src.map(str::to_string));
    }
    let source_url = source_url?;

    let font_data_uri = if source_url.starts_with("data:") {
        source_url
    } else {
        let result = fetcher
            .snap_fetch(doc, &source_url, FetchOptions::data_url(Bucket::Resource).silent())
            .await;
        result.payload()?.to_string()
    };

    let baseline = (height * 0.8).round();
    let svg = format!(
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{width}\" height=\"{height}\" \
         viewBox=\"0 0 {width} {height}\"><style>@font-face{{font-family:'{family}';\
         src:url({font_data_uri});}}</style><text x=\"0\" y=\"{baseline}\" \
         font-family=\"'{family}'\" font-size=\"{font_size}\">{}</text></svg>",
        html_escape::encode_text(glyph),
    );
    let data_uri = format!(
        "data:image/svg+xml;charset=utf-8,{}",
        utf8_percent_encode(&svg, COMPONENT)
    );
    Some((data_uri, width, height))
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapdom_dom::document::DocumentConfig;

    #[test]
    fn weight_and_stretch_normalization() {
        assert_eq!(normalize_weight("normal"), 400);
        assert_eq!(normalize_weight("bold"), 700);
        assert_eq!(normalize_weight("850"), 850);
        assert_eq!(normalize_weight("1000"), 900);
        assert_eq!(normalize_stretch("condensed"), 75.0);
        assert_eq!(normalize_stretch("130%"), 130.0);
        assert_eq!(normalize_stretch("500%"), 200.0);
    }

    #[test]
    fn variant_keys() {
        let variant = FontVariant {
            family: "Fam".to_string(),
            weight: 400,
            style: VariantStyle::Normal,
            stretch_pct: 100.0,
        };
        assert_eq!(variant.key(), "Fam__400__normal__100");
    }

    #[test]
    fn primary_family_skips_generics() {
        assert_eq!(
            primary_family("\"Inter\", sans-serif").as_deref(),
            Some("Inter")
        );
        assert_eq!(primary_family("sans-serif"), None);
        assert_eq!(primary_family("ui-rounded, serif"), None);
        assert_eq!(
            primary_family("system-ui, 'Segoe UI', serif").as_deref(),
            Some("Segoe UI")
        );
    }

    #[test]
    fn parses_font_faces_with_ranges() {
        let css = r#"
            body { color: red; }
            @font-face {
                font-family: "Fam";
                src: url(https://cdn/f.woff2) format("woff2");
                font-weight: 100 900;
                unicode-range: U+0400-04FF;
            }
        "#;
        let faces = parse_font_faces(css);
        assert_eq!(faces.len(), 1);
        assert_eq!(faces[0].family, "Fam");
        assert_eq!(faces[0].weight, "100 900");
        assert_eq!(faces[0].unicode_range.as_deref(), Some("U+0400-04FF"));
    }

    #[test]
    fn face_matching_rules() {
        let face = FontFaceDecl {
            family: "Fam".to_string(),
            weight: "100 900".to_string(),
            style: "normal".to_string(),
            stretch: "normal".to_string(),
            unicode_range: None,
            src: "url(x)".to_string(),
        };
        let normal_400 = FontVariant {
            family: "Fam".to_string(),
            weight: 400,
            style: VariantStyle::Normal,
            stretch_pct: 100.0,
        };
        assert!(face.matches(&normal_400));

        let italic = FontVariant {
            style: VariantStyle::Italic,
            ..normal_400.clone()
        };
        assert!(!face.matches(&italic));

        // Oblique faces serve italic requirements.
        let oblique_face = FontFaceDecl {
            style: "oblique 10deg".to_string(),
            ..face.clone()
        };
        assert!(oblique_face.matches(&italic));

        // Single-weight fallback within ±300.
        let bold_face = FontFaceDecl {
            weight: "700".to_string(),
            ..face.clone()
        };
        assert!(bold_face.matches(&normal_400));
        let thin = FontVariant {
            weight: 100,
            ..normal_400.clone()
        };
        assert!(!bold_face.matches(&thin));
    }

    #[test]
    fn unicode_range_parsing_and_subsets() {
        assert_eq!(parse_unicode_ranges("U+41"), vec![(0x41, 0x41)]);
        assert_eq!(parse_unicode_ranges("U+0-FF"), vec![(0, 0xFF)]);
        assert_eq!(parse_unicode_ranges("U+26??"), vec![(0x2600, 0x26FF)]);

        let mut used = FxHashSet::default();
        used.insert(0x41u32);
        assert!(ranges_intersect_codepoints(Some("U+0-FF"), &used));
        assert!(!ranges_intersect_codepoints(Some("U+0400-04FF"), &used));
        assert!(ranges_intersect_codepoints(None, &used));

        assert_eq!(subsets_of_ranges("U+0400-04FF"), vec!["cyrillic"]);
        assert_eq!(subsets_of_ranges("U+0000-00FF"), vec!["latin"]);
        assert_eq!(subsets_of_ranges("U+1EA0-1EF9"), vec!["vietnamese", "latin-ext"]);
    }

    #[test]
    fn splits_src_lists() {
        let parts = split_top_level_commas(
            "local(\"A, B\"), url(f.woff2) format(\"woff2\"), url(f.ttf)",
        );
        assert_eq!(parts.len(), 3);
        assert_eq!(extract_url(&parts[1]).as_deref(), Some("f.woff2"));
        assert_eq!(extract_url(&parts[0]), None);
    }

    #[test]
    fn collects_variants_and_codepoints() {
        use snapdom_dom::{PseudoKind, StyleMap};
        let mut doc = Document::new(DocumentConfig::default());
        let div = doc.create_element("div", &[]);
        let text = doc.create_text_node("Hi");
        doc.append_child(0, div);
        doc.append_child(div, text);
        doc.set_styles(
            div,
            StyleMap::from_inline_css("font-family: 'Fam', serif; font-weight: bold"),
        );
        doc.set_pseudo_styles(
            div,
            PseudoKind::Before,
            StyleMap::from_inline_css("content: \"\\2605\"; font-family: Other"),
        );

        let variants = collect_used_font_variants(&doc, div);
        let keys: Vec<_> = variants.iter().map(FontVariant::key).collect();
        assert!(keys.contains(&"Fam__700__normal__100".to_string()));
        assert!(keys.contains(&"Other__400__normal__100".to_string()));

        let codepoints = collect_used_codepoints(&doc, div);
        assert!(codepoints.contains(&('H' as u32)));
        assert!(codepoints.contains(&0x2605));
    }
}
