//! CSS counter resolution.
//!
//! One walk over the source document builds, for every element, the counter
//! stacks in effect at that element (after its own `counter-reset` /
//! `counter-increment` apply). `counter()` and `counters()` in pseudo
//! content then resolve against those snapshots, with sibling-carried
//! pseudo increments layered on top by the pseudo resolver.

use rustc_hash::FxHashMap;
use snapdom_dom::{Document, local_name};

/// Counter-name → stack of values, innermost scope last.
pub type CounterState = FxHashMap<String, Vec<i32>>;

/// Per-element counter snapshots for one document walk.
#[derive(Default)]
pub struct CounterContext {
    states: FxHashMap<usize, CounterState>,
}

impl CounterContext {
    /// Builds the context with a single walk from the document root.
    pub fn build(doc: &Document) -> Self {
        let mut ctx = CounterContext::default();
        let mut state = CounterState::default();
        walk(doc, 0, &mut state, &mut ctx);
        ctx
    }

    /// The counter state at `node_id` (empty if the walk never saw it).
    pub fn state_at(&self, node_id: usize) -> CounterState {
        self.states.get(&node_id).cloned().unwrap_or_default()
    }

    /// `counter(name)` at a node: top of the stack, or 0.
    pub fn value_at(&self, node_id: usize, name: &str) -> i32 {
        self.states
            .get(&node_id)
            .and_then(|state| state.get(name))
            .and_then(|stack| stack.last().copied())
            .unwrap_or(0)
    }
}

fn walk(doc: &Document, node_id: usize, state: &mut CounterState, ctx: &mut CounterContext) {
    let Some(node) = doc.get_node(node_id) else {
        return;
    };

    let mut scopes_opened: Vec<String> = Vec::new();

    if node.is_element() {
        let style = node.styles.primary.as_deref();

        if let Some(resets) = style.and_then(|s| s.get("counter-reset")) {
            for (name, value) in parse_counter_pairs(resets, 0) {
                state.entry(name.clone()).or_default().push(value);
                scopes_opened.push(name);
            }
        }

        if let Some(increments) = style.and_then(|s| s.get("counter-increment")) {
            for (name, by) in parse_counter_pairs(increments, 1) {
                let stack = state.entry(name).or_default();
                if stack.is_empty() {
                    stack.push(0);
                }
                if let Some(top) = stack.last_mut() {
                    *top += by;
                }
            }
        }

        // display: list-item carries the implicit list-item counter.
        let is_list_item = node.data.is_element_with_tag_name(&local_name!("li"))
            || style.and_then(|s| s.get("display")) == Some("list-item");
        if is_list_item {
            let index = list_item_index(doc, node_id);
            let stack = state.entry("list-item".to_string()).or_default();
            if stack.is_empty() {
                stack.push(index);
            } else if let Some(top) = stack.last_mut() {
                *top = index;
            }
        }

        ctx.states.insert(node_id, state.clone());
    }

    for child in &node.children {
        walk(doc, *child, state, ctx);
    }

    // Close the scopes this element's resets opened; increments made inside
    // them stay invisible to following siblings, increments on still-open
    // scopes carry forward.
    for name in scopes_opened {
        if let Some(stack) = state.get_mut(&name) {
            stack.pop();
            if stack.is_empty() {
                state.remove(&name);
            }
        }
    }
}

/// Index a `<li>` renders as: an explicit `value` attribute wins, otherwise
/// the parent `<ol>`'s `start` (default 1) plus the number of preceding
/// `<li>` siblings.
fn list_item_index(doc: &Document, node_id: usize) -> i32 {
    let Some(node) = doc.get_node(node_id) else {
        return 1;
    };
    if let Some(value) = node
        .element_data()
        .and_then(|el| el.attr_parsed::<i32>(local_name!("value")))
    {
        return value;
    }

    let Some(parent_id) = node.parent else {
        return 1;
    };
    let Some(parent) = doc.get_node(parent_id) else {
        return 1;
    };

    let start = if parent.data.is_element_with_tag_name(&local_name!("ol")) {
        parent
            .element_data()
            .and_then(|el| el.attr_parsed::<i32>(local_name!("start")))
            .unwrap_or(1)
    } else {
        1
    };

    let preceding = parent
        .children
        .iter()
        .take_while(|id| **id != node_id)
        .filter(|id| {
            doc.get_node(**id)
                .is_some_and(|n| n.data.is_element_with_tag_name(&local_name!("li")))
        })
        .count();

    start + preceding as i32
}

/// Parses `counter-reset` / `counter-increment` value lists:
/// `name [int] name [int] ...`. `none` yields nothing.
pub fn parse_counter_pairs(value: &str, default: i32) -> Vec<(String, i32)> {
    let mut pairs = Vec::new();
    let mut tokens = value.split_ascii_whitespace().peekable();
    while let Some(token) = tokens.next() {
        if token.eq_ignore_ascii_case("none") {
            continue;
        }
        let by = tokens
            .peek()
            .and_then(|next| next.parse::<i32>().ok())
            .map(|by| {
                tokens.next();
                by
            })
            .unwrap_or(default);
        pairs.push((token.to_string(), by));
    }
    pairs
}

/// Applies a pseudo's own `counter-reset`/`counter-increment` on top of an
/// element-level state.
pub fn apply_counter_declarations(state: &mut CounterState, resets: Option<&str>, increments: Option<&str>) {
    if let Some(resets) = resets {
        for (name, value) in parse_counter_pairs(resets, 0) {
            let stack = state.entry(name).or_default();
            stack.push(value);
        }
    }
    if let Some(increments) = increments {
        for (name, by) in parse_counter_pairs(increments, 1) {
            let stack = state.entry(name).or_default();
            if stack.is_empty() {
                stack.push(0);
            }
            if let Some(top) = stack.last_mut() {
                *top += by;
            }
        }
    }
}

/// Formats a counter value in one of the supported list styles.
pub fn format_counter(value: i32, style: &str) -> String {
    match style {
        "decimal-leading-zero" => {
            if (0..10).contains(&value) {
                format!("0{value}")
            } else {
                value.to_string()
            }
        }
        "lower-alpha" | "lower-latin" => alpha(value, false),
        "upper-alpha" | "upper-latin" => alpha(value, true),
        "lower-roman" => roman(value, false),
        "upper-roman" => roman(value, true),
        _ => value.to_string(),
    }
}

/// Formats a whole stack for `counters(name, sep, style)`.
pub fn format_counters(stack: &[i32], separator: &str, style: &str) -> String {
    if stack.is_empty() {
        return format_counter(0, style);
    }
    stack
        .iter()
        .map(|value| format_counter(*value, style))
        .collect::<Vec<_>>()
        .join(separator)
}

fn alpha(value: i32, upper: bool) -> String {
    if value < 1 {
        return value.to_string();
    }
    let mut n = value as u32;
    let base = if upper { b'A' } else { b'a' };
    let mut out: Vec<char> = Vec::new();
    while n > 0 {
        n -= 1;
        out.push((base + (n % 26) as u8) as char);
        n /= 26;
    }
    out.iter().rev().collect()
}

fn roman(value: i32, upper: bool) -> String {
    // Roman numerals are defined for 1..=3999; everything else falls back
    // to decimal.
    if !(1..=3999).contains(&value) {
        return value.to_string();
    }
    const TABLE: &[(i32, &str)] = &[
        (1000, "m"),
        (900, "cm"),
        (500, "d"),
        (400, "cd"),
        (100, "c"),
        (90, "xc"),
        (50, "l"),
        (40, "xl"),
        (10, "x"),
        (9, "ix"),
        (5, "v"),
        (4, "iv"),
        (1, "i"),
    ];
    let mut out = String::new();
    let mut n = value;
    for (magnitude, digits) in TABLE {
        while n >= *magnitude {
            out.push_str(digits);
            n -= magnitude;
        }
    }
    if upper { out.to_ascii_uppercase() } else { out }
}

#[cfg(test)]
mod tests {
    use super::*;
    use snapdom_dom::StyleMap;
    use snapdom_dom::document::DocumentConfig;

    #[test]
    fn formats() {
        assert_eq!(format_counter(7, "decimal"), "7");
        assert_eq!(format_counter(7, "decimal-leading-zero"), "07");
        assert_eq!(format_counter(42, "decimal-leading-zero"), "42");
        assert_eq!(format_counter(1, "lower-alpha"), "a");
        assert_eq!(format_counter(27, "lower-alpha"), "aa");
        assert_eq!(format_counter(3, "upper-alpha"), "C");
        assert_eq!(format_counter(1994, "lower-roman"), "mcmxciv");
        assert_eq!(format_counter(4, "upper-roman"), "IV");
        assert_eq!(format_counter(4000, "upper-roman"), "4000");
    }

    #[test]
    fn parse_pairs() {
        assert_eq!(
            parse_counter_pairs("section 2 item", 0),
            vec![("section".to_string(), 2), ("item".to_string(), 0)]
        );
        assert_eq!(parse_counter_pairs("none", 1), vec![]);
    }

    fn styled(doc: &mut Document, tag: &str, css: &str) -> usize {
        let id = doc.create_element(tag, &[]);
        doc.set_styles(id, StyleMap::from_inline_css(css));
        id
    }

    #[test]
    fn increments_carry_across_siblings() {
        let mut doc = Document::new(DocumentConfig::default());
        let list = styled(&mut doc, "div", "counter-reset: n");
        let a = styled(&mut doc, "span", "counter-increment: n");
        let b = styled(&mut doc, "span", "counter-increment: n");
        let c = styled(&mut doc, "span", "counter-increment: n 10");
        doc.append_child(0, list);
        for id in [a, b, c] {
            doc.append_child(list, id);
        }

        let ctx = CounterContext::build(&doc);
        assert_eq!(ctx.value_at(a, "n"), 1);
        assert_eq!(ctx.value_at(b, "n"), 2);
        assert_eq!(ctx.value_at(c, "n"), 12);
    }

    #[test]
    fn nested_resets_scope_to_their_subtree() {
        let mut doc = Document::new(DocumentConfig::default());
        let outer = styled(&mut doc, "div", "counter-reset: n 5");
        let inner = styled(&mut doc, "div", "counter-reset: n");
        let deep = styled(&mut doc, "span", "counter-increment: n");
        let after = styled(&mut doc, "span", "counter-increment: n");
        doc.append_child(0, outer);
        doc.append_child(outer, inner);
        doc.append_child(inner, deep);
        doc.append_child(outer, after);

        let ctx = CounterContext::build(&doc);
        // Inside the nested scope the counter restarts.
        assert_eq!(ctx.value_at(deep, "n"), 1);
        // After the nested scope closes the outer value is visible again.
        assert_eq!(ctx.value_at(after, "n"), 6);
        // And counters() sees both levels at the deep node.
        let state = ctx.state_at(deep);
        assert_eq!(state.get("n").unwrap(), &vec![5, 1]);
    }

    #[test]
    fn list_items_honor_start_and_value() {
        let mut doc = Document::new(DocumentConfig::default());
        let ol = doc.create_element("ol", &[("start", "5")]);
        let li1 = doc.create_element("li", &[]);
        let li2 = doc.create_element("li", &[]);
        let li3 = doc.create_element("li", &[("value", "40")]);
        doc.append_child(0, ol);
        for id in [li1, li2, li3] {
            doc.append_child(ol, id);
        }

        let ctx = CounterContext::build(&doc);
        assert_eq!(ctx.value_at(li1, "list-item"), 5);
        assert_eq!(ctx.value_at(li2, "list-item"), 6);
        assert_eq!(ctx.value_at(li3, "list-item"), 40);
    }
}
