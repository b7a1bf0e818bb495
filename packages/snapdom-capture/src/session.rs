//! Per-capture scratch state.
//!
//! Created at the start of a capture and discarded at the end; never shared
//! between captures. Everything keyed by node id here refers to the arena of
//! the document being captured.

use std::sync::Arc;

use rustc_hash::FxHashMap;
use snapdom_dom::StyleMap;

use crate::counters::CounterContext;

#[derive(Default)]
pub struct Session {
    /// Clone element id → style key.
    pub style_map: FxHashMap<usize, String>,
    /// Source element id → style snapshot (memoized).
    pub style_cache: FxHashMap<usize, Arc<StyleMap>>,
    /// Clone element id → source element id.
    pub node_map: FxHashMap<usize, usize>,
    /// Monotonic counter for shadow scope ids (`s1`, `s2`, ...).
    pub shadow_scope_seq: usize,
    /// Scoped CSS blocks pulled out of shadow mirrors, in encounter order.
    pub shadow_css_blocks: Vec<String>,
    /// Reusable classes referenced by this capture: (class, declarations).
    pub used_classes: Vec<(String, String)>,
    /// Source parent id → counter-name → value continuation carried between
    /// sibling pseudos.
    pub sibling_counters: FxHashMap<usize, FxHashMap<String, i32>>,
    /// Per-document counter resolver, built on first pseudo pass.
    pub counter_ctx: Option<CounterContext>,
    /// Bumped whenever the counter context is rebuilt.
    pub counter_epoch: u64,
    /// Memoized pseudo preflight: (style-landscape fingerprint, decision).
    pub preflight: Option<(u64, bool)>,
}

impl Session {
    pub fn new() -> Self {
        Self::default()
    }

    /// Records a reusable class for the final CSS unless already present.
    pub fn note_class(&mut self, class: &str, declarations: &str) {
        if !self.used_classes.iter().any(|(c, _)| c == class) {
            self.used_classes
                .push((class.to_string(), declarations.to_string()));
        }
    }

    /// The generated reusable-class CSS for everything this capture used.
    pub fn class_css(&self) -> String {
        let mut css = String::new();
        for (class, declarations) in &self.used_classes {
            if declarations.is_empty() {
                continue;
            }
            css.push('.');
            css.push_str(class);
            css.push('{');
            css.push_str(declarations);
            css.push('}');
        }
        css
    }
}
