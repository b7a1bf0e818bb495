//! The `document.fonts` analog: font faces the host knows about beyond what
//! `@font-face` rules in stylesheets declare — dynamically constructed
//! faces, with an explicit side channel recording the URL their binary was
//! loaded from (so the capture engine can re-fetch and inline it).

use rustc_hash::FxHashMap;

/// Handle to a registered face.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FaceId(usize);

/// A font face as the host sees it: raw descriptor strings, exactly as a
/// `FontFace` object would report them. Normalization (weight keywords,
/// stretch percentages) happens in the capture engine's font matcher.
#[derive(Clone, Debug)]
pub struct FontFaceHandle {
    pub family: String,
    /// e.g. `"400"`, `"bold"`, `"100 900"`
    pub weight: String,
    /// e.g. `"normal"`, `"italic"`, `"oblique 10deg"`
    pub style: String,
    /// e.g. `"100%"`, `"75% 125%"`
    pub stretch: String,
    /// e.g. `"U+0000-00FF, U+2605"`
    pub unicode_range: Option<String>,
}

impl FontFaceHandle {
    pub fn new(family: impl Into<String>) -> Self {
        Self {
            family: family.into(),
            weight: "normal".to_string(),
            style: "normal".to_string(),
            stretch: "normal".to_string(),
            unicode_range: None,
        }
    }

    pub fn with_weight(mut self, weight: impl Into<String>) -> Self {
        self.weight = weight.into();
        self
    }

    pub fn with_style(mut self, style: impl Into<String>) -> Self {
        self.style = style.into();
        self
    }

    pub fn with_stretch(mut self, stretch: impl Into<String>) -> Self {
        self.stretch = stretch.into();
        self
    }

    pub fn with_unicode_range(mut self, range: impl Into<String>) -> Self {
        self.unicode_range = Some(range.into());
        self
    }
}

/// Registry of dynamically added faces. The dynamic-source table replaces
/// the original's private-property convention on `FontFace` objects: an
/// explicit mapping from face handle to the URL of its binary payload.
#[derive(Default)]
pub struct FontRegistry {
    faces: Vec<FontFaceHandle>,
    dynamic_sources: FxHashMap<usize, String>,
}

impl FontRegistry {
    pub fn add_face(&mut self, face: FontFaceHandle) -> FaceId {
        self.faces.push(face);
        FaceId(self.faces.len() - 1)
    }

    /// Declares where the binary for a registered face can be fetched from.
    pub fn set_dynamic_source(&mut self, id: FaceId, url: impl Into<String>) {
        self.dynamic_sources.insert(id.0, url.into());
    }

    pub fn get(&self, id: FaceId) -> Option<&FontFaceHandle> {
        self.faces.get(id.0)
    }

    pub fn dynamic_source(&self, id: FaceId) -> Option<&str> {
        self.dynamic_sources.get(&id.0).map(String::as_str)
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Faces together with their dynamic source (if declared), in
    /// registration order.
    pub fn iter(&self) -> impl Iterator<Item = (FaceId, &FontFaceHandle, Option<&str>)> {
        self.faces.iter().enumerate().map(|(i, face)| {
            (
                FaceId(i),
                face,
                self.dynamic_sources.get(&i).map(String::as_str),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dynamic_source_side_channel() {
        let mut registry = FontRegistry::default();
        let id = registry.add_face(
            FontFaceHandle::new("DynaSans")
                .with_weight("700")
                .with_unicode_range("U+0000-00FF"),
        );
        registry.set_dynamic_source(id, "https://cdn.example/dyna.woff2");

        let (_, face, src) = registry.iter().next().unwrap();
        assert_eq!(face.family, "DynaSans");
        assert_eq!(src, Some("https://cdn.example/dyna.woff2"));
        assert_eq!(registry.dynamic_source(id), src);
    }
}
