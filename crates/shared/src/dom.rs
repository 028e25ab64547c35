//! The UI surface commands act on, plus a label index for resolving
//! natural-language phrases to controls.

use anyhow::Result;
use std::collections::BTreeSet;

/// Opaque reference to a control, usually its element id.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ElementHandle(pub String);

pub trait DomSurface: Send + Sync {
    /// Resolve a phrase like "send button" to a control.
    fn find_element(&self, phrase: &str) -> Option<ElementHandle>;

    fn click(&self, element: &ElementHandle) -> Result<()>;

    /// Returns `false` when the element does not hold a value.
    fn set_value(&self, element: &ElementHandle, value: &str) -> Result<bool>;

    /// Pick the option of a select whose label contains `phrase`
    /// (case-insensitive) and return that label.
    fn select_option(&self, element: &ElementHandle, phrase: &str) -> Result<Option<String>> {
        Ok(self.set_value(element, phrase)?.then(|| phrase.to_string()))
    }

    fn screensaver_active(&self) -> bool {
        false
    }
}

pub fn normalize_phrase(phrase: &str) -> String {
    phrase.trim().to_lowercase()
}

/// Label plus its singular/plural twin.
fn label_variants(label: &str) -> Vec<String> {
    let mut out = vec![label.to_string()];
    match label.strip_suffix('s') {
        Some(singular) => out.push(singular.to_string()),
        None => out.push(format!("{label}s")),
    }
    out
}

#[derive(Debug, Clone)]
struct IndexedElement {
    id: String,
    labels: Vec<String>,
    variants: BTreeSet<String>,
}

/// Phrase lookup over a flat list of controls.
///
/// Resolution order: element id (spaces as dashes), exact label or its
/// singular/plural variant, the singular of a plural phrase, then any label
/// containing the phrase or contained in it.
#[derive(Debug, Clone, Default)]
pub struct ElementIndex {
    elements: Vec<IndexedElement>,
}

impl ElementIndex {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a control. The id is indexed as a label with `-`/`_` read as spaces.
    pub fn insert<I, S>(&mut self, id: impl Into<String>, labels: I)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let id = id.into();
        let mut normalized: Vec<String> = vec![normalize_phrase(&id.replace(['-', '_'], " "))];
        normalized.extend(labels.into_iter().map(|l| normalize_phrase(l.as_ref())));
        normalized.retain(|l| !l.is_empty());

        let variants = normalized.iter().flat_map(|l| label_variants(l)).collect();
        self.elements.push(IndexedElement {
            id,
            labels: normalized,
            variants,
        });
    }

    pub fn with<I, S>(mut self, id: impl Into<String>, labels: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        self.insert(id, labels);
        self
    }

    fn exact(&self, norm: &str) -> Option<ElementHandle> {
        let id = norm.split_whitespace().collect::<Vec<_>>().join("-");
        self.elements
            .iter()
            .find(|e| e.id.to_lowercase() == id || e.variants.contains(norm))
            .map(|e| ElementHandle(e.id.clone()))
    }

    pub fn find(&self, phrase: &str) -> Option<ElementHandle> {
        let norm = normalize_phrase(phrase);
        if norm.is_empty() {
            return None;
        }
        if let Some(found) = self.exact(&norm) {
            return Some(found);
        }
        if let Some(singular) = norm.strip_suffix('s') {
            if let Some(found) = self.exact(singular) {
                return Some(found);
            }
        }
        self.elements
            .iter()
            .find(|e| {
                e.labels
                    .iter()
                    .any(|l| l.contains(norm.as_str()) || norm.contains(l.as_str()))
            })
            .map(|e| ElementHandle(e.id.clone()))
    }
}
