//! Operation model: one atomic change to a text buffer.
//!
//! An operation is a left-to-right walk over the base text:
//! ```text
//!   "hello world"
//!    retain(5) │ delete(6) │ insert("!")   ──►  "hello!"
//! ```
//!
//! Operations are kept in canonical form by the builder so that two
//! operations with the same effect compare equal.

use serde::{Deserialize, Serialize};

use crate::error::OtError;

/// A single primitive step of an [`Operation`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Component {
    /// Skip `n` chars unchanged.
    Retain(usize),
    /// Insert literal text at the current position.
    Insert(String),
    /// Remove `n` chars.
    Delete(usize),
}

impl Component {
    /// Length in chars.
    pub fn len(&self) -> usize {
        match self {
            Component::Retain(n) | Component::Delete(n) => *n,
            Component::Insert(s) => s.chars().count(),
        }
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_insert(&self) -> bool {
        matches!(self, Component::Insert(_))
    }
}

/// An ordered sequence of components.
///
/// Invariant: `base_len` equals the sum of retained and deleted chars,
/// `target_len` the sum of retained and inserted chars.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(from = "Vec<Component>", into = "Vec<Component>")]
pub struct Operation {
    components: Vec<Component>,
    base_len: usize,
    target_len: usize,
}

impl Operation {
    pub fn new() -> Self {
        Self::default()
    }

    /// Build from raw components, canonicalising on the way in.
    pub fn from_components(components: impl IntoIterator<Item = Component>) -> Self {
        let mut op = Self::new();
        for c in components {
            op.push(c);
        }
        op
    }

    pub fn retain(mut self, n: usize) -> Self {
        self.push(Component::Retain(n));
        self
    }

    pub fn insert(mut self, text: impl Into<String>) -> Self {
        self.push(Component::Insert(text.into()));
        self
    }

    pub fn delete(mut self, n: usize) -> Self {
        self.push(Component::Delete(n));
        self
    }

    /// Append a component.
    ///
    /// Zero-length components are dropped, neighbours of the same kind
    /// merge, and an insert that follows a delete is moved in front of it.
    pub fn push(&mut self, component: Component) {
        if component.is_empty() {
            return;
        }
        match component {
            Component::Retain(n) => {
                self.base_len += n;
                self.target_len += n;
                if let Some(Component::Retain(last)) = self.components.last_mut() {
                    *last += n;
                } else {
                    self.components.push(Component::Retain(n));
                }
            }
            Component::Delete(n) => {
                self.base_len += n;
                if let Some(Component::Delete(last)) = self.components.last_mut() {
                    *last += n;
                } else {
                    self.components.push(Component::Delete(n));
                }
            }
            Component::Insert(text) => {
                self.target_len += text.chars().count();
                let len = self.components.len();
                let last_is_delete = matches!(self.components.last(), Some(Component::Delete(_)));
                if last_is_delete {
                    if len >= 2 {
                        if let Component::Insert(prev) = &mut self.components[len - 2] {
                            prev.push_str(&text);
                            return;
                        }
                    }
                    self.components.insert(len - 1, Component::Insert(text));
                } else if let Some(Component::Insert(last)) = self.components.last_mut() {
                    last.push_str(&text);
                } else {
                    self.components.push(Component::Insert(text));
                }
            }
        }
    }

    pub fn components(&self) -> &[Component] {
        &self.components
    }

    /// Length of the text this operation applies to.
    pub fn base_len(&self) -> usize {
        self.base_len
    }

    /// Length of the text this operation produces.
    pub fn target_len(&self) -> usize {
        self.target_len
    }

    /// True when applying the operation leaves the text unchanged.
    pub fn is_noop(&self) -> bool {
        self.components
            .iter()
            .all(|c| matches!(c, Component::Retain(_)))
    }

    /// Apply to `text`, producing the edited text.
    ///
    /// Fails without touching anything if the operation does not span
    /// exactly `text`.
    pub fn apply(&self, text: &str) -> Result<String, OtError> {
        let actual = text.chars().count();
        if actual != self.base_len {
            return Err(OtError::LengthMismatch {
                expected: self.base_len,
                actual,
            });
        }

        let mut out = String::with_capacity(text.len());
        let mut chars = text.chars();
        for component in &self.components {
            match component {
                Component::Retain(n) => out.extend(chars.by_ref().take(*n)),
                Component::Insert(s) => out.push_str(s),
                Component::Delete(n) => {
                    for _ in chars.by_ref().take(*n) {}
                }
            }
        }
        Ok(out)
    }

    /// Map a char offset in the base text to the equivalent offset after
    /// this operation.
    ///
    /// Inserts at or before the offset push it forward; an offset inside a
    /// deleted range collapses to the start of the range; an offset past a
    /// deleted range moves back by its length.
    pub fn transform_position(&self, position: usize) -> usize {
        let mut index = 0usize;
        let mut shifted = position;
        for component in &self.components {
            if index > position {
                break;
            }
            match component {
                Component::Retain(n) => index += n,
                Component::Insert(s) => {
                    shifted += s.chars().count();
                }
                Component::Delete(n) => {
                    if position >= index + n {
                        shifted -= n;
                    } else if position > index {
                        shifted -= position - index;
                    }
                    index += n;
                }
            }
        }
        shifted
    }

    /// Serialise to the JSON form used at the editor boundary.
    pub fn to_json(&self) -> Result<String, OtError> {
        Ok(serde_json::to_string(self)?)
    }

    /// Parse the JSON form used at the editor boundary.
    pub fn from_json(json: &str) -> Result<Self, OtError> {
        Ok(serde_json::from_str(json)?)
    }
}

impl From<Vec<Component>> for Operation {
    fn from(components: Vec<Component>) -> Self {
        Self::from_components(components)
    }
}

impl From<Operation> for Vec<Component> {
    fn from(op: Operation) -> Self {
        op.components
    }
}
