use serde::{Deserialize, Serialize};
use std::borrow::Cow;
use std::fmt;
use uuid::Uuid;

/// Opaque, stable identifier of a node in the state tree.
///
/// Refs are allocated independently of any tree, so a transaction can reserve the
/// ref of a node it adds and address that node in later edits of the same batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Ref(Uuid);

impl Ref {
    /// The ref of the tree root. It is the same in every tree.
    pub const ROOT: Ref = Ref(Uuid::nil());

    /// Allocates a fresh, globally unique ref.
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }

    pub fn is_root(&self) -> bool {
        self.0.is_nil()
    }

    pub fn as_uuid(&self) -> &Uuid {
        &self.0
    }
}

impl Default for Ref {
    fn default() -> Self {
        Self::new()
    }
}

impl From<Uuid> for Ref {
    fn from(id: Uuid) -> Self {
        Self(id)
    }
}

impl fmt::Display for Ref {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.is_root() {
            return f.write_str("root");
        }
        // The first group is unique enough for logs and tree views.
        let simple = self.0.simple().to_string();
        f.write_str(&simple[..8])
    }
}

/// Identifier under which a transformer is registered.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TransformerId(Cow<'static, str>);

impl TransformerId {
    pub const fn from_static(id: &'static str) -> Self {
        Self(Cow::Borrowed(id))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&'static str> for TransformerId {
    fn from(id: &'static str) -> Self {
        Self::from_static(id)
    }
}

impl From<String> for TransformerId {
    fn from(id: String) -> Self {
        Self(Cow::Owned(id))
    }
}

impl fmt::Display for TransformerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
