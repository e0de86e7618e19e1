// SPDX-License-Identifier: Apache-2.0
// © James Ross Ω FLYING•ROBOTS <https://github.com/flyingrobots>
//! Identifier types for nodes, components, and sibling keys.
use blake3::Hasher;
use serde::{Deserialize, Serialize};

/// Canonical 256-bit hash used for component identities and tree digests.
pub type Hash = [u8; 32];

/// Engine-allocated handle for a node in the committed tree.
///
/// Ids are issued monotonically by the engine. An id that reached a commit is
/// never reissued by the same engine instance; ids allocated by a render that
/// was discarded are handed out again by the next render. [`NodeId::ROOT`] is the container node that exists from
/// construction and corresponds to the host renderer's container.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug, Serialize, Deserialize)]
pub struct NodeId(u64);

impl NodeId {
    /// The root container node.
    pub const ROOT: Self = Self(0);

    /// Constructs a `NodeId` from a raw value.
    ///
    /// Useful for host adapters that round-trip ids through foreign storage;
    /// engine operations reject ids that do not name a committed node.
    #[must_use]
    pub const fn from_raw(value: u64) -> Self {
        Self(value)
    }

    /// Returns the underlying raw value.
    #[must_use]
    pub const fn value(self) -> u64 {
        self.0
    }

    /// Returns true for [`NodeId::ROOT`].
    #[must_use]
    pub const fn is_root(self) -> bool {
        self.0 == 0
    }
}

impl core::fmt::Display for NodeId {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Strongly typed identifier for a registered component.
///
/// Produced by [`make_component_id`], which hashes the component name; the
/// engine hands it out from [`crate::Engine::register_component`] and
/// declarations reference components only through it.
#[repr(transparent)]
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub struct ComponentId(pub Hash);

impl ComponentId {
    /// Returns the canonical byte representation of this id.
    #[must_use]
    pub fn as_bytes(&self) -> &Hash {
        &self.0
    }

    /// Short hex prefix for logs.
    #[must_use]
    pub fn short(&self) -> String {
        hex::encode(&self.0[..4])
    }
}

/// Derives a [`ComponentId`] from a component name (`blake3("component:" || name)`).
#[must_use]
pub fn make_component_id(name: &str) -> ComponentId {
    let mut hasher = Hasher::new();
    hasher.update(b"component:");
    hasher.update(name.as_bytes());
    ComponentId(hasher.finalize().into())
}

/// Identity of a node within its sibling list.
///
/// Explicit keys survive reordering. Without one, the node is identified by
/// its position in the declared child list, so reordering un-keyed siblings
/// pairs them with whatever now sits at their old index (an update or a
/// destroy/recreate instead of a move). Supply explicit keys for any list
/// that can be reordered.
#[derive(Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Debug)]
pub enum Key {
    /// Caller-supplied key, unique among siblings.
    Explicit(String),
    /// Positional fallback: index within the declared child list.
    Index(usize),
}

impl Key {
    /// Convenience constructor for an explicit key.
    #[must_use]
    pub fn explicit(key: impl Into<String>) -> Self {
        Self::Explicit(key.into())
    }

    /// Returns the explicit key text, if any.
    #[must_use]
    pub fn as_explicit(&self) -> Option<&str> {
        match self {
            Self::Explicit(k) => Some(k),
            Self::Index(_) => None,
        }
    }
}

impl core::fmt::Display for Key {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            Self::Explicit(k) => write!(f, "{k:?}"),
            Self::Index(i) => write!(f, "[{i}]"),
        }
    }
}
