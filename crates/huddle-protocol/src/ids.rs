//! Typed identifiers for channels, isolation scopes, and users.
//!
//! All three are opaque strings chosen by the backend. They're transparent on
//! the wire and display as-is for logging. The newtypes exist so a channel id
//! can't be passed where a server id is expected.

use std::borrow::Borrow;
use std::fmt;

use serde::{Deserialize, Serialize};

/// A channel (room) identifier, unique within its [`ServerId`] scope.
#[derive(Clone, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ChannelId(String);

/// An isolation scope (per-user or per-workspace boundary), not a host.
#[derive(Clone, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ServerId(String);

/// The acting entity attributed to joins and sends.
#[derive(Clone, Default, Hash, Eq, PartialEq, Ord, PartialOrd, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(String);

// ── Shared behavior ─────────────────────────────────────────────────────────

macro_rules! impl_string_id {
    ($T:ident, $name:literal) => {
        impl $T {
            /// Wrap a raw identifier.
            pub fn new(id: impl Into<String>) -> Self {
                Self(id.into())
            }

            /// Borrow the raw identifier.
            pub fn as_str(&self) -> &str {
                &self.0
            }

            /// Unwrap into the raw identifier.
            pub fn into_inner(self) -> String {
                self.0
            }

            /// First `n` characters, never splitting a code point.
            pub fn prefix(&self, n: usize) -> &str {
                match self.0.char_indices().nth(n) {
                    Some((idx, _)) => &self.0[..idx],
                    None => &self.0,
                }
            }
        }

        impl From<&str> for $T {
            fn from(s: &str) -> Self {
                Self(s.to_owned())
            }
        }

        impl From<String> for $T {
            fn from(s: String) -> Self {
                Self(s)
            }
        }

        impl From<&$T> for $T {
            fn from(id: &$T) -> Self {
                id.clone()
            }
        }

        impl Borrow<str> for $T {
            fn borrow(&self) -> &str {
                &self.0
            }
        }

        impl AsRef<str> for $T {
            fn as_ref(&self) -> &str {
                &self.0
            }
        }

        impl fmt::Display for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&self.0)
            }
        }

        impl fmt::Debug for $T {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({:?})", $name, self.0)
            }
        }

        impl PartialEq<str> for $T {
            fn eq(&self, other: &str) -> bool {
                self.0 == other
            }
        }

        impl PartialEq<&str> for $T {
            fn eq(&self, other: &&str) -> bool {
                self.0 == *other
            }
        }
    };
}

impl_string_id!(ChannelId, "ChannelId");
impl_string_id!(ServerId, "ServerId");
impl_string_id!(UserId, "UserId");

// ============================================================================
// Tests
// ============================================================================
