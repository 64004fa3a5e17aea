use std::fmt;
use std::ops::Deref;

use serde::{Deserialize, Serialize};

/// An opaque content identifier returned by the content store.
///
/// The store guarantees identical byte payloads yield identical `Cid`s; the
/// core never interprets the bytes of a `Cid` itself, only compares and
/// stores it. CIDs are opaque strings minted by an external DHT rather than
/// a locally-computed multihash.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Cid(String);

impl Cid {
    pub fn new(value: impl Into<String>) -> Self {
        Cid(value.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl Deref for Cid {
    type Target = str;
    fn deref(&self) -> &str {
        &self.0
    }
}

impl From<String> for Cid {
    fn from(value: String) -> Self {
        Cid(value)
    }
}

impl From<&str> for Cid {
    fn from(value: &str) -> Self {
        Cid(value.to_string())
    }
}

impl fmt::Display for Cid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}
