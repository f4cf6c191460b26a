//! String type helpers.
//!
//! Flag, allocation and variation keys are cloned into every assignment event and cache key, so
//! they're stored behind a reference-counted pointer.

use std::{borrow::Borrow, sync::Arc};

use serde::{Deserialize, Serialize};

/// `Str` is an immutable string that can be cloned cheaply.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Deserialize, Serialize)]
#[serde(transparent)]
pub struct Str(Arc<str>);

impl Str {
    /// Create a new `Str` from a string slice.
    pub fn new(s: &str) -> Str {
        Str(Arc::from(s))
    }

    /// Return the string as a slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Str {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for Str {
    fn from(value: &str) -> Str {
        Str::new(value)
    }
}

impl From<String> for Str {
    fn from(value: String) -> Str {
        Str(Arc::from(value))
    }
}

impl From<&String> for Str {
    fn from(value: &String) -> Str {
        Str::new(value)
    }
}

impl From<Str> for String {
    fn from(value: Str) -> String {
        value.0.as_ref().to_owned()
    }
}

impl AsRef<str> for Str {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Str {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl std::ops::Deref for Str {
    type Target = str;

    fn deref(&self) -> &Self::Target {
        self.as_ref()
    }
}

impl PartialEq<str> for Str {
    fn eq(&self, other: &str) -> bool {
        self.as_str() == other
    }
}

impl PartialEq<&str> for Str {
    fn eq(&self, other: &&str) -> bool {
        self.as_str() == *other
    }
}

impl log::kv::ToValue for Str {
    fn to_value(&self) -> log::kv::Value {
        log::kv::Value::from_display(self)
    }
}
