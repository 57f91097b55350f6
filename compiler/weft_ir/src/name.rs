//! Interned-style names.
//!
//! IR nodes share subtrees by reference count, so names follow suit: a
//! [`Name`] is a cheaply clonable `Arc<str>` with value equality. Dotted
//! suffixes build derived names (`blur_x.xo`, `r.x$r`, `input.buffer`)
//! without touching the parent.

use std::fmt;
use std::ops::Deref;
use std::sync::Arc;

/// A shared, immutable identifier.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Name(Arc<str>);

impl Name {
    pub fn new(s: impl AsRef<str>) -> Name {
        Name(Arc::from(s.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `self` joined to `suffix` with a dot: `blur_x` + `xo` → `blur_x.xo`.
    pub fn dotted(&self, suffix: &str) -> Name {
        Name::new(format!("{}.{suffix}", self.0))
    }

    /// `self` with `suffix` appended verbatim.
    pub fn with_suffix(&self, suffix: &str) -> Name {
        Name::new(format!("{}{suffix}", self.0))
    }
}

impl Deref for Name {
    type Target = str;

    fn deref(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for Name {
    fn from(s: &str) -> Name {
        Name::new(s)
    }
}

impl From<String> for Name {
    fn from(s: String) -> Name {
        Name(Arc::from(s))
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:?}", &*self.0)
    }
}
