use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::TypeError;

/// Qualified name: a namespace URI plus a local name.
///
/// Names are already resolved; prefix mapping is the caller's concern. The
/// text form is the expanded `{uri}local` notation, with `{}local` for the
/// empty namespace.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct QName {
    uri: String,
    local: String,
}

impl QName {
    /// Create a name in the given namespace.
    pub fn new(uri: impl Into<String>, local: impl Into<String>) -> Self {
        Self {
            uri: uri.into(),
            local: local.into(),
        }
    }

    /// Create a name in the empty namespace.
    pub fn local(local: impl Into<String>) -> Self {
        Self::new("", local)
    }

    /// The namespace URI.
    pub fn uri(&self) -> &str {
        &self.uri
    }

    /// The local part.
    pub fn local_name(&self) -> &str {
        &self.local
    }
}

impl FromStr for QName {
    type Err = TypeError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let rest = s
            .strip_prefix('{')
            .ok_or_else(|| TypeError::InvalidName(s.to_string()))?;
        let (uri, local) = rest
            .split_once('}')
            .ok_or_else(|| TypeError::InvalidName(s.to_string()))?;
        if local.is_empty() {
            return Err(TypeError::InvalidName(s.to_string()));
        }
        Ok(Self::new(uri, local))
    }
}

impl fmt::Debug for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "QName({self})")
    }
}

impl fmt::Display for QName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{{{}}}{}", self.uri, self.local)
    }
}
