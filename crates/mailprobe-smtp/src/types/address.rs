//! Envelope address type.

use serde::Serialize;

/// Envelope address as given by the operator.
///
/// Kept verbatim: a probing tool must be able to send addresses a stricter
/// client would refuse. The empty address is the null reverse-path (`<>`).
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Address(String);

impl Address {
    /// Creates an address from a string.
    ///
    /// `<>` is accepted as a spelling of the null sender.
    #[must_use]
    pub fn new(addr: impl Into<String>) -> Self {
        let addr = addr.into();
        if addr == "<>" {
            Self::null()
        } else {
            Self(addr)
        }
    }

    /// The null reverse-path.
    #[must_use]
    pub const fn null() -> Self {
        Self(String::new())
    }

    /// Returns true for the null reverse-path.
    #[must_use]
    pub fn is_null(&self) -> bool {
        self.0.is_empty()
    }

    /// Returns the address as a string slice.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns the domain, the text after the last `@`.
    ///
    /// `None` if there is no `@` or nothing follows it.
    #[must_use]
    pub fn domain(&self) -> Option<&str> {
        self.0
            .rsplit_once('@')
            .map(|(_, domain)| domain)
            .filter(|domain| !domain.is_empty())
    }
}

impl std::fmt::Display for Address {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for Address {
    fn from(addr: &str) -> Self {
        Self::new(addr)
    }
}
