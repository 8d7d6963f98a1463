//! Identifiers
//!
//! Dependency names and step identities are plain strings on the way in,
//! but they are validated once and then carried around as [`Name`] and
//! [`StepId`]. Both are reference-counted, so cloning them into graph
//! nodes, plans and contexts is cheap.

use std::borrow::Borrow;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};

/// Longest identifier we accept, in bytes.
pub const MAX_NAME_LEN: usize = 128;

fn validate(raw: &str) -> Result<()> {
    let reason = if raw.is_empty() {
        "must not be empty"
    } else if raw.len() > MAX_NAME_LEN {
        "longer than 128 bytes"
    } else if raw.chars().any(char::is_whitespace) {
        "must not contain whitespace"
    } else if raw.chars().any(char::is_control) {
        "must not contain control characters"
    } else {
        return Ok(());
    };
    Err(Error::InvalidName {
        name: raw.to_owned(),
        reason,
    })
}

/// Name of a value that steps require or provide.
///
/// Names are resolved by equality only; there is no namespacing.
///
/// # Example
///
/// ```
/// use startup_core::Name;
///
/// let name = Name::new("config").unwrap();
/// assert_eq!(name.as_str(), "config");
/// assert!(Name::new("two words").is_err());
/// ```
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Name(Arc<str>);

impl Name {
    /// Validate and wrap a name.
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let raw = raw.as_ref();
        validate(raw)?;
        Ok(Self(Arc::from(raw)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for Name {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl AsRef<str> for Name {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for Name {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Name({})", self.0)
    }
}

impl TryFrom<&str> for Name {
    type Error = Error;

    fn try_from(raw: &str) -> Result<Self> {
        Self::new(raw)
    }
}

impl TryFrom<String> for Name {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self> {
        Self::new(raw)
    }
}

impl From<Name> for String {
    fn from(name: Name) -> Self {
        name.0.as_ref().to_owned()
    }
}

/// Identity of a registered step, unique within a registry.
#[derive(Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct StepId(Arc<str>);

impl StepId {
    /// Validate and wrap a step identity.
    pub fn new(raw: impl AsRef<str>) -> Result<Self> {
        let raw = raw.as_ref();
        validate(raw)?;
        Ok(Self(Arc::from(raw)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Borrow<str> for StepId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl fmt::Debug for StepId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "StepId({})", self.0)
    }
}

impl TryFrom<&str> for StepId {
    type Error = Error;

    fn try_from(raw: &str) -> Result<Self> {
        Self::new(raw)
    }
}

impl TryFrom<String> for StepId {
    type Error = Error;

    fn try_from(raw: String) -> Result<Self> {
        Self::new(raw)
    }
}

impl From<StepId> for String {
    fn from(id: StepId) -> Self {
        id.0.as_ref().to_owned()
    }
}

/// Parse a list of raw names, keeping first-seen order and dropping repeats.
pub(crate) fn collect_names<I, S, C>(raw: I) -> Result<C>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
    C: Default + Extend<Name> + AsRef<[Name]>,
{
    let mut names = C::default();
    for item in raw {
        let name = Name::new(item)?;
        if !names.as_ref().contains(&name) {
            names.extend(Some(name));
        }
    }
    Ok(names)
}
