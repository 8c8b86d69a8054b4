use std::fmt;

/// Case-insensitive name key for [`crate::OperationGraph`] nodes and registry entries.
///
/// The name is normalised to lower case once, at construction, so lookups never branch on a
/// comparison strategy. The original spelling is kept for display.
#[derive(Clone, Debug)]
pub struct NameKey {
    normalized: String,
    display: String,
}

impl NameKey {
    /// Build a key from a name.
    pub fn new(name: impl Into<String>) -> Self {
        let display = name.into();
        Self {
            normalized: display.to_lowercase(),
            display,
        }
    }

    /// The name as originally spelled.
    pub fn as_str(&self) -> &str {
        &self.display
    }

    /// The lower-cased name used for comparisons.
    pub fn normalized(&self) -> &str {
        &self.normalized
    }
}

impl PartialEq for NameKey {
    fn eq(&self, other: &Self) -> bool {
        self.normalized == other.normalized
    }
}

impl Eq for NameKey {}

impl std::hash::Hash for NameKey {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.normalized.hash(state);
    }
}

impl fmt::Display for NameKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.display)
    }
}

impl From<&str> for NameKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for NameKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}
