//! 🧭 Route — `prefix + app`, and that is the whole algorithm.

/// The prefix every honeypot index shares unless configured otherwise.
pub const DEFAULT_INDEX_PREFIX: &str = "mhn-community-data-";

/// 🧭 Maps an application identifier to its index name. Total: every string has a home,
/// including the empty one, which lands in the bare prefix.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IndexRouter {
    prefix: String,
}

impl IndexRouter {
    pub fn new(prefix: impl Into<String>) -> Self {
        Self { prefix: prefix.into() }
    }

    pub fn prefix(&self) -> &str {
        &self.prefix
    }

    pub fn route(&self, app: &str) -> String {
        let mut index = String::with_capacity(self.prefix.len() + app.len());
        index.push_str(&self.prefix);
        index.push_str(app);
        index
    }
}

impl Default for IndexRouter {
    fn default() -> Self {
        Self::new(DEFAULT_INDEX_PREFIX)
    }
}
