use std::collections::HashSet;

/// Symbols accepted by the reference deployment.
pub const DEFAULT_REACTIONS: [&str; 20] = [
    "👍", "👎", "🤣", "😭", "😓", "😬", "🥳", "😨", "😠", "💩", "💖", "🐵", "❓", "🫂", "🔘", "👅",
    "🥺", "👻", "😅", "🌹",
];

/// The fixed set of reaction symbols a visitor may submit.
///
/// Keeps the configured order for listing while lookups go through a hash set.
#[derive(Debug, Clone)]
pub struct Whitelist {
    ordered: Vec<String>,
    lookup: HashSet<String>,
}

impl Whitelist {
    /// Builds a whitelist from any list of symbols. Blank entries are ignored
    /// and repeats are kept once.
    pub fn new<I, S>(symbols: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let mut ordered = Vec::new();
        let mut lookup = HashSet::new();
        for symbol in symbols {
            let symbol = symbol.into().trim().to_string();
            if !symbol.is_empty() && lookup.insert(symbol.clone()) {
                ordered.push(symbol);
            }
        }
        Self { ordered, lookup }
    }

    pub fn contains(&self, symbol: &str) -> bool {
        self.lookup.contains(symbol)
    }

    pub fn symbols(&self) -> &[String] {
        &self.ordered
    }

    pub fn len(&self) -> usize {
        self.ordered.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ordered.is_empty()
    }
}

impl Default for Whitelist {
    fn default() -> Self {
        Self::new(DEFAULT_REACTIONS)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_list_has_reference_symbols() {
        let whitelist = Whitelist::default();
        assert_eq!(whitelist.len(), 20);
        assert!(whitelist.contains("👍"));
        assert!(whitelist.contains("🌹"));
        assert!(!whitelist.contains("🚀"));
        assert!(!whitelist.contains(""));
    }

    #[test]
    fn custom_list_trims_and_dedups() {
        let whitelist = Whitelist::new([" 👍", "👍", "", "🚀"]);
        assert_eq!(whitelist.symbols(), &["👍".to_string(), "🚀".to_string()]);
    }
}
