//! Bonding-curve migration detection from API error text

use regex::Regex;

use crate::error::{Error, Result};

/// Words that hint at a pool problem without naming a migration
const AMBIGUOUS_HINTS: [&str; 2] = ["pool", "curve"];

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MigrationSignal {
    /// Matches a configured keyword
    Migrated,
    /// Mentions a pool or curve but no keyword
    Ambiguous,
    Unrelated,
}

/// Case-insensitive literal keyword matcher
#[derive(Debug, Clone)]
pub struct MigrationMatcher {
    patterns: Vec<Regex>,
}

impl MigrationMatcher {
    pub fn new(keywords: &[String]) -> Result<Self> {
        let patterns = keywords
            .iter()
            .map(|k| {
                Regex::new(&format!("(?i){}", regex::escape(k)))
                    .map_err(|e| Error::Config(format!("migration keyword {}: {}", k, e)))
            })
            .collect::<Result<Vec<_>>>()?;
        Ok(Self { patterns })
    }

    pub fn classify(&self, message: &str) -> MigrationSignal {
        if self.patterns.iter().any(|p| p.is_match(message)) {
            return MigrationSignal::Migrated;
        }
        let lower = message.to_ascii_lowercase();
        if AMBIGUOUS_HINTS.iter().any(|h| lower.contains(h)) {
            MigrationSignal::Ambiguous
        } else {
            MigrationSignal::Unrelated
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_classify() {
        let matcher = MigrationMatcher::new(&["graduated".to_string(), "bonding curve complete".to_string()]).unwrap();
        assert_eq!(matcher.classify("Token has GRADUATED to AMM"), MigrationSignal::Migrated);
        assert_eq!(matcher.classify("Bonding curve complete"), MigrationSignal::Migrated);
        assert_eq!(matcher.classify("curve account missing"), MigrationSignal::Ambiguous);
        assert_eq!(matcher.classify("slippage exceeded"), MigrationSignal::Unrelated);
    }

    #[test]
    fn test_keywords_are_literal() {
        let matcher = MigrationMatcher::new(&["moved (amm)".to_string()]).unwrap();
        assert_eq!(matcher.classify("token moved (AMM)"), MigrationSignal::Migrated);
        assert_eq!(matcher.classify("token moved amm"), MigrationSignal::Unrelated);
    }

    #[test]
    fn test_empty_keywords_never_migrate() {
        let matcher = MigrationMatcher::new(&[]).unwrap();
        assert_eq!(matcher.classify("graduated"), MigrationSignal::Unrelated);
    }
}
