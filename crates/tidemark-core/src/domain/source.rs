use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};

use crate::ValidationError;

const MAX_SOURCE_LEN: usize = 20;

/// Identifier of one ingestion source: a trading pair such as `BTC-USD`, or a
/// feed name such as `NEWSAPI`.
///
/// Every watermark and log lookup is keyed by this value.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct SourceId(String);

impl SourceId {
    /// Parse and normalize a source identifier to uppercase.
    pub fn parse(input: &str) -> Result<Self, ValidationError> {
        let trimmed = input.trim();
        if trimmed.is_empty() {
            return Err(ValidationError::EmptySource);
        }

        let normalized = trimmed.to_ascii_uppercase();
        let len = normalized.chars().count();
        if len > MAX_SOURCE_LEN {
            return Err(ValidationError::SourceTooLong {
                len,
                max: MAX_SOURCE_LEN,
            });
        }

        for (index, ch) in normalized.chars().enumerate() {
            let valid = ch.is_ascii_alphanumeric() || matches!(ch, '-' | '_' | '.');
            if !valid {
                return Err(ValidationError::SourceInvalidChar { ch, index });
            }
        }

        Ok(Self(normalized))
    }

    /// Parse a comma separated list, skipping blank entries.
    pub fn parse_list(input: &str) -> Result<Vec<Self>, ValidationError> {
        input
            .split(',')
            .filter(|part| !part.trim().is_empty())
            .map(Self::parse)
            .collect()
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl Display for SourceId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl TryFrom<String> for SourceId {
    type Error = ValidationError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl TryFrom<&str> for SourceId {
    type Error = ValidationError;

    fn try_from(value: &str) -> Result<Self, Self::Error> {
        Self::parse(value)
    }
}

impl From<SourceId> for String {
    fn from(value: SourceId) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_and_normalizes_pair() {
        let parsed = SourceId::parse(" btc-usd ").expect("source should parse");
        assert_eq!(parsed.as_str(), "BTC-USD");
    }

    #[test]
    fn rejects_invalid_chars() {
        let err = SourceId::parse("BTC/USD").expect_err("must fail");
        assert!(matches!(err, ValidationError::SourceInvalidChar { ch: '/', index: 3 }));
    }

    #[test]
    fn rejects_overlong_identifier() {
        let err = SourceId::parse(&"X".repeat(21)).expect_err("must fail");
        assert!(matches!(err, ValidationError::SourceTooLong { len: 21, .. }));
    }

    #[test]
    fn parses_comma_list() {
        let parsed = SourceId::parse_list("btc-usd, ,eth-usd,").expect("list should parse");
        assert_eq!(
            parsed.iter().map(SourceId::as_str).collect::<Vec<_>>(),
            vec!["BTC-USD", "ETH-USD"]
        );
    }
}
