//! Best-effort keyword tagging of news articles with a coin symbol.

use regex::{Regex, RegexBuilder};

/// Tag used when no rule matches.
pub const UNTAGGED: &str = "ALL";

const DEFAULT_RULES: &[(&str, &[&str])] = &[
    ("BTC-USD", &["bitcoin", "btc"]),
    ("ETH-USD", &["ethereum", "eth", "ether"]),
    ("SOL-USD", &["solana", "sol"]),
    ("XRP-USD", &["xrp", "ripple"]),
    ("DOGE-USD", &["dogecoin", "doge"]),
    ("ADA-USD", &["cardano", "ada"]),
    ("BNB-USD", &["bnb", "binance coin"]),
];

#[derive(Debug, Clone)]
struct TagRule {
    tag: String,
    pattern: Regex,
}

/// Ordered keyword rules; the first rule that matches wins.
#[derive(Debug, Clone)]
pub struct CoinTagger {
    rules: Vec<TagRule>,
}

impl Default for CoinTagger {
    fn default() -> Self {
        let rules = DEFAULT_RULES
            .iter()
            .filter_map(|(tag, keywords)| Self::compile(tag, keywords).ok())
            .collect();
        Self { rules }
    }
}

impl CoinTagger {
    /// Build a tagger from `(tag, keywords)` pairs, in priority order.
    /// Keywords match case-insensitively on word boundaries.
    pub fn from_rules<'a, I, K>(rules: I) -> Result<Self, regex::Error>
    where
        I: IntoIterator<Item = (&'a str, K)>,
        K: AsRef<[&'a str]>,
    {
        let rules = rules
            .into_iter()
            .map(|(tag, keywords)| Self::compile(tag, keywords.as_ref()))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { rules })
    }

    fn compile(tag: &str, keywords: &[&str]) -> Result<TagRule, regex::Error> {
        let alternatives = keywords
            .iter()
            .map(|keyword| regex::escape(keyword).replace(' ', r"\s+"))
            .collect::<Vec<_>>()
            .join("|");
        let pattern = RegexBuilder::new(&format!(r"\b(?:{alternatives})\b"))
            .case_insensitive(true)
            .build()?;
        Ok(TagRule {
            tag: tag.to_owned(),
            pattern,
        })
    }

    /// Tag for an article, looking at its title and content.
    pub fn tag(&self, title: Option<&str>, content: Option<&str>) -> &str {
        let text = format!("{} {}", title.unwrap_or_default(), content.unwrap_or_default());
        self.rules
            .iter()
            .find(|rule| rule.pattern.is_match(&text))
            .map_or(UNTAGGED, |rule| rule.tag.as_str())
    }
}
