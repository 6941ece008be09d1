//! Provider adapters.

pub mod newsapi;
pub mod yahoo;

pub use newsapi::NewsApiAdapter;
pub use yahoo::YahooChartAdapter;
