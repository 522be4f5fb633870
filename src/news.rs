// =============================================================================
// News Cache: per-symbol headlines with TTL eviction and read-through
// =============================================================================
//
// Agents see a formatted news block inside their prompt. Headlines are cached
// per symbol for six hours; a miss or expired entry triggers exactly one
// read-through to the feed. Feed failures are non-fatal: the symbol simply
// contributes nothing to the block this round.
// =============================================================================

use std::collections::HashMap;
use std::sync::Arc;
use std::time::{Duration, Instant};

use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

/// Cache TTL for a symbol's headlines.
const NEWS_TTL: Duration = Duration::from_secs(6 * 60 * 60);

/// Maximum headlines kept per symbol.
const MAX_ITEMS_PER_SYMBOL: usize = 5;

/// One headline as surfaced to agents.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewsItem {
    pub title: String,
    pub source: String,
    #[serde(default)]
    pub published_at: String,
}

/// Upstream headline provider.
#[async_trait]
pub trait NewsFeed: Send + Sync {
    async fn fetch(&self, symbol: &str) -> Result<Vec<NewsItem>>;
}

/// HTTP feed reading `{NEWS_API_URL}?symbol=<symbol>`.
pub struct HttpNewsFeed {
    client: reqwest::Client,
    base_url: String,
}

impl HttpNewsFeed {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::builder()
                .timeout(Duration::from_secs(10))
                .build()
                .expect("failed to build reqwest client for HttpNewsFeed"),
            base_url: base_url.into(),
        }
    }
}

#[async_trait]
impl NewsFeed for HttpNewsFeed {
    async fn fetch(&self, symbol: &str) -> Result<Vec<NewsItem>> {
        let url = format!("{}?symbol={}", self.base_url, symbol);

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .with_context(|| format!("GET news for {symbol}"))?;

        let status = resp.status();
        if !status.is_success() {
            anyhow::bail!("news feed returned {status} for {symbol}");
        }

        let items: Vec<NewsItem> = resp
            .json()
            .await
            .context("failed to parse news response body")?;

        Ok(items)
    }
}

/// Feed for deployments without a news provider: every fetch yields nothing,
/// so prompts simply omit the headlines block.
pub struct NullNewsFeed;

#[async_trait]
impl NewsFeed for NullNewsFeed {
    async fn fetch(&self, _symbol: &str) -> Result<Vec<NewsItem>> {
        Ok(Vec::new())
    }
}

// ---------------------------------------------------------------------------
// Cache
// ---------------------------------------------------------------------------

struct CachedNews {
    items: Vec<NewsItem>,
    fetched_at: Instant,
}

/// Read-through per-symbol news cache.
pub struct NewsCache {
    feed: Arc<dyn NewsFeed>,
    entries: RwLock<HashMap<String, CachedNews>>,
}

impl NewsCache {
    pub fn new(feed: Arc<dyn NewsFeed>) -> Self {
        Self {
            feed,
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Return cached headlines for `symbols`, reading through the feed for
    /// any symbol that is missing or expired.
    pub async fn get_cached_news(&self, symbols: &[String]) -> HashMap<String, Vec<NewsItem>> {
        let mut result = HashMap::new();
        let mut stale: Vec<String> = Vec::new();

        {
            let entries = self.entries.read();
            for symbol in symbols {
                match entries.get(symbol) {
                    Some(cached) if cached.fetched_at.elapsed() < NEWS_TTL => {
                        result.insert(symbol.clone(), cached.items.clone());
                    }
                    _ => stale.push(symbol.clone()),
                }
            }
        }

        for symbol in stale {
            match self.feed.fetch(&symbol).await {
                Ok(mut items) => {
                    items.truncate(MAX_ITEMS_PER_SYMBOL);
                    debug!(symbol = %symbol, count = items.len(), "news fetched");
                    self.entries.write().insert(
                        symbol.clone(),
                        CachedNews {
                            items: items.clone(),
                            fetched_at: Instant::now(),
                        },
                    );
                    result.insert(symbol, items);
                }
                Err(e) => {
                    warn!(symbol = %symbol, error = %e, "news fetch failed, continuing without");
                    result.insert(symbol, Vec::new());
                }
            }
        }

        result
    }

    /// Render the headlines into the agent-visible prompt block.
    ///
    /// Best-effort: symbols without headlines are omitted, and an empty map
    /// renders an empty string.
    pub fn format_news_for_prompt(news: &HashMap<String, Vec<NewsItem>>) -> String {
        let mut symbols: Vec<&String> = news
            .iter()
            .filter(|(_, items)| !items.is_empty())
            .map(|(s, _)| s)
            .collect();
        if symbols.is_empty() {
            return String::new();
        }
        symbols.sort();

        let mut block = String::from("Recent headlines:\n");
        for symbol in symbols {
            block.push_str(&format!("  {symbol}:\n"));
            for item in &news[symbol] {
                block.push_str(&format!("    - {} ({})\n", item.title, item.source));
            }
        }
        block
    }
}

// =============================================================================
// Tests
// =============================================================================
