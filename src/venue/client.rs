// =============================================================================
// Venue REST Client: HMAC-SHA256 signed requests
// =============================================================================
//
// SECURITY: the secret key is never logged or serialized. All signed requests
// carry the API key as a header and a recvWindow of 5 000 ms to tolerate
// minor clock drift between the arena and the venue.
// =============================================================================

use anyhow::{Context, Result};
use hmac::{Hmac, Mac};
use reqwest::header::{HeaderMap, HeaderValue};
use sha2::Sha256;
use std::time::{SystemTime, UNIX_EPOCH};
use tracing::{debug, instrument, warn};

use crate::types::SymbolTick;

type HmacSha256 = Hmac<Sha256>;

/// Default recv-window sent with every signed request (milliseconds).
const RECV_WINDOW: u64 = 5000;

const DEFAULT_BASE_URL: &str = "https://api.binance.com";

/// Venue REST client with HMAC-SHA256 request signing.
#[derive(Clone)]
pub struct VenueClient {
    api_key: String,
    secret: String,
    base_url: String,
    client: reqwest::Client,
}

impl VenueClient {
    // -------------------------------------------------------------------------
    // Construction
    // -------------------------------------------------------------------------

    /// Create a new `VenueClient`.
    ///
    /// # Arguments
    /// * `api_key` - venue API key (sent as a header, never in query params).
    /// * `secret`  - secret key used exclusively for HMAC signing.
    pub fn new(api_key: impl Into<String>, secret: impl Into<String>) -> Self {
        let api_key = api_key.into();
        let secret = secret.into();

        let mut default_headers = HeaderMap::new();
        if let Ok(val) = HeaderValue::from_str(&api_key) {
            default_headers.insert("X-MBX-APIKEY", val);
        }

        let client = reqwest::Client::builder()
            .default_headers(default_headers)
            .timeout(std::time::Duration::from_secs(10))
            .build()
            .expect("failed to build reqwest client");

        let base_url =
            std::env::var("VENUE_BASE_URL").unwrap_or_else(|_| DEFAULT_BASE_URL.to_string());

        debug!(base_url = %base_url, "VenueClient initialised");

        Self {
            api_key,
            secret,
            base_url,
            client,
        }
    }

    // -------------------------------------------------------------------------
    // Signing helpers
    // -------------------------------------------------------------------------

    /// Produce an HMAC-SHA256 hex signature of `query`.
    pub fn sign(&self, query: &str) -> String {
        let mut mac =
            HmacSha256::new_from_slice(self.secret.as_bytes()).expect("HMAC accepts any key size");
        mac.update(query.as_bytes());
        hex::encode(mac.finalize().into_bytes())
    }

    /// Current UNIX timestamp in milliseconds.
    pub fn timestamp_ms() -> u64 {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .expect("system clock before UNIX epoch")
            .as_millis() as u64
    }

    /// Build the full query string for a signed request (appends timestamp,
    /// recvWindow, and signature).
    fn signed_query(&self, params: &str) -> String {
        let ts = Self::timestamp_ms();
        let base = if params.is_empty() {
            format!("timestamp={ts}&recvWindow={RECV_WINDOW}")
        } else {
            format!("{params}&timestamp={ts}&recvWindow={RECV_WINDOW}")
        };
        let sig = self.sign(&base);
        format!("{base}&signature={sig}")
    }

    // -------------------------------------------------------------------------
    // Public market data
    // -------------------------------------------------------------------------

    /// GET /api/v3/ticker/24hr for a set of symbols (public, unsigned).
    ///
    /// Returns one tick per requested symbol that the venue recognises;
    /// unknown symbols are skipped with a warning.
    #[instrument(skip(self), name = "venue::get_tickers")]
    pub async fn get_tickers(&self, symbols: &[String]) -> Result<Vec<SymbolTick>> {
        let joined = symbols
            .iter()
            .map(|s| format!("\"{s}\""))
            .collect::<Vec<_>>()
            .join(",");
        let url = format!(
            "{}/api/v3/ticker/24hr?symbols=[{}]",
            self.base_url, joined
        );

        let resp = self
            .client
            .get(&url)
            .send()
            .await
            .context("GET /api/v3/ticker/24hr request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse ticker response")?;

        if !status.is_success() {
            anyhow::bail!("venue GET /api/v3/ticker/24hr returned {}: {}", status, body);
        }

        let raw = body.as_array().context("ticker response is not an array")?;

        let mut ticks = Vec::with_capacity(raw.len());
        for entry in raw {
            let symbol = match entry["symbol"].as_str() {
                Some(s) => s.to_string(),
                None => {
                    warn!("skipping ticker entry without a symbol");
                    continue;
                }
            };
            let price = Self::parse_str_f64(&entry["lastPrice"])?;
            // Venue reports the 24 h change in percent; normalise to fraction.
            let change_24h = Self::parse_str_f64(&entry["priceChangePercent"])? / 100.0;
            let volume_24h = Self::parse_str_f64(&entry["quoteVolume"])?;

            ticks.push(SymbolTick {
                symbol,
                price,
                change_24h,
                volume_24h,
            });
        }

        debug!(count = ticks.len(), "tickers fetched");
        Ok(ticks)
    }

    // -------------------------------------------------------------------------
    // Orders
    // -------------------------------------------------------------------------

    /// POST /api/v3/order (signed): submit a market order.
    ///
    /// Buys spend `quote_notional` USDC; sells dispose of `quantity` units.
    #[instrument(skip(self), name = "venue::place_market_order")]
    pub async fn place_market_order(
        &self,
        symbol: &str,
        side: &str,
        quantity: Option<f64>,
        quote_notional: Option<f64>,
        client_order_id: &str,
    ) -> Result<serde_json::Value> {
        let mut params = format!("symbol={symbol}&side={side}&type=MARKET");
        if let Some(q) = quantity {
            params.push_str(&format!("&quantity={q}"));
        }
        if let Some(n) = quote_notional {
            params.push_str(&format!("&quoteOrderQty={n}"));
        }
        params.push_str(&format!("&newClientOrderId={client_order_id}"));

        let qs = self.signed_query(&params);
        let url = format!("{}/api/v3/order?{}", self.base_url, qs);

        debug!(symbol, side, "placing market order");

        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .context("POST /api/v3/order request failed")?;

        let status = resp.status();
        let body: serde_json::Value = resp
            .json()
            .await
            .context("failed to parse order response")?;

        if !status.is_success() {
            anyhow::bail!("venue POST /api/v3/order returned {}: {}", status, body);
        }

        debug!(symbol, side, "order placed successfully");
        Ok(body)
    }

    // -------------------------------------------------------------------------
    // Internal helpers
    // -------------------------------------------------------------------------

    /// Parse a JSON value that may be either a string or a number into `f64`.
    fn parse_str_f64(val: &serde_json::Value) -> Result<f64> {
        if let Some(s) = val.as_str() {
            s.parse::<f64>()
                .with_context(|| format!("failed to parse '{s}' as f64"))
        } else if let Some(n) = val.as_f64() {
            Ok(n)
        } else {
            anyhow::bail!("expected string or number, got: {val}")
        }
    }
}

impl std::fmt::Debug for VenueClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("VenueClient")
            .field("api_key", &"<redacted>")
            .field("secret", &"<redacted>")
            .field("base_url", &self.base_url)
            .finish()
    }
}

// =============================================================================
// Tests
// =============================================================================
