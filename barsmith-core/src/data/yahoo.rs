//! Yahoo Finance raw table source.
//!
//! Fetches OHLCV bars from Yahoo's v8 chart API with retries and exponential
//! backoff, and hands them back as a flat raw table with Yahoo's own column
//! names. Nulls in the response become missing cells.
//!
//! Yahoo Finance has no official API and is subject to unannounced format
//! changes. Reading a previously saved CSV is the fallback when it is down.

use super::provider::{FetchRequest, ProviderError, RawTableSource};
use super::raw::{ColumnHeader, RawTable};
use crate::config::ProviderConfig;
use chrono::{DateTime, NaiveTime, SecondsFormat};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, warn};

/// Column names as Yahoo's own CSV download writes them.
pub const YAHOO_COLUMNS: [&str; 6] = ["Date", "Open", "High", "Low", "Close", "Volume"];

const CHART_ENDPOINT: &str = "https://query2.finance.yahoo.com/v8/finance/chart";

/// Yahoo Finance v8 chart API response.
#[derive(Debug, Deserialize)]
struct ChartResponse {
    chart: ChartResult,
}

#[derive(Debug, Deserialize)]
struct ChartResult {
    result: Option<Vec<ChartData>>,
    error: Option<ChartError>,
}

#[derive(Debug, Deserialize)]
struct ChartError {
    code: String,
    description: String,
}

#[derive(Debug, Deserialize)]
struct ChartData {
    timestamp: Option<Vec<i64>>,
    indicators: Indicators,
}

#[derive(Debug, Deserialize)]
struct Indicators {
    quote: Vec<QuoteData>,
}

#[derive(Debug, Deserialize)]
struct QuoteData {
    #[serde(default)]
    open: Vec<Option<f64>>,
    #[serde(default)]
    high: Vec<Option<f64>>,
    #[serde(default)]
    low: Vec<Option<f64>>,
    #[serde(default)]
    close: Vec<Option<f64>>,
    #[serde(default)]
    volume: Vec<Option<f64>>,
}

/// Yahoo Finance raw table source.
pub struct YahooProvider {
    client: reqwest::blocking::Client,
    max_retries: u32,
    base_delay: Duration,
}

impl YahooProvider {
    pub fn new(config: &ProviderConfig) -> Result<Self, ProviderError> {
        let client = reqwest::blocking::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .user_agent("Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36")
            .build()
            .map_err(|e| ProviderError::Other(format!("failed to build HTTP client: {e}")))?;

        Ok(Self {
            client,
            max_retries: config.max_retries,
            base_delay: Duration::from_millis(config.base_delay_ms),
        })
    }

    /// Build the chart API URL for a request. The end date is inclusive.
    fn chart_url(request: &FetchRequest) -> String {
        let start_ts = request.start.and_time(NaiveTime::MIN).and_utc().timestamp();
        let end_ts = request.end.and_time(NaiveTime::MIN).and_utc().timestamp() + 86_399;
        format!(
            "{CHART_ENDPOINT}/{symbol}?period1={start_ts}&period2={end_ts}&interval={interval}",
            symbol = request.symbol,
            interval = request.interval,
        )
    }

    /// Parse the chart API response into a flat raw table.
    fn parse_response(symbol: &str, resp: ChartResponse) -> Result<RawTable, ProviderError> {
        let result = resp.chart.result.ok_or_else(|| match resp.chart.error {
            Some(err) if err.code == "Not Found" => ProviderError::SymbolNotFound {
                symbol: symbol.to_string(),
            },
            Some(err) => {
                ProviderError::ResponseFormatChanged(format!("{}: {}", err.code, err.description))
            }
            None => ProviderError::ResponseFormatChanged("empty result with no error".into()),
        })?;

        let data = result
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ResponseFormatChanged("result array is empty".into()))?;

        let timestamps = data.timestamp.unwrap_or_default();
        let quote = data
            .indicators
            .quote
            .into_iter()
            .next()
            .ok_or_else(|| ProviderError::ResponseFormatChanged("no quote data".into()))?;

        let cell = |values: &[Option<f64>], i: usize| -> Option<String> {
            values.get(i).copied().flatten().map(|v| v.to_string())
        };

        let mut rows = Vec::with_capacity(timestamps.len());
        for (i, &ts) in timestamps.iter().enumerate() {
            let date = DateTime::from_timestamp(ts, 0).ok_or_else(|| {
                ProviderError::ResponseFormatChanged(format!("invalid timestamp: {ts}"))
            })?;

            let values = [
                cell(&quote.open, i),
                cell(&quote.high, i),
                cell(&quote.low, i),
                cell(&quote.close, i),
                cell(&quote.volume, i),
            ];
            // Skip rows with no values at all (holidays, non-trading days)
            if values.iter().all(Option::is_none) {
                continue;
            }

            let mut row = Vec::with_capacity(YAHOO_COLUMNS.len());
            row.push(Some(date.to_rfc3339_opts(SecondsFormat::Secs, false)));
            row.extend(values);
            rows.push(row);
        }

        if rows.is_empty() {
            return Err(ProviderError::SymbolNotFound {
                symbol: symbol.to_string(),
            });
        }

        let header = ColumnHeader::Flat(YAHOO_COLUMNS.iter().map(|c| c.to_string()).collect());
        Ok(RawTable::from_trusted(header, rows).with_instrument(symbol))
    }

    /// Execute the request, retrying transient failures with backoff.
    fn fetch_with_retry(&self, request: &FetchRequest) -> Result<RawTable, ProviderError> {
        let symbol = request.symbol.as_str();
        let url = Self::chart_url(request);
        let mut last_error = None;

        for attempt in 0..=self.max_retries {
            if attempt > 0 {
                let delay = self.base_delay * 2u32.pow(attempt - 1);
                debug!(symbol, attempt, delay_ms = delay.as_millis() as u64, "retrying fetch");
                std::thread::sleep(delay);
            }

            match self.client.get(&url).send() {
                Ok(resp) => {
                    let status = resp.status();

                    if status == reqwest::StatusCode::NOT_FOUND {
                        return Err(ProviderError::SymbolNotFound {
                            symbol: symbol.to_string(),
                        });
                    }

                    if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
                        let retry_after = resp
                            .headers()
                            .get("retry-after")
                            .and_then(|v| v.to_str().ok())
                            .and_then(|v| v.parse::<u64>().ok())
                            .unwrap_or(60);
                        warn!(symbol, retry_after, "rate limited");
                        last_error = Some(ProviderError::RateLimited {
                            retry_after_secs: retry_after,
                        });
                        continue;
                    }

                    if status == reqwest::StatusCode::UNAUTHORIZED
                        || status == reqwest::StatusCode::FORBIDDEN
                    {
                        return Err(ProviderError::AuthenticationRequired(format!(
                            "HTTP {status} from Yahoo Finance"
                        )));
                    }

                    if !status.is_success() {
                        last_error = Some(ProviderError::Other(format!("HTTP {status} for {symbol}")));
                        continue;
                    }

                    let chart: ChartResponse = resp.json().map_err(|e| {
                        ProviderError::ResponseFormatChanged(format!(
                            "failed to parse response for {symbol}: {e}"
                        ))
                    })?;

                    let table = Self::parse_response(symbol, chart)?;
                    debug!(symbol, rows = table.height(), "fetched raw table");
                    return Ok(table);
                }
                Err(e) => {
                    if e.is_connect() || e.is_timeout() {
                        last_error = Some(ProviderError::NetworkUnreachable(e.to_string()));
                        continue;
                    }
                    return Err(ProviderError::NetworkUnreachable(e.to_string()));
                }
            }
        }

        Err(last_error.unwrap_or_else(|| ProviderError::Other("max retries exceeded".into())))
    }
}

impl RawTableSource for YahooProvider {
    fn name(&self) -> &str {
        "yahoo_finance"
    }

    fn fetch(&self, request: &FetchRequest) -> Result<RawTable, ProviderError> {
        self.fetch_with_retry(request)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::provider::Interval;
    use chrono::NaiveDate;

    const SAMPLE: &str = r#"{
        "chart": {
            "result": [{
                "timestamp": [1668470400, 1668556800, 1668643200],
                "indicators": {
                    "quote": [{
                        "open":   [100.0, null, 102.0],
                        "high":   [105.0, null, 103.0],
                        "low":    [99.0,  null, 100.0],
                        "close":  [102.0, null, null],
                        "volume": [1000,  null, 1100]
                    }]
                }
            }],
            "error": null
        }
    }"#;

    #[test]
    fn parse_response_builds_flat_table() {
        let resp: ChartResponse = serde_json::from_str(SAMPLE).unwrap();
        let table = YahooProvider::parse_response("SPY", resp).unwrap();

        assert_eq!(table.instrument(), Some("SPY"));
        assert_eq!(table.header().level(0).unwrap(), YAHOO_COLUMNS);
        // the all-null row is skipped, the partial one is kept
        assert_eq!(table.height(), 2);
        let rows = table.rows();
        assert_eq!(rows[0][0].as_deref(), Some("2022-11-15T00:00:00+00:00"));
        assert_eq!(rows[0][5].as_deref(), Some("1000"));
        assert_eq!(rows[1][4], None);
    }

    #[test]
    fn not_found_error_maps_to_symbol_not_found() {
        let json = r#"{"chart":{"result":null,"error":{"code":"Not Found","description":"No data found"}}}"#;
        let resp: ChartResponse = serde_json::from_str(json).unwrap();
        let err = YahooProvider::parse_response("NOPE", resp).unwrap_err();
        assert!(matches!(err, ProviderError::SymbolNotFound { ref symbol } if symbol == "NOPE"));
    }

    #[test]
    fn other_errors_are_format_changes() {
        let json = r#"{"chart":{"result":null,"error":{"code":"Bad Request","description":"x"}}}"#;
        let resp: ChartResponse = serde_json::from_str(json).unwrap();
        let err = YahooProvider::parse_response("SPY", resp).unwrap_err();
        assert!(matches!(err, ProviderError::ResponseFormatChanged(_)));
    }

    #[test]
    fn chart_url_covers_whole_end_day() {
        let request = FetchRequest::new(
            "BTC-USD",
            NaiveDate::from_ymd_opt(2022, 11, 15).unwrap(),
            NaiveDate::from_ymd_opt(2022, 11, 16).unwrap(),
            Interval::OneHour,
        )
        .unwrap();
        let url = YahooProvider::chart_url(&request);
        assert!(url.ends_with(
            "/BTC-USD?period1=1668470400&period2=1668643199&interval=1h"
        ));
    }

    #[test]
    fn fetched_table_normalizes() {
        let resp: ChartResponse = serde_json::from_str(SAMPLE).unwrap();
        let table = YahooProvider::parse_response("SPY", resp).unwrap();
        let canonical = crate::data::Normalizer::new().normalize(table).unwrap();
        assert_eq!(canonical.height(), 1);
        assert_eq!(canonical.instrument(), Some("SPY"));
    }
}
