use reqwest::Client;
use reqwest_middleware::{ClientBuilder, ClientWithMiddleware};
use reqwest_retry::{RetryTransientMiddleware, policies::ExponentialBackoff};
use std::time::Duration;

pub struct HttpClientFactory;

impl HttpClientFactory {
    /// HTTP client with jittered exponential retry on transient failures.
    /// Five attempts total; 429 backoff is handled by the token budget at
    /// the call site, this layer covers timeouts and 5xx.
    pub fn create_client() -> ClientWithMiddleware {
        let retry_policy = ExponentialBackoff::builder()
            .retry_bounds(Duration::from_millis(250), Duration::from_secs(8))
            .build_with_max_retries(4);

        let client = Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new());

        ClientBuilder::new(client)
            .with(RetryTransientMiddleware::new_with_policy(retry_policy))
            .build()
    }

    /// Plain client without the retry middleware, for call sites that own
    /// their retry loop (the Binance client coordinates retries with the
    /// token budget and must see every 429 itself).
    pub fn create_base_client() -> Client {
        Client::builder()
            .pool_max_idle_per_host(5)
            .timeout(Duration::from_secs(30))
            .connect_timeout(Duration::from_secs(10))
            .build()
            .unwrap_or_else(|_| Client::new())
    }
}

/// Build a URL with query parameters. reqwest-middleware 0.5 does not
/// expose `.query()`, so the query string is assembled by hand.
pub fn build_url_with_query<K, V>(base_url: &str, params: &[(K, V)]) -> String
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    if params.is_empty() {
        return base_url.to_string();
    }

    let query_string: String = params
        .iter()
        .map(|(k, v)| format!("{}={}", encode_component(k.as_ref()), encode_component(v.as_ref())))
        .collect::<Vec<_>>()
        .join("&");

    if base_url.contains('?') {
        format!("{}&{}", base_url, query_string)
    } else {
        format!("{}?{}", base_url, query_string)
    }
}

fn encode_component(s: &str) -> String {
    let mut encoded = String::new();
    for c in s.chars() {
        match c {
            'A'..='Z' | 'a'..='z' | '0'..='9' | '-' | '_' | '.' | '~' => encoded.push(c),
            _ => {
                for byte in c.to_string().as_bytes() {
                    encoded.push_str(&format!("%{:02X}", byte));
                }
            }
        }
    }
    encoded
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_build_url_basic() {
        let url = build_url_with_query(
            "https://api.example.com/klines",
            &[("symbol", "BTCUSDT"), ("interval", "4h")],
        );
        assert_eq!(
            url,
            "https://api.example.com/klines?symbol=BTCUSDT&interval=4h"
        );
    }

    #[test]
    fn test_build_url_appends_to_existing_query() {
        let url = build_url_with_query("https://x.test/p?a=1", &[("b", "2")]);
        assert_eq!(url, "https://x.test/p?a=1&b=2");
    }

    #[test]
    fn test_encoding_special_characters() {
        let url = build_url_with_query("https://x.test/p", &[("q", "a b/c")]);
        assert_eq!(url, "https://x.test/p?q=a%20b%2Fc");
    }
}
