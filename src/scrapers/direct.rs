//! Direct-channel acquisition tier.
//!
//! Issues lightweight API requests carrying pre-provisioned session
//! cookies, bypassing browser rendering entirely. Fastest tier, but the
//! first to die when the session expires: a 401/403 is a hard
//! authentication failure that is never retried.

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderValue};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::rate_limiter::{RateLimitConfig, RateLimiter};
use super::retry::RetryPolicy;
use super::{AcquireError, AcquisitionTier};
use crate::coordination::CoordinationStore;
use crate::models::{AcquisitionJob, JobKind, RawPayload};

const SEARCH_ENDPOINT: &str = "https://www.tiktok.com/api/search/general/full/";
const RECOMMEND_ENDPOINT: &str = "https://www.tiktok.com/api/recommend/item_list/";

/// Search terms used for trending acquisition, most productive first.
const TRENDING_KEYWORDS: &[&str] = &[
    "tiktokmademebuyit",
    "comprei no tiktok",
    "achados tiktok",
    "produtos virais",
];

/// Broader terms for full refresh batches.
const REFRESH_KEYWORDS: &[&str] = &[
    "tiktokmademebuyit",
    "moda feminina",
    "maquiagem viral",
    "gadgets",
    "achados casa",
];

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/119.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
];

/// One pre-provisioned session cookie.
///
/// Supplied by an external credential-provisioning process; this tier only
/// consumes them and surfaces expiry as an auth failure.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionToken {
    pub name: String,
    pub value: String,
    pub domain: String,
}

/// Direct API tier configuration.
#[derive(Debug, Clone)]
pub struct DirectTierConfig {
    pub timeout: Duration,
    pub retry: RetryPolicy,
    pub rate_limit: RateLimitConfig,
}

impl Default for DirectTierConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            retry: RetryPolicy::default(),
            rate_limit: RateLimitConfig::default(),
        }
    }
}

/// Pooled, rate-limited API client with session cookies.
pub struct DirectApiTier {
    client: reqwest::Client,
    tokens: Vec<SessionToken>,
    csrf_token: Option<String>,
    rate_limiter: RateLimiter,
    retry: RetryPolicy,
}

impl DirectApiTier {
    pub fn new(
        tokens: Vec<SessionToken>,
        store: Arc<dyn CoordinationStore>,
        config: DirectTierConfig,
    ) -> Self {
        let jar = reqwest::cookie::Jar::default();
        for token in &tokens {
            let cookie = format!("{}={}; Domain={}", token.name, token.value, token.domain);
            let origin = format!("https://{}", token.domain.trim_start_matches('.'));
            if let Ok(url) = origin.parse::<reqwest::Url>() {
                jar.add_cookie_str(&cookie, &url);
            }
        }

        let client = reqwest::Client::builder()
            .cookie_provider(Arc::new(jar))
            .timeout(config.timeout)
            .gzip(true)
            .brotli(true)
            .build()
            .expect("Failed to create HTTP client");

        let csrf_token = tokens
            .iter()
            .find(|t| t.name == "tt_csrf_token")
            .map(|t| t.value.clone());

        Self {
            client,
            tokens,
            csrf_token,
            rate_limiter: RateLimiter::new(store, config.rate_limit),
            retry: config.retry,
        }
    }

    fn headers(&self, referer: &str) -> HeaderMap {
        let mut rng = rand::thread_rng();
        let user_agent = USER_AGENTS
            .choose(&mut rng)
            .copied()
            .unwrap_or(USER_AGENTS[0]);

        let mut headers = HeaderMap::new();
        headers.insert("User-Agent", HeaderValue::from_static(user_agent));
        headers.insert(
            "Accept",
            HeaderValue::from_static("application/json, text/plain, */*"),
        );
        headers.insert(
            "Accept-Language",
            HeaderValue::from_static("pt-BR,pt;q=0.9,en;q=0.8"),
        );
        headers.insert(
            "Sec-Ch-Ua",
            HeaderValue::from_static(
                "\"Not_A Brand\";v=\"8\", \"Chromium\";v=\"120\", \"Google Chrome\";v=\"120\"",
            ),
        );
        headers.insert("Sec-Fetch-Dest", HeaderValue::from_static("empty"));
        headers.insert("Sec-Fetch-Mode", HeaderValue::from_static("cors"));
        headers.insert("Sec-Fetch-Site", HeaderValue::from_static("same-origin"));
        headers.insert("Origin", HeaderValue::from_static("https://www.tiktok.com"));
        if let Ok(value) = HeaderValue::from_str(referer) {
            headers.insert("Referer", value);
        }
        if let Some(csrf) = &self.csrf_token {
            if let Ok(value) = HeaderValue::from_str(csrf) {
                headers.insert("X-Secsdk-Csrf-Token", value);
            }
        }
        headers
    }

    /// Execute one request attempt and classify the outcome.
    async fn execute(request: reqwest::RequestBuilder) -> Result<serde_json::Value, AcquireError> {
        let response = request.send().await.map_err(|e| {
            if e.is_timeout() {
                AcquireError::Timeout
            } else {
                AcquireError::Network(e.to_string())
            }
        })?;

        let status = response.status().as_u16();
        match status {
            401 | 403 => return Err(AcquireError::Auth { status }),
            s if s >= 400 => return Err(AcquireError::Http(s)),
            _ => {}
        }

        let body = response
            .text()
            .await
            .map_err(|e| AcquireError::Network(e.to_string()))?;

        let data: serde_json::Value = match serde_json::from_str(&body) {
            Ok(v) => v,
            Err(_) => {
                // Some endpoints answer HTML when the session is challenged
                if body.to_lowercase().contains("captcha") {
                    return Err(AcquireError::Detection("captcha in response body".into()));
                }
                return Err(AcquireError::Api("invalid JSON response".into()));
            }
        };

        // Envelope-level errors ride on HTTP 200
        let envelope_status = data
            .get("statusCode")
            .or_else(|| data.get("status_code"))
            .and_then(|v| v.as_i64())
            .unwrap_or(0);
        if envelope_status != 0 && envelope_status != 200 {
            let msg = data
                .get("statusMsg")
                .or_else(|| data.get("message"))
                .and_then(|v| v.as_str())
                .unwrap_or("unknown error");
            return Err(AcquireError::Api(format!(
                "status {}: {}",
                envelope_status, msg
            )));
        }

        Ok(data)
    }

    async fn request_json(
        &mut self,
        family: &str,
        url: &str,
        params: &[(&str, String)],
        referer: &str,
    ) -> Result<serde_json::Value, AcquireError> {
        self.rate_limiter.acquire(family).await;

        let client = self.client.clone();
        let headers = self.headers(referer);
        let result = self
            .retry
            .run(|attempt| {
                let request = client
                    .get(url)
                    .query(params)
                    .headers(headers.clone());
                debug!("GET {} (attempt {})", url, attempt);
                Self::execute(request)
            })
            .await;

        match &result {
            Ok(_) => self.rate_limiter.report_success(family),
            Err(AcquireError::Http(429)) => self.rate_limiter.report_rate_limited(family),
            Err(_) => {}
        }

        result
    }

    /// Search items by keyword.
    async fn search_items(
        &mut self,
        keyword: &str,
        limit: usize,
    ) -> Result<Vec<serde_json::Value>, AcquireError> {
        let referer = format!(
            "https://www.tiktok.com/search?q={}",
            urlencoding::encode(keyword)
        );
        let params = [
            ("keyword", keyword.to_string()),
            ("offset", "0".to_string()),
            ("count", limit.min(30).to_string()),
        ];

        let data = self
            .request_json("search", SEARCH_ENDPOINT, &params, &referer)
            .await?;

        let mut items = Vec::new();
        if let Some(entries) = data.get("data").and_then(|v| v.as_array()) {
            for entry in entries {
                // type 1 entries are item results; the record lives under "item"
                if entry.get("type").and_then(|v| v.as_i64()) == Some(1) {
                    if let Some(item) = entry.get("item") {
                        items.push(item.clone());
                    }
                }
            }
        }
        Ok(items)
    }

    /// Pull the recommendation feed.
    async fn recommend_items(&mut self, limit: usize) -> Result<Vec<serde_json::Value>, AcquireError> {
        let params = [("count", limit.min(30).to_string())];
        let data = self
            .request_json(
                "recommend",
                RECOMMEND_ENDPOINT,
                &params,
                "https://www.tiktok.com/",
            )
            .await?;

        let items = data
            .get("itemList")
            .or_else(|| data.get("item_list"))
            .and_then(|v| v.as_array())
            .cloned()
            .unwrap_or_default();
        Ok(items)
    }

    /// Fan out over keywords until the limit is reached, then deduplicate.
    async fn keyword_sweep(
        &mut self,
        keywords: &[&str],
        limit: usize,
    ) -> Result<Vec<serde_json::Value>, AcquireError> {
        let mut items = Vec::new();
        let mut last_error = None;

        for keyword in keywords {
            match self.search_items(keyword, limit).await {
                Ok(found) => items.extend(found),
                // Hard failures abort the sweep; soft ones move on
                Err(e @ (AcquireError::Auth { .. } | AcquireError::Detection(_))) => {
                    return Err(e);
                }
                Err(e) => {
                    debug!("Search '{}' failed: {}", keyword, e);
                    last_error = Some(e);
                }
            }
            if items.len() >= limit {
                break;
            }
        }

        if items.len() < limit {
            match self.recommend_items(limit - items.len()).await {
                Ok(found) => items.extend(found),
                Err(e @ (AcquireError::Auth { .. } | AcquireError::Detection(_))) => {
                    return Err(e);
                }
                Err(e) => {
                    debug!("Recommend feed failed: {}", e);
                    last_error = Some(e);
                }
            }
        }

        if items.is_empty() {
            if let Some(e) = last_error {
                return Err(e);
            }
        }

        dedup_by_id(&mut items);
        items.truncate(limit);
        Ok(items)
    }
}

/// Drop later duplicates of the same item id.
fn dedup_by_id(items: &mut Vec<serde_json::Value>) {
    let mut seen = std::collections::HashSet::new();
    items.retain(|item| {
        let id = item
            .get("id")
            .or_else(|| item.get("aweme_id"))
            .and_then(|v| v.as_str())
            .map(str::to_string);
        match id {
            Some(id) => seen.insert(id),
            // Items without an id are dropped by the normalizer anyway
            None => true,
        }
    });
}

#[async_trait]
impl AcquisitionTier for DirectApiTier {
    fn name(&self) -> &'static str {
        "direct_api"
    }

    async fn acquire(&mut self, job: &AcquisitionJob) -> Result<Vec<RawPayload>, AcquireError> {
        // An empty credential set is an expired session, not an empty result
        if self.tokens.is_empty() {
            return Err(AcquireError::Auth { status: 401 });
        }

        let items = match job.kind {
            JobKind::Trending => self.keyword_sweep(TRENDING_KEYWORDS, job.limit).await?,
            JobKind::RefreshBatch => self.keyword_sweep(REFRESH_KEYWORDS, job.limit).await?,
            JobKind::Category => {
                let category = job.target_category.as_deref().unwrap_or("geral");
                let mut items = self.search_items(category, job.limit).await?;
                dedup_by_id(&mut items);
                items.truncate(job.limit);
                items
            }
        };

        info!(
            "Direct tier acquired {} items for job {}",
            items.len(),
            job.id
        );
        Ok(items.into_iter().map(RawPayload::ApiJson).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::coordination::MemoryStore;
    use serde_json::json;

    fn tier(tokens: Vec<SessionToken>) -> DirectApiTier {
        DirectApiTier::new(
            tokens,
            Arc::new(MemoryStore::new()),
            DirectTierConfig::default(),
        )
    }

    #[tokio::test]
    async fn test_empty_session_is_auth_failure() {
        let mut tier = tier(Vec::new());
        let job = AcquisitionJob::new(JobKind::Trending, None, 10);
        let result = tier.acquire(&job).await;
        assert!(matches!(result, Err(AcquireError::Auth { status: 401 })));
    }

    #[test]
    fn test_csrf_token_extracted() {
        let tier = tier(vec![
            SessionToken {
                name: "sessionid".into(),
                value: "abc".into(),
                domain: ".tiktok.com".into(),
            },
            SessionToken {
                name: "tt_csrf_token".into(),
                value: "csrf123".into(),
                domain: ".tiktok.com".into(),
            },
        ]);
        assert_eq!(tier.csrf_token.as_deref(), Some("csrf123"));
        let headers = tier.headers("https://www.tiktok.com/");
        assert_eq!(
            headers.get("X-Secsdk-Csrf-Token").unwrap().to_str().unwrap(),
            "csrf123"
        );
    }

    #[test]
    fn test_dedup_by_id() {
        let mut items = vec![
            json!({"id": "1", "desc": "a"}),
            json!({"id": "2", "desc": "b"}),
            json!({"id": "1", "desc": "duplicate"}),
            json!({"desc": "no id"}),
        ];
        dedup_by_id(&mut items);
        assert_eq!(items.len(), 3);
        assert_eq!(items[0]["desc"], "a");
        assert_eq!(items[1]["desc"], "b");
        assert_eq!(items[2]["desc"], "no id");
    }
}
