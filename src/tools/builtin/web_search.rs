//! `WebSearchTool`: `{query, max_results?, time_filter?, site?}`
//! → `[{title, url, snippet}]`. Tries a primary JSON API first, falling
//! back to HTML scraping of a provider with no API requirement; either
//! path is cached for 5 minutes keyed by the call's parameters.
//!
//! Adds a TTL cache and a two-provider fallback on top of the plain
//! search-tool shape bridged elsewhere in the ETP client.

use crate::tools::builtin::params::{opt_str, opt_u64, require_str};
use crate::tools::{AgentContext, Tool};
use crate::types::ToolResult;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const CACHE_TTL: Duration = Duration::from_secs(5 * 60);

type CacheKey = (String, Option<u64>, Option<String>, Option<String>);

pub struct WebSearchTool {
    client: reqwest::Client,
    api_key: Option<String>,
    cache: Mutex<HashMap<CacheKey, (Instant, serde_json::Value)>>,
}

impl WebSearchTool {
    pub fn new(api_key: Option<String>) -> Self {
        Self { client: reqwest::Client::new(), api_key, cache: Mutex::new(HashMap::new()) }
    }

    fn cache_get(&self, key: &CacheKey) -> Option<serde_json::Value> {
        let cache = self.cache.lock().unwrap();
        cache.get(key).and_then(|(at, value)| {
            if at.elapsed() < CACHE_TTL {
                Some(value.clone())
            } else {
                None
            }
        })
    }

    fn cache_put(&self, key: CacheKey, value: serde_json::Value) {
        self.cache.lock().unwrap().insert(key, (Instant::now(), value));
    }

    async fn search_primary(
        &self,
        query: &str,
        max_results: u64,
        time_filter: Option<&str>,
        site: Option<&str>,
    ) -> Result<serde_json::Value, String> {
        let Some(key) = &self.api_key else {
            return Err("no primary search API key configured".to_string());
        };
        let mut q = query.to_string();
        if let Some(site) = site {
            q = format!("{q} site:{site}");
        }
        let mut request = self
            .client
            .get("https://api.search.brave.com/res/v1/web/search")
            .header("X-Subscription-Token", key)
            .query(&[("q", q.as_str()), ("count", &max_results.to_string())]);
        if let Some(tf) = time_filter {
            request = request.query(&[("freshness", tf)]);
        }
        let response = request.send().await.map_err(|e| format!("primary search request failed: {e}"))?;
        if !response.status().is_success() {
            return Err(format!("primary search returned status {}", response.status()));
        }
        let body: serde_json::Value =
            response.json().await.map_err(|e| format!("primary search response parse failed: {e}"))?;

        let hits: Vec<serde_json::Value> = body
            .get("web")
            .and_then(|w| w.get("results"))
            .and_then(|r| r.as_array())
            .map(|results| {
                results
                    .iter()
                    .take(max_results as usize)
                    .map(|r| {
                        serde_json::json!({
                            "title": r.get("title").and_then(|v| v.as_str()).unwrap_or_default(),
                            "url": r.get("url").and_then(|v| v.as_str()).unwrap_or_default(),
                            "snippet": r.get("description").and_then(|v| v.as_str()).unwrap_or_default(),
                        })
                    })
                    .collect()
            })
            .unwrap_or_default();
        Ok(serde_json::json!(hits))
    }

    async fn search_fallback(&self, query: &str, max_results: u64) -> Result<serde_json::Value, String> {
        let url = format!("https://html.duckduckgo.com/html/?q={}", urlencoding_light(query));
        let response = self.client.get(&url).send().await.map_err(|e| format!("fallback search request failed: {e}"))?;
        let body = response.text().await.map_err(|e| format!("fallback search body read failed: {e}"))?;
        Ok(serde_json::json!(scrape_duckduckgo_html(&body, max_results as usize)))
    }
}

/// Minimal percent-encoding for query strings — avoids a dedicated
/// URL-encoding crate for the one field that needs it.
fn urlencoding_light(s: &str) -> String {
    s.chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | '~') {
                c.to_string()
            } else {
                format!("%{:02X}", c as u32)
            }
        })
        .collect()
}

/// Extracts `{title, url, snippet}` hits from DuckDuckGo's HTML-lite
/// results page. Deliberately tolerant: a markup change degrades to
/// fewer hits rather than a parse error.
fn scrape_duckduckgo_html(html: &str, max_results: usize) -> Vec<serde_json::Value> {
    let link_re = regex::Regex::new(r#"(?s)class="result__a"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#).unwrap();
    let snippet_re = regex::Regex::new(r#"(?s)class="result__snippet"[^>]*>(.*?)</a>"#).unwrap();
    let tag_re = regex::Regex::new(r"<[^>]+>").unwrap();

    let links: Vec<(String, String)> = link_re
        .captures_iter(html)
        .map(|c| (c[1].to_string(), tag_re.replace_all(&c[2], "").trim().to_string()))
        .collect();
    let snippets: Vec<String> = snippet_re
        .captures_iter(html)
        .map(|c| tag_re.replace_all(&c[1], "").trim().to_string())
        .collect();

    links
        .into_iter()
        .zip(snippets.into_iter().chain(std::iter::repeat(String::new())))
        .take(max_results)
        .map(|((url, title), snippet)| serde_json::json!({ "title": title, "url": url, "snippet": snippet }))
        .collect()
}

#[async_trait]
impl Tool for WebSearchTool {
    fn name(&self) -> String {
        "web_search".to_string()
    }

    fn description(&self) -> String {
        "Searches the web, falling back to a scraping provider if the primary API is unavailable.".to_string()
    }

    fn parameters_schema(&self) -> serde_json::Value {
        serde_json::json!({
            "type": "object",
            "properties": {
                "query": { "type": "string" },
                "max_results": { "type": "integer" },
                "time_filter": { "type": "string" },
                "site": { "type": "string" }
            },
            "required": ["query"]
        })
    }

    fn category(&self) -> String {
        "search".to_string()
    }

    async fn execute(&self, params: HashMap<String, serde_json::Value>, _ctx: &AgentContext) -> ToolResult {
        let call_id = "pending";
        let query = match require_str(&params, "query") {
            Ok(q) => q,
            Err(e) => return ToolResult::err(call_id, e, 0),
        };
        let max_results = opt_u64(&params, "max_results").unwrap_or(10);
        let time_filter = opt_str(&params, "time_filter").map(|s| s.to_string());
        let site = opt_str(&params, "site").map(|s| s.to_string());

        let key = (query.to_string(), Some(max_results), time_filter.clone(), site.clone());
        if let Some(cached) = self.cache_get(&key) {
            return ToolResult::ok(call_id, serde_json::json!({ "results": cached, "cached": true }), 0);
        }

        let start = std::time::Instant::now();
        let results = match self.search_primary(query, max_results, time_filter.as_deref(), site.as_deref()).await {
            Ok(hits) => hits,
            Err(primary_err) => {
                tracing::warn!(error = %primary_err, "primary web search failed, falling back");
                match self.search_fallback(query, max_results).await {
                    Ok(hits) => hits,
                    Err(fallback_err) => {
                        return ToolResult::err(
                            call_id,
                            format!("both search providers failed: primary={primary_err}; fallback={fallback_err}"),
                            start.elapsed().as_millis() as u64,
                        )
                    }
                }
            }
        };

        self.cache_put(key, results.clone());
        ToolResult::ok(
            call_id,
            serde_json::json!({ "results": results, "cached": false }),
            start.elapsed().as_millis() as u64,
        )
    }
}
