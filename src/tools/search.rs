//! web_search：搜索引擎结果（标题 / URL / 摘要，按排名）
//!
//! 搜索引擎本身是外部协作者（SearchProvider）；默认实现请求 DuckDuckGo 的 HTML 端点，
//! 用正则抽取结果块。上游失败一律映射为 SearchUnavailable，该工具不触碰沙箱。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::config::SearchSection;
use crate::core::ToolError;
use crate::tools::schema::{parameters_schema, parse_args};
use crate::tools::{Tool, ToolKind};

/// 浏览器 UA，避免被识别为爬虫
pub(crate) const USER_AGENT: &str = "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/131.0.0.0 Safari/537.36";

/// 一条搜索结果
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SearchHit {
    pub title: String,
    pub url: String,
    pub snippet: String,
}

/// 搜索能力（外部协作者）
#[async_trait]
pub trait SearchProvider: Send + Sync {
    /// 返回按相关度排序的结果，最多 max_results 条
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, ToolError>;
}

/// DuckDuckGo HTML 搜索
pub struct DuckDuckGoSearch {
    client: Client,
    endpoint: String,
    result_re: Regex,
    snippet_re: Regex,
    tag_re: Regex,
}

impl DuckDuckGoSearch {
    pub fn new(section: &SearchSection) -> Result<Self, ToolError> {
        let client = Client::builder()
            .timeout(Duration::from_secs(section.timeout_secs))
            .user_agent(USER_AGENT)
            .build()
            .map_err(|e| ToolError::SearchUnavailable(e.to_string()))?;
        let re = |p: &str| Regex::new(p).map_err(|e| ToolError::SearchUnavailable(e.to_string()));
        Ok(Self {
            client,
            endpoint: section.endpoint.clone(),
            result_re: re(r#"(?s)<a[^>]*class="result__a"[^>]*href="([^"]+)"[^>]*>(.*?)</a>"#)?,
            snippet_re: re(r#"(?s)class="result__snippet"[^>]*>(.*?)</(?:a|div|td)>"#)?,
            tag_re: re(r"<[^>]+>")?,
        })
    }

    /// 解析结果页：每个标题链接到下一个标题链接之间是一条结果，摘要只在该区间内查找
    fn parse_results(&self, html: &str, max_results: usize) -> Vec<SearchHit> {
        let links: Vec<_> = self.result_re.captures_iter(html).collect();
        let mut hits = Vec::new();
        for (i, caps) in links.iter().enumerate() {
            if hits.len() >= max_results {
                break;
            }
            let Some(whole) = caps.get(0) else { continue };
            let block_end = links
                .get(i + 1)
                .and_then(|next| next.get(0))
                .map(|m| m.start())
                .unwrap_or(html.len());
            let Some(url) = resolve_result_url(&decode_entities(&caps[1])) else {
                continue;
            };
            let snippet = self
                .snippet_re
                .captures(&html[whole.end()..block_end])
                .map(|c| self.clean_text(&c[1]))
                .unwrap_or_default();
            hits.push(SearchHit {
                title: self.clean_text(&caps[2]),
                url,
                snippet,
            });
        }
        hits
    }

    fn clean_text(&self, fragment: &str) -> String {
        let text = self.tag_re.replace_all(fragment, "");
        decode_entities(&text)
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

#[async_trait]
impl SearchProvider for DuckDuckGoSearch {
    async fn search(&self, query: &str, max_results: usize) -> Result<Vec<SearchHit>, ToolError> {
        let mut url = Url::parse(&self.endpoint)
            .map_err(|e| ToolError::SearchUnavailable(format!("bad endpoint: {e}")))?;
        url.query_pairs_mut().append_pair("q", query);

        let resp = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| ToolError::SearchUnavailable(format!("request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(ToolError::SearchUnavailable(format!("HTTP {}", resp.status())));
        }
        let html = resp
            .text()
            .await
            .map_err(|e| ToolError::SearchUnavailable(format!("read body: {e}")))?;
        Ok(self.parse_results(&html, max_results))
    }
}

/// 结果链接可能是 DuckDuckGo 跳转链接（/l/?uddg=<目标>），取出真实目标
fn resolve_result_url(href: &str) -> Option<String> {
    let absolute = if href.starts_with("//") {
        format!("https:{href}")
    } else if href.starts_with('/') {
        format!("https://duckduckgo.com{href}")
    } else {
        href.to_string()
    };
    let parsed = Url::parse(&absolute).ok()?;
    if let Some((_, target)) = parsed.query_pairs().find(|(k, _)| k == "uddg") {
        return Some(target.into_owned());
    }
    matches!(parsed.scheme(), "http" | "https").then(|| parsed.to_string())
}

/// 常见 HTML 实体解码
fn decode_entities(s: &str) -> String {
    s.replace("&amp;", "&")
        .replace("&quot;", "\"")
        .replace("&#x27;", "'")
        .replace("&#39;", "'")
        .replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&nbsp;", " ")
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct WebSearchArgs {
    /// 搜索查询
    query: String,
    /// 最多返回的结果数（默认取配置值）
    #[serde(default)]
    max_results: Option<usize>,
}

/// 带排名的结果项（工具输出）
#[derive(Debug, Serialize)]
struct RankedHit<'a> {
    rank: usize,
    title: &'a str,
    url: &'a str,
    snippet: &'a str,
}

/// web_search 工具
pub struct WebSearchTool {
    provider: Arc<dyn SearchProvider>,
    default_max_results: usize,
}

impl WebSearchTool {
    pub fn new(provider: Arc<dyn SearchProvider>, default_max_results: usize) -> Self {
        Self {
            provider,
            default_max_results: default_max_results.max(1),
        }
    }
}

#[async_trait]
impl Tool for WebSearchTool {
    fn kind(&self) -> ToolKind {
        ToolKind::WebSearch
    }

    fn description(&self) -> &str {
        "Search the web. Returns a ranked list of {rank, title, url, snippet}."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<WebSearchArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: WebSearchArgs = parse_args(args)?;
        let query = args.query.trim();
        if query.is_empty() {
            return Err(ToolError::InvalidArguments("query must not be empty".to_string()));
        }
        let max = args
            .max_results
            .unwrap_or(self.default_max_results)
            .clamp(1, self.default_max_results.max(20));
        tracing::info!(query = %query, max_results = max, "web_search");

        let hits = self.provider.search(query, max).await?;
        let ranked: Vec<RankedHit<'_>> = hits
            .iter()
            .take(max)
            .enumerate()
            .map(|(i, h)| RankedHit {
                rank: i + 1,
                title: &h.title,
                url: &h.url,
                snippet: &h.snippet,
            })
            .collect();
        serde_json::to_value(ranked).map_err(|e| ToolError::Io(e.to_string()))
    }
}
