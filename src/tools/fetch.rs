//! fetch_page：抓取 URL 并把可读文本保存到 pages 沙箱
//!
//! HTML 用 html2text 提取可读文本（失败时回退到简易去标签），PDF 用 pdf-extract 抽取文本，
//! 纯文本原样保存；其他类型返回 UnsupportedContent。
//! 目标路径先经沙箱校验再发起网络请求，保存内容带来源 URL 与抓取时间，便于写作时引用。

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;
use html2text::from_read;
use reqwest::Client;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use crate::config::FetchSection;
use crate::core::ToolError;
use crate::sandbox::SandboxSet;
use crate::tools::filesystem::ensure_parent_dir;
use crate::tools::schema::{parameters_schema, parse_args};
use crate::tools::search::USER_AGENT;
use crate::tools::{Tool, ToolKind};

/// 一次抓取的原始结果
#[derive(Debug, Clone)]
pub struct FetchedPage {
    /// 跟随重定向后的最终 URL
    pub final_url: String,
    /// Content-Type 头（可能缺失）
    pub content_type: Option<String>,
    pub body: Vec<u8>,
}

/// 网页抓取能力（外部协作者）
#[async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, ToolError>;
}

/// reqwest 实现：浏览器 UA、请求超时
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(section: &FetchSection) -> Result<Self, ToolError> {
        use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static("text/html,application/xhtml+xml,application/pdf;q=0.9,*/*;q=0.8"),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en;q=0.9,*;q=0.5"));
        let client = Client::builder()
            .timeout(Duration::from_secs(section.timeout_secs))
            .user_agent(USER_AGENT)
            .default_headers(headers)
            .build()
            .map_err(|e| ToolError::Fetch(e.to_string()))?;
        Ok(Self { client })
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &Url) -> Result<FetchedPage, ToolError> {
        let resp = self
            .client
            .get(url.clone())
            .send()
            .await
            .map_err(|e| ToolError::Fetch(format!("request failed: {e}")))?;
        if !resp.status().is_success() {
            return Err(ToolError::Fetch(format!("HTTP {} for {url}", resp.status())));
        }
        let final_url = resp.url().to_string();
        let content_type = resp
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string);
        let body = resp
            .bytes()
            .await
            .map_err(|e| ToolError::Fetch(format!("read body: {e}")))?;
        Ok(FetchedPage {
            final_url,
            content_type,
            body: body.to_vec(),
        })
    }
}

/// 内容类别（决定转换方式）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ContentKind {
    Html,
    Pdf,
    Text,
}

/// 按 Content-Type 判断，缺失或过于笼统时嗅探内容
fn classify(content_type: Option<&str>, body: &[u8]) -> Result<ContentKind, String> {
    let mime = content_type
        .and_then(|c| c.split(';').next())
        .map(|m| m.trim().to_ascii_lowercase())
        .unwrap_or_default();
    match mime.as_str() {
        "text/html" | "application/xhtml+xml" => return Ok(ContentKind::Html),
        "application/pdf" | "application/x-pdf" => return Ok(ContentKind::Pdf),
        "" | "application/octet-stream" | "binary/octet-stream" => {}
        m if m.starts_with("text/") || m == "application/json" || m.ends_with("+xml") || m == "application/xml" => {
            return Ok(if looks_like_html(&String::from_utf8_lossy(body)) {
                ContentKind::Html
            } else {
                ContentKind::Text
            });
        }
        other => return Err(other.to_string()),
    }
    if body.starts_with(b"%PDF") {
        return Ok(ContentKind::Pdf);
    }
    match std::str::from_utf8(body) {
        Ok(s) if looks_like_html(s) => Ok(ContentKind::Html),
        Ok(_) => Ok(ContentKind::Text),
        Err(_) => Err(if mime.is_empty() { "unknown binary".to_string() } else { mime }),
    }
}

/// 判断内容是否像 HTML
fn looks_like_html(s: &str) -> bool {
    let s = s.trim_start_matches('\u{FEFF}').trim_start();
    let head: String = s.chars().take(512).collect::<String>().to_ascii_lowercase();
    head.starts_with("<!doctype html")
        || head.starts_with("<html")
        || (head.contains('<') && (head.contains("<head") || head.contains("<body") || head.contains("<title")))
}

/// 简易去除 HTML 标签（html2text 失败时的回退）
fn strip_html_tags(html: &str) -> String {
    let mut out = String::with_capacity(html.len());
    let mut in_tag = false;
    for c in html.chars() {
        match c {
            '<' => in_tag = true,
            '>' => {
                in_tag = false;
                out.push(' ');
            }
            _ if !in_tag => out.push(c),
            _ => {}
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn html_to_text(html: &[u8]) -> String {
    match from_read(html, 100) {
        Ok(text) if !text.trim().is_empty() => text,
        _ => strip_html_tags(&String::from_utf8_lossy(html)),
    }
}

/// PDF 文本抽取在阻塞线程中进行；解析器 panic 也视为不支持的内容
async fn pdf_to_text(body: Vec<u8>) -> Result<String, ToolError> {
    tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&body))
        .await
        .map_err(|_| ToolError::UnsupportedContent("unreadable PDF".to_string()))?
        .map_err(|e| ToolError::UnsupportedContent(format!("PDF text extraction failed: {e}")))
}

fn truncate_chars(text: String, max_chars: usize) -> String {
    if text.chars().count() > max_chars {
        text.chars().take(max_chars).collect::<String>() + "\n...[truncated]"
    } else {
        text
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct FetchPageArgs {
    /// 要抓取的 http(s) URL
    url: String,
    /// 保存位置，相对于 pages 根目录，例如 "notes/a.md"；已存在则覆盖
    destination_path: String,
}

/// fetch_page 的返回负载
#[derive(Debug, Serialize)]
struct FetchOutcome {
    path: String,
    byte_count: usize,
    content_type: String,
}

/// fetch_page 工具
pub struct FetchPageTool {
    fetcher: Arc<dyn PageFetcher>,
    sandboxes: Arc<SandboxSet>,
    max_chars: usize,
}

impl FetchPageTool {
    pub fn new(fetcher: Arc<dyn PageFetcher>, sandboxes: Arc<SandboxSet>, max_chars: usize) -> Self {
        Self {
            fetcher,
            sandboxes,
            max_chars: max_chars.max(1),
        }
    }
}

#[async_trait]
impl Tool for FetchPageTool {
    fn kind(&self) -> ToolKind {
        ToolKind::FetchPage
    }

    fn description(&self) -> &str {
        "Download a web page or PDF and save its readable text under the pages area. Returns {path, byte_count, content_type}."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<FetchPageArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: FetchPageArgs = parse_args(args)?;
        let url = Url::parse(args.url.trim())
            .map_err(|e| ToolError::InvalidArguments(format!("invalid url '{}': {e}", args.url)))?;
        if !matches!(url.scheme(), "http" | "https") {
            return Err(ToolError::InvalidArguments(format!(
                "unsupported url scheme: {}",
                url.scheme()
            )));
        }
        let sandbox = &self.sandboxes.pages;
        let destination = sandbox.resolve(&args.destination_path)?;
        if destination.is_dir() {
            return Err(ToolError::InvalidArguments(format!(
                "{} is a directory",
                args.destination_path.trim()
            )));
        }
        tracing::info!(url = %url, destination = %args.destination_path, "fetch_page");

        let page = self.fetcher.fetch(&url).await?;
        let kind = classify(page.content_type.as_deref(), &page.body)
            .map_err(ToolError::UnsupportedContent)?;
        let text = match kind {
            ContentKind::Html => html_to_text(&page.body),
            ContentKind::Pdf => pdf_to_text(page.body).await?,
            ContentKind::Text => String::from_utf8_lossy(&page.body).into_owned(),
        };
        if text.trim().is_empty() {
            return Err(ToolError::UnsupportedContent(
                "no readable text in response".to_string(),
            ));
        }

        let saved = format!(
            "Source: {}\nRetrieved: {}\n\n{}",
            page.final_url,
            Utc::now().to_rfc3339(),
            truncate_chars(text, self.max_chars)
        );
        ensure_parent_dir(&destination)?;
        tokio::fs::write(&destination, saved.as_bytes())
            .await
            .map_err(|e| ToolError::Io(e.to_string()))?;

        let content_type = page.content_type.unwrap_or_else(|| {
            match kind {
                ContentKind::Html => "text/html",
                ContentKind::Pdf => "application/pdf",
                ContentKind::Text => "text/plain",
            }
            .to_string()
        });
        let outcome = FetchOutcome {
            path: sandbox.display_path(&destination),
            byte_count: saved.len(),
            content_type,
        };
        serde_json::to_value(outcome).map_err(|e| ToolError::Io(e.to_string()))
    }
}
