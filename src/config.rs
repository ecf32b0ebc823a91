//! 应用配置：从 TOML 文件与环境变量加载
//!
//! 加载顺序：先读配置文件（默认 `<XDG config>/cheap_research/config.toml`），
//! 再用环境变量 `CHEAP_RESEARCH__*` 覆盖（双下划线表示嵌套，如 `CHEAP_RESEARCH__WRITING__MAX_STEPS=15`）。
//! 配置文件不存在时写出一份默认配置，`initialized = false` 提示用户先填写；
//! 已有文件缺少的条目在启动时补上默认值并写回。

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// 环境变量前缀
pub const ENV_PREFIX: &str = "CHEAP_RESEARCH";

const DEFAULT_BASE_URL: &str = "https://openrouter.ai/api/v1";

/// API Key 的环境变量回退（按顺序）
pub const API_KEY_ENV_VARS: [&str; 2] = ["OPENROUTER_API_KEY", "OPENAI_API_KEY"];

/// 按名称读取环境变量；构建时可替换（测试不依赖进程环境）
pub type KeyLookup = fn(&str) -> Option<String>;

/// 读取进程环境变量
pub fn process_env(name: &str) -> Option<String> {
    std::env::var(name).ok()
}

const ORCHESTRATOR_PROMPT: &str = "As an expert PhD-level researcher, you coordinate a team of research assistant agents \
with specialized tools to gather and analyze information on a given topic. Your goal is to produce a \
comprehensive and well-researched report on the topic.\n\
Ensure that all information is appropriately cited and that the report is well-structured and easy to read. \
All citations must be verified by your research assistants.\n\
Break up your research into smaller tasks and delegate them. The workflow should be:\n\
 1. Gather relevant information with the web_search_agent. Prefer academic sources.\n\
 2. Use the web_page_agent to visit the web pages and save their content to files, one page per task.\n\
 3. If there is insufficient information, repeat steps 1 and 2.\n\
 4. Plan the structure of the report and the content of each section.\n\
 5. Use the writing_agent to create a .bib file with all the citations.\n\
 6. Use the writing_agent to write each section or slide in a separate .tex file.\n\
 7. Combine all the sections with create_document and build the PDF with compile_document.";

const WEB_SEARCH_PROMPT: &str = "Respond in a very concise manner. Ensure that your responses are as short as possible \
while retaining all necessary information.\n\
Make sure to include the full URL of any web pages you collect.";

const WEB_PAGE_PROMPT: &str = "Respond in a very concise manner. Ensure that your responses are as short as possible \
while retaining all necessary information.\n\
When requested to save a web page, use the fetch_page tool to save the page content to the specified location. \
Default to markdown files for web page content and choose descriptive filenames based on the page title or URL. \
Include the filename in your response.";

const WRITING_PROMPT: &str = "As a specialized writing assistant, you can read files, list available files, \
and create new files with content.\n\
When writing content, follow these guidelines:\n\
- Use clear, concise language appropriate for the requested content type\n\
- Properly attribute any sources used in your writing\n\
- Always save files with appropriate extensions (.md, .tex, .bib, etc.)\n\
- You will be asked to write partial LaTeX documents, so do not include the \\documentclass or \
\\begin{document} commands unless requested to do so.";

/// 应用配置根（对应配置文件的顶层）
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    /// 用户填写完配置后需手动改为 true
    pub initialized: bool,
    pub app: AppSection,
    pub orchestrator: AgentSection,
    pub web_search: AgentSection,
    pub web_page: AgentSection,
    pub writing: AgentSection,
    pub sandbox: SandboxSection,
    pub tools: ToolsSection,
    pub compile: CompileSection,
}

/// [app] 段：交互会话参数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AppSection {
    /// 交互模式下保留的历史轮数
    pub max_context_turns: usize,
}

impl Default for AppSection {
    fn default() -> Self {
        Self {
            max_context_turns: 10,
        }
    }
}

/// 单个 Agent 角色的配置：推理模型、凭据、步数预算、追加提示词
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AgentSection {
    pub model: String,
    pub api_key: Option<String>,
    pub base_url: Option<String>,
    pub max_steps: usize,
    pub additional_system_prompt: String,
}

impl Default for AgentSection {
    fn default() -> Self {
        Self {
            model: "mistralai/mistral-small-24b-instruct-2501".to_string(),
            api_key: None,
            base_url: None,
            max_steps: 10,
            additional_system_prompt: String::new(),
        }
    }
}

impl AgentSection {
    fn with_prompt(mut self, prompt: &str) -> Self {
        self.additional_system_prompt = prompt.to_string();
        self
    }

    /// 推理端点；未配置时走 OpenRouter
    pub fn base_url(&self) -> &str {
        self.base_url.as_deref().unwrap_or(DEFAULT_BASE_URL)
    }

    /// API Key：配置优先，其次 OPENROUTER_API_KEY / OPENAI_API_KEY
    pub fn resolve_api_key(&self) -> Option<String> {
        self.resolve_api_key_with(process_env)
    }

    pub fn resolve_api_key_with(&self, lookup: KeyLookup) -> Option<String> {
        let usable = |k: &String| !k.trim().is_empty();
        self.api_key.clone().filter(usable).or_else(|| {
            API_KEY_ENV_VARS
                .iter()
                .find_map(|name| lookup(name).filter(usable))
        })
    }
}

/// [sandbox] 段：三个沙箱根目录
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SandboxSection {
    pub pages_root: PathBuf,
    pub documents_root: PathBuf,
    pub templates_root: PathBuf,
}

impl Default for SandboxSection {
    fn default() -> Self {
        Self {
            pages_root: PathBuf::from("saved_pages"),
            documents_root: PathBuf::from("latex"),
            templates_root: PathBuf::from("templates"),
        }
    }
}

/// [tools] 段
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsSection {
    pub search: SearchSection,
    pub fetch: FetchSection,
    pub listing: ListingSection,
}

/// [tools.search] 段
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchSection {
    pub endpoint: String,
    pub timeout_secs: u64,
    pub max_results: usize,
}

impl Default for SearchSection {
    fn default() -> Self {
        Self {
            endpoint: "https://html.duckduckgo.com/html/".to_string(),
            timeout_secs: 15,
            max_results: 10,
        }
    }
}

/// [tools.fetch] 段：抓取超时与保存文本的最大字符数
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FetchSection {
    pub timeout_secs: u64,
    pub max_chars: usize,
}

impl Default for FetchSection {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            max_chars: 200_000,
        }
    }
}

/// [tools.listing] 段：list_directory 是否附带大小与修改时间
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ListingSection {
    pub show_file_sizes: bool,
    pub show_modification_times: bool,
}

impl Default for ListingSection {
    fn default() -> Self {
        Self {
            show_file_sizes: true,
            show_modification_times: true,
        }
    }
}

/// [compile] 段：外部排版编译器
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CompileSection {
    pub command: String,
    pub args: Vec<String>,
    /// 检测到参考文献标记时在下一遍之前运行（如 bibtex）
    pub bibliography_command: Option<String>,
    pub max_passes: usize,
}

impl Default for CompileSection {
    fn default() -> Self {
        Self {
            command: "pdflatex".to_string(),
            args: vec![
                "-interaction=nonstopmode".to_string(),
                "-halt-on-error".to_string(),
                "-file-line-error".to_string(),
            ],
            bibliography_command: Some("bibtex".to_string()),
            max_passes: 4,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            initialized: false,
            app: AppSection::default(),
            orchestrator: AgentSection {
                model: "anthropic/claude-3.7-sonnet".to_string(),
                max_steps: 20,
                ..AgentSection::default()
            }
            .with_prompt(ORCHESTRATOR_PROMPT),
            web_search: AgentSection::default().with_prompt(WEB_SEARCH_PROMPT),
            web_page: AgentSection::default().with_prompt(WEB_PAGE_PROMPT),
            writing: AgentSection {
                max_steps: 15,
                ..AgentSection::default()
            }
            .with_prompt(WRITING_PROMPT),
            sandbox: SandboxSection::default(),
            tools: ToolsSection::default(),
            compile: CompileSection::default(),
        }
    }
}

impl AppConfig {
    /// 启动前校验：未初始化、缺少 API Key、步数为 0 均为致命错误
    pub fn validate(&self) -> Result<(), String> {
        if !self.initialized {
            return Err(
                "configuration is not initialized; edit the config file and set initialized = true"
                    .to_string(),
            );
        }
        for (role, section) in self.agent_sections() {
            if section.resolve_api_key().is_none() {
                return Err(format!(
                    "missing api_key for [{role}] (or set OPENROUTER_API_KEY)"
                ));
            }
            if section.max_steps == 0 {
                return Err(format!("[{role}].max_steps must be at least 1"));
            }
        }
        if self.compile.max_passes == 0 {
            return Err("[compile].max_passes must be at least 1".to_string());
        }
        Ok(())
    }

    fn agent_sections(&self) -> [(&'static str, &AgentSection); 4] {
        [
            ("orchestrator", &self.orchestrator),
            ("web_search", &self.web_search),
            ("web_page", &self.web_page),
            ("writing", &self.writing),
        ]
    }
}

/// 默认配置文件路径：`<XDG config>/cheap_research/config.toml`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|d| d.join("cheap_research").join("config.toml"))
}

/// 配置文件不存在时写出默认配置；返回是否新建
pub fn ensure_config_file(path: &Path) -> std::io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let body = toml::to_string_pretty(&AppConfig::default())
        .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e))?;
    std::fs::write(path, body)?;
    tracing::info!(path = %path.display(), "wrote default configuration");
    Ok(true)
}

/// 补齐配置文件中缺失的条目（取默认值），逐条记录日志并写回文件；返回补上的键路径
pub fn ensure_defaults(path: &Path) -> std::io::Result<Vec<String>> {
    let invalid = |e: String| std::io::Error::new(std::io::ErrorKind::InvalidData, e);
    let text = std::fs::read_to_string(path)?;
    let mut current: toml::Table = text.parse().map_err(|e: toml::de::Error| invalid(e.to_string()))?;
    let defaults = match toml::Value::try_from(AppConfig::default()) {
        Ok(toml::Value::Table(t)) => t,
        Ok(_) => return Err(invalid("default configuration is not a table".to_string())),
        Err(e) => return Err(invalid(e.to_string())),
    };

    let mut added = Vec::new();
    merge_missing(&mut current, &defaults, "", &mut added);
    if added.is_empty() {
        return Ok(added);
    }
    for key in &added {
        tracing::info!(key = %key, "added missing configuration entry");
    }
    let body = toml::to_string_pretty(&current).map_err(|e| invalid(e.to_string()))?;
    std::fs::write(path, body)?;
    tracing::info!(path = %path.display(), added = added.len(), "configuration file updated with default values");
    Ok(added)
}

fn merge_missing(current: &mut toml::Table, defaults: &toml::Table, prefix: &str, added: &mut Vec<String>) {
    for (key, default) in defaults {
        let key_path = if prefix.is_empty() {
            key.clone()
        } else {
            format!("{prefix}.{key}")
        };
        match current.get_mut(key) {
            None => {
                current.insert(key.clone(), default.clone());
                added.push(key_path);
            }
            Some(toml::Value::Table(inner)) => {
                if let toml::Value::Table(default_inner) = default {
                    merge_missing(inner, default_inner, &key_path, added);
                }
            }
            Some(_) => {}
        }
    }
}

/// 从配置文件加载配置，环境变量 CHEAP_RESEARCH__* 可覆盖
pub fn load_config(path: &Path) -> Result<AppConfig, config::ConfigError> {
    let c = config::Config::builder()
        .add_source(config::File::from(path.to_path_buf()).required(true))
        .add_source(
            config::Environment::with_prefix(ENV_PREFIX)
                .separator("__")
                .try_parsing(true),
        )
        .build()?;
    c.try_deserialize()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config_round_trips_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("cfg/config.toml");
        assert!(ensure_config_file(&path).unwrap());
        assert!(!ensure_config_file(&path).unwrap());

        let cfg = load_config(&path).unwrap();
        assert!(!cfg.initialized);
        assert_eq!(cfg.orchestrator.max_steps, 20);
        assert_eq!(cfg.web_search.max_steps, 10);
        assert_eq!(cfg.compile.max_passes, 4);
        assert!(cfg.orchestrator.additional_system_prompt.contains("writing_agent"));
        assert_eq!(cfg.sandbox.pages_root, PathBuf::from("saved_pages"));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "initialized = true\n[writing]\nmodel = \"m\"\napi_key = \"k\"\nmax_steps = 3\n[compile]\nmax_passes = 2\n",
        )
        .unwrap();
        let cfg = load_config(&path).unwrap();
        assert!(cfg.initialized);
        assert_eq!(cfg.writing.model, "m");
        assert_eq!(cfg.writing.max_steps, 3);
        assert_eq!(cfg.writing.api_key.as_deref(), Some("k"));
        assert_eq!(cfg.compile.max_passes, 2);
        assert_eq!(cfg.compile.command, "pdflatex");
        assert_eq!(cfg.tools.search.max_results, 10);
    }

    #[test]
    fn test_ensure_defaults_fills_partial_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(
            &path,
            "initialized = true\n[writing]\nmodel = \"m\"\nmax_steps = 3\n[tools.search]\nmax_results = 5\n",
        )
        .unwrap();

        let added = ensure_defaults(&path).unwrap();
        assert!(added.contains(&"compile".to_string()));
        assert!(added.contains(&"writing.additional_system_prompt".to_string()));
        assert!(added.contains(&"tools.search.endpoint".to_string()));
        assert!(added.contains(&"tools.fetch".to_string()));
        assert!(!added.iter().any(|k| k == "writing.model" || k == "initialized"));

        // 用户的值保留，补上的默认值已写回文件
        let written: toml::Table = std::fs::read_to_string(&path).unwrap().parse().unwrap();
        assert_eq!(written["writing"]["model"].as_str(), Some("m"));
        assert_eq!(written["tools"]["search"]["max_results"].as_integer(), Some(5));
        assert_eq!(written["compile"]["max_passes"].as_integer(), Some(4));

        assert!(ensure_defaults(&path).unwrap().is_empty());
        let cfg = load_config(&path).unwrap();
        assert_eq!(cfg.writing.max_steps, 3);
        assert_eq!(cfg.tools.search.max_results, 5);
    }

    #[test]
    fn test_api_key_lookup_order() {
        let mut section = AgentSection::default();
        assert_eq!(section.resolve_api_key_with(|_| None), None);
        assert_eq!(
            section.resolve_api_key_with(|name| (name == "OPENAI_API_KEY").then(|| "oa".to_string())),
            Some("oa".to_string())
        );
        assert_eq!(
            section.resolve_api_key_with(|name| Some(format!("{name}-value"))),
            Some("OPENROUTER_API_KEY-value".to_string())
        );
        section.api_key = Some("  ".to_string());
        assert_eq!(section.resolve_api_key_with(|_| Some(String::new())), None);
        section.api_key = Some("cfg".to_string());
        assert_eq!(section.resolve_api_key_with(|_| Some("env".to_string())), Some("cfg".to_string()));
    }

    #[test]
    fn test_validate_requires_initialized() {
        let cfg = AppConfig::default();
        let err = cfg.validate().unwrap_err();
        assert!(err.contains("initialized"));
    }

    #[test]
    fn test_validate_rejects_zero_budget() {
        let mut cfg = AppConfig::default();
        cfg.initialized = true;
        for section in [
            &mut cfg.orchestrator,
            &mut cfg.web_search,
            &mut cfg.web_page,
            &mut cfg.writing,
        ] {
            section.api_key = Some("key".to_string());
        }
        assert!(cfg.validate().is_ok());
        cfg.web_page.max_steps = 0;
        assert!(cfg.validate().unwrap_err().contains("web_page"));
    }
}
