//! 研究团队构建器：由配置组装沙箱、工具注册表、各角色 LLM 与编排器
//!
//! 所有外部协作者（推理、搜索、抓取、编译）都可注入，未注入时按配置创建真实实现；
//! 测试用临时目录沙箱与桩实现即可完整构建。

use std::collections::HashMap;
use std::sync::Arc;

use crate::agents::{AgentRole, Orchestrator, SubAgent, SubAgents};
use crate::config::{process_env, AgentSection, AppConfig, KeyLookup};
use crate::core::AgentError;
use crate::document::{CompilationStateMachine, DocumentAssembler, DocumentCompiler, LatexCompiler};
use crate::llm::{create_llm_from_section, LlmClient};
use crate::sandbox::SandboxSet;
use crate::tools::{
    CompileDocumentTool, CreateDocumentTool, DuckDuckGoSearch, FetchPageTool, HttpFetcher,
    ListDirectoryTool, PageFetcher, ReadFileTool, SearchProvider, ToolRegistry, WebSearchTool,
    WriteFileTool,
};

/// 配置中的角色段名
pub const ORCHESTRATOR_ROLE: &str = "orchestrator";

pub struct ResearchBuilder {
    config: AppConfig,
    llms: HashMap<String, Arc<dyn LlmClient>>,
    search: Option<Arc<dyn SearchProvider>>,
    fetcher: Option<Arc<dyn PageFetcher>>,
    compiler: Option<Arc<dyn DocumentCompiler>>,
    sandboxes: Option<Arc<SandboxSet>>,
    key_lookup: KeyLookup,
}

impl ResearchBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            llms: HashMap::new(),
            search: None,
            fetcher: None,
            compiler: None,
            sandboxes: None,
            key_lookup: process_env,
        }
    }

    /// 为某个角色注入 LLM（角色名同配置段：orchestrator / web_search / web_page / writing）
    pub fn with_llm(mut self, role: &str, llm: Arc<dyn LlmClient>) -> Self {
        self.llms.insert(role.to_string(), llm);
        self
    }

    pub fn with_search_provider(mut self, provider: Arc<dyn SearchProvider>) -> Self {
        self.search = Some(provider);
        self
    }

    pub fn with_page_fetcher(mut self, fetcher: Arc<dyn PageFetcher>) -> Self {
        self.fetcher = Some(fetcher);
        self
    }

    pub fn with_compiler(mut self, compiler: Arc<dyn DocumentCompiler>) -> Self {
        self.compiler = Some(compiler);
        self
    }

    pub fn with_sandboxes(mut self, sandboxes: Arc<SandboxSet>) -> Self {
        self.sandboxes = Some(sandboxes);
        self
    }

    /// API Key 的环境变量来源（默认读取进程环境）
    pub fn with_key_lookup(mut self, lookup: KeyLookup) -> Self {
        self.key_lookup = lookup;
        self
    }

    fn llm_for(&self, role: &str, section: &AgentSection) -> Result<Arc<dyn LlmClient>, AgentError> {
        match self.llms.get(role) {
            Some(llm) => Ok(llm.clone()),
            None => create_llm_from_section(role, section, self.key_lookup),
        }
    }

    /// 完整工具注册表（每个 Agent 再按角色取子集）
    pub fn build_tool_registry(&self, sandboxes: &Arc<SandboxSet>) -> Result<ToolRegistry, AgentError> {
        let tools_cfg = &self.config.tools;
        let search: Arc<dyn SearchProvider> = match &self.search {
            Some(s) => s.clone(),
            None => Arc::new(DuckDuckGoSearch::new(&tools_cfg.search)?),
        };
        let fetcher: Arc<dyn PageFetcher> = match &self.fetcher {
            Some(f) => f.clone(),
            None => Arc::new(HttpFetcher::new(&tools_cfg.fetch)?),
        };
        let compiler: Arc<dyn DocumentCompiler> = match &self.compiler {
            Some(c) => c.clone(),
            None => Arc::new(LatexCompiler::new(&self.config.compile)),
        };

        let assembler = Arc::new(DocumentAssembler::new(sandboxes.clone())?);
        let machine = Arc::new(CompilationStateMachine::new(
            compiler,
            self.config.compile.max_passes,
        ));

        let mut tools = ToolRegistry::new();
        tools.register(WebSearchTool::new(search, tools_cfg.search.max_results));
        tools.register(FetchPageTool::new(
            fetcher,
            sandboxes.clone(),
            tools_cfg.fetch.max_chars,
        ));
        tools.register(ReadFileTool::new(sandboxes.clone()));
        tools.register(WriteFileTool::new(sandboxes.clone()));
        tools.register(ListDirectoryTool::new(
            sandboxes.clone(),
            tools_cfg.listing.clone(),
        ));
        tools.register(CreateDocumentTool::new(assembler));
        tools.register(CompileDocumentTool::new(sandboxes.clone(), machine));
        Ok(tools)
    }

    pub fn build(self) -> Result<Orchestrator, AgentError> {
        let sandboxes = match &self.sandboxes {
            Some(s) => s.clone(),
            None => Arc::new(
                SandboxSet::from_config(&self.config.sandbox)
                    .map_err(|e| AgentError::ConfigError(format!("sandbox: {e}")))?,
            ),
        };
        let tools = self.build_tool_registry(&sandboxes)?;
        let cfg = &self.config;

        let sub = |role: AgentRole, key: &str, section: &AgentSection| -> Result<SubAgent, AgentError> {
            Ok(SubAgent::new(
                role,
                self.llm_for(key, section)?,
                &tools,
                &section.additional_system_prompt,
                section.max_steps,
            ))
        };
        let sub_agents = SubAgents {
            web_search: sub(AgentRole::WebSearch, "web_search", &cfg.web_search)?,
            web_page: sub(AgentRole::WebPage, "web_page", &cfg.web_page)?,
            writing: sub(AgentRole::Writing, "writing", &cfg.writing)?,
        };

        let orchestrator = Orchestrator::new(
            self.llm_for(ORCHESTRATOR_ROLE, &cfg.orchestrator)?,
            sub_agents,
            &tools,
            &cfg.orchestrator.additional_system_prompt,
            cfg.orchestrator.max_steps,
        );
        tracing::info!(tools = tools.len(), "research team ready");
        Ok(orchestrator)
    }
}
