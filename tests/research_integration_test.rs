//! 研究流程集成测试：桩实现的推理 / 抓取 / 搜索 / 编译 + 临时目录沙箱

#[cfg(test)]
mod tests {
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    use async_trait::async_trait;
    use cheap_research::config::AppConfig;
    use cheap_research::document::{DocumentCompiler, PassOutput};
    use cheap_research::llm::MockLlmClient;
    use cheap_research::sandbox::SandboxSet;
    use cheap_research::tools::{
        FetchedPage, PageFetcher, SearchHit, SearchProvider, ToolExecutor, ToolKind,
    };
    use cheap_research::{ResearchBuilder, ToolError};
    use serde_json::json;
    use tempfile::TempDir;
    use url::Url;

    const PAGE: &str = "<html><head><title>Widgets</title></head>\
                        <body><h1>Widgets</h1><p>Widgets are small useful devices.</p></body></html>";

    #[derive(Default)]
    struct StubFetcher {
        hits: AtomicUsize,
    }

    #[async_trait]
    impl PageFetcher for StubFetcher {
        async fn fetch(&self, url: &Url) -> Result<FetchedPage, ToolError> {
            self.hits.fetch_add(1, Ordering::SeqCst);
            Ok(FetchedPage {
                final_url: url.to_string(),
                content_type: Some("text/html; charset=utf-8".to_string()),
                body: PAGE.as_bytes().to_vec(),
            })
        }
    }

    struct StubSearch;

    #[async_trait]
    impl SearchProvider for StubSearch {
        async fn search(&self, query: &str, _max: usize) -> Result<Vec<SearchHit>, ToolError> {
            Ok(vec![SearchHit {
                title: format!("About {query}"),
                url: "https://example.com/a.html".to_string(),
                snippet: "widgets".to_string(),
            }])
        }
    }

    /// 每遍写出 PDF，并返回固定日志
    struct StubCompiler {
        log: &'static str,
        passes: AtomicUsize,
    }

    impl StubCompiler {
        fn new(log: &'static str) -> Self {
            Self {
                log,
                passes: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl DocumentCompiler for StubCompiler {
        async fn run_pass(&self, document: &Path, _pass: usize) -> Result<PassOutput, ToolError> {
            self.passes.fetch_add(1, Ordering::SeqCst);
            std::fs::write(document.with_extension("pdf"), b"%PDF-1.5 stub")
                .map_err(|e| ToolError::Io(e.to_string()))?;
            Ok(PassOutput {
                success: true,
                exit_code: Some(0),
                log: self.log.to_string(),
            })
        }
    }

    fn config(dir: &TempDir) -> AppConfig {
        let mut config = AppConfig::default();
        config.initialized = true;
        config.sandbox.pages_root = dir.path().join("saved_pages");
        config.sandbox.documents_root = dir.path().join("latex");
        config.sandbox.templates_root = dir.path().join("templates");
        config
    }

    fn mock(replies: &[&str]) -> Arc<MockLlmClient> {
        Arc::new(MockLlmClient::new(replies.iter().map(|s| s.to_string())))
    }

    fn builder(
        config: AppConfig,
        fetcher: Arc<StubFetcher>,
        compiler: Arc<StubCompiler>,
        llms: [Arc<MockLlmClient>; 4],
    ) -> ResearchBuilder {
        let [orchestrator, web_search, web_page, writing] = llms;
        ResearchBuilder::new(config)
            .with_search_provider(Arc::new(StubSearch))
            .with_page_fetcher(fetcher)
            .with_compiler(compiler)
            .with_llm("orchestrator", orchestrator)
            .with_llm("web_search", web_search)
            .with_llm("web_page", web_page)
            .with_llm("writing", writing)
    }

    #[tokio::test]
    async fn test_fetch_then_summarize_end_to_end() {
        let dir = TempDir::new().unwrap();
        let orchestrator_llm = mock(&[
            r#"{"tool": "delegate", "args": {"agent": "web_page_agent", "task": "Save https://example.com/a.html as notes/a.md"}}"#,
            r#"{"tool": "delegate", "args": {"agent": "writing_agent", "task": "Read notes/a.md from the pages area and summarize it"}}"#,
            "Widgets are small useful devices (source: notes/a.md).",
        ]);
        let web_page_llm = mock(&[
            r#"{"tool": "fetch_page", "args": {"url": "https://example.com/a.html", "destination_path": "notes/a.md"}}"#,
            "Saved notes/a.md",
        ]);
        let writing_llm = mock(&[
            r#"{"tool": "read_file", "args": {"path": "notes/a.md"}}"#,
            "Widgets are small useful devices.",
        ]);
        let fetcher = Arc::new(StubFetcher::default());
        let orchestrator = builder(
            config(&dir),
            fetcher.clone(),
            Arc::new(StubCompiler::new("")),
            [orchestrator_llm.clone(), mock(&[]), web_page_llm.clone(), writing_llm.clone()],
        )
        .build()
        .unwrap();

        let answer = orchestrator
            .run("save https://example.com/a.html as notes/a.md and summarize it", &[])
            .await;
        assert_eq!(answer, "Widgets are small useful devices (source: notes/a.md).");

        let saved = dir.path().join("saved_pages/notes/a.md");
        let content = std::fs::read_to_string(&saved).unwrap();
        assert!(!content.trim().is_empty());
        assert!(content.contains("Widgets are small useful devices."));
        assert_eq!(fetcher.hits.load(Ordering::SeqCst), 1);

        // 写作 Agent 读到了保存的页面
        let writing_calls = writing_llm.calls();
        let observation = &writing_calls[1].last().unwrap().content;
        assert!(observation.starts_with("Observation from read_file:"));
        assert!(observation.contains("Source: https://example.com/a.html"));

        // 编排器收到了子 Agent 的答案
        let orch_calls = orchestrator_llm.calls();
        assert!(orch_calls[2]
            .last()
            .unwrap()
            .content
            .contains("writing_agent answered:\nWidgets are small useful devices."));
        assert_eq!(web_page_llm.call_count(), 2);
    }

    #[tokio::test]
    async fn test_create_and_compile_document_end_to_end() {
        let dir = TempDir::new().unwrap();
        let orchestrator_llm = mock(&[
            r#"{"tool": "create_document", "args": {"template_name": "article", "sections": ["intro.tex", "methods.tex"], "title": "T"}}"#,
            r#"{"tool": "compile_document", "args": {"document_path": "main.tex"}}"#,
            "The report is at main.pdf.",
        ]);
        let compiler = Arc::new(StubCompiler::new("Output written on main.pdf (2 pages)."));
        let orchestrator = builder(
            config(&dir),
            Arc::new(StubFetcher::default()),
            compiler.clone(),
            [orchestrator_llm.clone(), mock(&[]), mock(&[]), mock(&[])],
        );
        let docs = dir.path().join("latex");
        std::fs::create_dir_all(&docs).unwrap();
        std::fs::write(docs.join("intro.tex"), "\\section{Introduction}\nIntro text.").unwrap();
        std::fs::write(docs.join("methods.tex"), "\\section{Methods}\nMethod text.").unwrap();

        let answer = orchestrator.build().unwrap().run("write the report", &[]).await;
        assert_eq!(answer, "The report is at main.pdf.");

        let tex = std::fs::read_to_string(docs.join("main.tex")).unwrap();
        assert!(tex.contains("\\title{T}"));
        assert!(tex.find("Intro text.").unwrap() < tex.find("Method text.").unwrap());
        assert!(docs.join("main.pdf").is_file());
        assert_eq!(compiler.passes.load(Ordering::SeqCst), 1);

        let compile_observation = orchestrator_llm.calls()[2].last().unwrap().content.clone();
        assert!(compile_observation.contains("\"pdf_path\": \"main.pdf\""));
        assert!(compile_observation.contains("\"pass_count\": 1"));
    }

    fn tool_executor(dir: &TempDir, compiler: Arc<StubCompiler>, fetcher: Arc<StubFetcher>) -> (Arc<SandboxSet>, ToolExecutor) {
        let config = config(dir);
        let sandboxes = Arc::new(SandboxSet::from_config(&config.sandbox).unwrap());
        let registry = builder(config, fetcher, compiler, [mock(&[]), mock(&[]), mock(&[]), mock(&[])])
            .build_tool_registry(&sandboxes)
            .unwrap();
        (sandboxes, ToolExecutor::new(registry))
    }

    #[tokio::test]
    async fn test_missing_section_never_reaches_compiler() {
        let dir = TempDir::new().unwrap();
        let compiler = Arc::new(StubCompiler::new(""));
        let (sandboxes, exec) = tool_executor(&dir, compiler.clone(), Arc::new(StubFetcher::default()));
        std::fs::write(sandboxes.documents.root().join("intro.tex"), "x").unwrap();

        let created = exec
            .execute(
                "create_document",
                json!({"template_name": "article", "sections": ["intro.tex", "methods.tex"], "title": "T"}),
            )
            .await;
        assert!(!created.ok);
        assert!(matches!(created.error, Some(ToolError::NotFound(_))));
        assert!(!created.output.trim().is_empty());

        let compiled = exec
            .execute("compile_document", json!({"document_path": "main.tex"}))
            .await;
        assert!(matches!(compiled.error, Some(ToolError::NotFound(_))));
        assert_eq!(compiler.passes.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn test_perpetual_rerun_fails_at_configured_max() {
        let dir = TempDir::new().unwrap();
        let compiler = Arc::new(StubCompiler::new(
            "LaTeX Warning: Label(s) may have changed. Rerun to get cross-references right.",
        ));
        let (sandboxes, exec) = tool_executor(&dir, compiler.clone(), Arc::new(StubFetcher::default()));
        std::fs::write(sandboxes.documents.root().join("main.tex"), "\\documentclass{article}").unwrap();

        let result = exec
            .execute("compile_document", json!({"document_path": "main.tex"}))
            .await;
        match result.error {
            Some(ToolError::CompilationFailed { passes, log_summary }) => {
                assert_eq!(passes, AppConfig::default().compile.max_passes);
                assert!(!log_summary.is_empty());
            }
            other => panic!("unexpected {other:?}"),
        }
        assert_eq!(
            compiler.passes.load(Ordering::SeqCst),
            AppConfig::default().compile.max_passes
        );
    }

    #[tokio::test]
    async fn test_restricted_toolset_cannot_fetch() {
        let dir = TempDir::new().unwrap();
        let fetcher = Arc::new(StubFetcher::default());
        let (sandboxes, full) = tool_executor(&dir, Arc::new(StubCompiler::new("")), fetcher.clone());
        let restricted = ToolExecutor::new(
            full.registry()
                .restricted(&[ToolKind::ReadFile, ToolKind::ListDirectory]),
        );

        let result = restricted
            .execute(
                "fetch_page",
                json!({"url": "https://example.com/a.html", "destination_path": "a.md"}),
            )
            .await;
        assert!(!result.ok);
        assert!(matches!(result.error, Some(ToolError::ToolNotAvailable(_))));
        assert_eq!(fetcher.hits.load(Ordering::SeqCst), 0);
        assert!(!sandboxes.pages.root().join("a.md").exists());

        let listed = restricted.execute("list_directory", json!({})).await;
        assert!(listed.ok);
    }

    #[tokio::test]
    async fn test_write_read_round_trip_through_executor() {
        let dir = TempDir::new().unwrap();
        let (_sandboxes, exec) = tool_executor(&dir, Arc::new(StubCompiler::new("")), Arc::new(StubFetcher::default()));
        let body = "@article{k, title={Ü}}\n";

        let first = exec
            .execute("write_file", json!({"path": "refs.bib", "content": body}))
            .await;
        assert!(first.ok, "{}", first.output);
        let second = exec
            .execute("write_file", json!({"path": "refs.bib", "content": "x"}))
            .await;
        assert!(matches!(second.error, Some(ToolError::AlreadyExists(_))));

        let read = exec
            .execute("read_file", json!({"path": "refs.bib", "area": "documents"}))
            .await;
        assert_eq!(read.output, body);

        let escape = exec
            .execute("read_file", json!({"path": "../latex/refs.bib"}))
            .await;
        assert!(matches!(escape.error, Some(ToolError::PathEscape(_))));
    }

    #[tokio::test]
    async fn test_web_search_agent_returns_ranked_results() {
        let dir = TempDir::new().unwrap();
        let web_search_llm = mock(&[
            r#"{"tool": "web_search", "args": {"query": "widgets"}}"#,
            "1. About widgets - https://example.com/a.html",
        ]);
        let orchestrator = builder(
            config(&dir),
            Arc::new(StubFetcher::default()),
            Arc::new(StubCompiler::new("")),
            [mock(&[]), web_search_llm.clone(), mock(&[]), mock(&[])],
        )
        .build()
        .unwrap();

        let run = orchestrator
            .delegate(cheap_research::AgentRole::WebSearch, "find pages about widgets")
            .await;
        assert!(run.is_answer());
        assert!(run.tool_results[0].ok);
        assert!(run.tool_results[0].output.contains("\"rank\": 1"));
        assert_eq!(web_search_llm.call_count(), 2);
    }
}
