//! create_document / compile_document：把文档子系统暴露为工具

use std::collections::BTreeMap;
use std::sync::Arc;

use async_trait::async_trait;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::core::ToolError;
use crate::document::{CompilationStateMachine, DocumentAssembler, DocumentRequest};
use crate::sandbox::SandboxSet;
use crate::tools::schema::{parameters_schema, parse_args};
use crate::tools::{Tool, ToolKind};

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct CreateDocumentArgs {
    /// 模板名："article"、"presentation"，或 templates 目录下的自定义模板
    template_name: String,
    /// 章节文件路径（documents 区域内），按此顺序拼接进正文
    sections: Vec<String>,
    title: String,
    #[serde(default)]
    author: Option<String>,
    /// 日期文本，缺省为 \today
    #[serde(default)]
    date: Option<String>,
    /// 额外模板变量，例如 {"extra_preamble": "\\usepackage{amsmath}"}
    #[serde(default)]
    extra_vars: BTreeMap<String, String>,
    /// 输出文件（documents 区域内），缺省 "main.tex"
    #[serde(default)]
    output_path: Option<String>,
}

#[derive(Debug, Serialize)]
struct CreateOutcome<'a> {
    document_path: &'a str,
    template: &'a str,
    sections: &'a [String],
    byte_count: usize,
}

/// create_document 工具
pub struct CreateDocumentTool {
    assembler: Arc<DocumentAssembler>,
}

impl CreateDocumentTool {
    pub fn new(assembler: Arc<DocumentAssembler>) -> Self {
        Self { assembler }
    }
}

#[async_trait]
impl Tool for CreateDocumentTool {
    fn kind(&self) -> ToolKind {
        ToolKind::CreateDocument
    }

    fn description(&self) -> &str {
        "Render a LaTeX document from a template and an ordered list of section files in the documents area. Returns {document_path}."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<CreateDocumentArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: CreateDocumentArgs = parse_args(args)?;
        let request = DocumentRequest {
            template_name: args.template_name,
            sections: args.sections,
            title: args.title,
            author: args.author,
            date: args.date,
            extra_vars: args.extra_vars,
            output_path: args.output_path,
        };
        let draft = self.assembler.create_document(&request)?;
        let outcome = CreateOutcome {
            document_path: &draft.display_path,
            template: &draft.template,
            sections: &draft.sections,
            byte_count: draft.byte_count,
        };
        serde_json::to_value(outcome).map_err(|e| ToolError::Io(e.to_string()))
    }
}

#[derive(Debug, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
struct CompileDocumentArgs {
    /// 要编译的 .tex 文件（documents 区域内），通常是 create_document 返回的 document_path
    document_path: String,
}

#[derive(Debug, Serialize)]
struct CompileOutcome {
    pdf_path: String,
    log_summary: String,
    pass_count: usize,
}

/// compile_document 工具：驱动编译状态机，FAILED 映射为 CompilationFailed
pub struct CompileDocumentTool {
    sandboxes: Arc<SandboxSet>,
    machine: Arc<CompilationStateMachine>,
}

impl CompileDocumentTool {
    pub fn new(sandboxes: Arc<SandboxSet>, machine: Arc<CompilationStateMachine>) -> Self {
        Self { sandboxes, machine }
    }
}

#[async_trait]
impl Tool for CompileDocumentTool {
    fn kind(&self) -> ToolKind {
        ToolKind::CompileDocument
    }

    fn description(&self) -> &str {
        "Compile a .tex document in the documents area to PDF, rerunning the compiler as needed. Returns {pdf_path, log_summary, pass_count}."
    }

    fn parameters_schema(&self) -> Value {
        parameters_schema::<CompileDocumentArgs>()
    }

    async fn execute(&self, args: Value) -> Result<Value, ToolError> {
        let args: CompileDocumentArgs = parse_args(args)?;
        let docs = &self.sandboxes.documents;
        let path = docs.resolve(&args.document_path)?;
        if !path.is_file() {
            return Err(ToolError::NotFound(args.document_path.trim().to_string()));
        }
        tracing::info!(document = %docs.display_path(&path), "compile_document");

        let run = self.machine.compile(&path).await;
        match run.pdf_path.as_ref().filter(|_| run.is_done()) {
            Some(pdf) => {
                let outcome = CompileOutcome {
                    pdf_path: docs.display_path(pdf),
                    log_summary: run.log_summary.clone(),
                    pass_count: run.pass_count(),
                };
                serde_json::to_value(outcome).map_err(|e| ToolError::Io(e.to_string()))
            }
            None => Err(ToolError::CompilationFailed {
                passes: run.pass_count(),
                log_summary: run.log_summary,
            }),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::document::{DocumentCompiler, PassOutput};
    use serde_json::json;
    use std::path::Path;
    use tempfile::TempDir;

    struct WritesPdf;

    #[async_trait]
    impl DocumentCompiler for WritesPdf {
        async fn run_pass(&self, document: &Path, _pass: usize) -> Result<PassOutput, ToolError> {
            std::fs::write(document.with_extension("pdf"), b"%PDF").map_err(|e| ToolError::Io(e.to_string()))?;
            Ok(PassOutput {
                success: true,
                exit_code: Some(0),
                log: "Output written".into(),
            })
        }
    }

    struct Broken;

    #[async_trait]
    impl DocumentCompiler for Broken {
        async fn run_pass(&self, _document: &Path, _pass: usize) -> Result<PassOutput, ToolError> {
            Ok(PassOutput {
                success: false,
                exit_code: Some(1),
                log: "! Emergency stop.".into(),
            })
        }
    }

    fn tools(compiler: Arc<dyn DocumentCompiler>) -> (TempDir, Arc<SandboxSet>, CreateDocumentTool, CompileDocumentTool) {
        let dir = TempDir::new().unwrap();
        let set = Arc::new(
            SandboxSet::new(dir.path().join("p"), dir.path().join("d"), dir.path().join("t")).unwrap(),
        );
        let create = CreateDocumentTool::new(Arc::new(DocumentAssembler::new(set.clone()).unwrap()));
        let compile = CompileDocumentTool::new(
            set.clone(),
            Arc::new(CompilationStateMachine::new(compiler, 3)),
        );
        (dir, set, create, compile)
    }

    #[tokio::test]
    async fn test_create_then_compile() {
        let (_d, set, create, compile) = tools(Arc::new(WritesPdf));
        std::fs::write(set.documents.root().join("intro.tex"), "\\section{Intro}").unwrap();
        let out = create
            .execute(json!({"template_name": "article", "sections": ["intro.tex"], "title": "T"}))
            .await
            .unwrap();
        assert_eq!(out["document_path"], "main.tex");

        let out = compile
            .execute(json!({"document_path": "main.tex"}))
            .await
            .unwrap();
        assert_eq!(out["pdf_path"], "main.pdf");
        assert_eq!(out["pass_count"], 1);
    }

    #[tokio::test]
    async fn test_compile_failure_and_missing_document() {
        let (_d, set, _create, compile) = tools(Arc::new(Broken));
        std::fs::write(set.documents.root().join("main.tex"), "x").unwrap();
        match compile.execute(json!({"document_path": "main.tex"})).await {
            Err(ToolError::CompilationFailed { passes, log_summary }) => {
                assert_eq!(passes, 1);
                assert!(log_summary.contains("Emergency stop"));
            }
            other => panic!("unexpected: {other:?}"),
        }
        assert!(matches!(
            compile.execute(json!({"document_path": "other.tex"})).await,
            Err(ToolError::NotFound(_))
        ));
    }
}
