//! 多遍编译状态机
//!
//! PENDING → RUNNING → { NEEDS_RERUN → RUNNING … | DONE | FAILED }
//!
//! 每遍调用一次外部编译器（DocumentCompiler），从日志中检测需要重跑的标记；
//! 有标记且未达最大遍数则重跑（必要时先跑参考文献命令），标记在最大遍数时仍存在即 FAILED。
//! 辅助文件（.aux/.log/.toc 等）保留不清理，调用方只拿到 PDF 路径与精简日志。

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::Arc;

use async_trait::async_trait;
use regex::Regex;
use tokio::process::Command;

use crate::config::CompileSection;
use crate::core::ToolError;

/// 单遍编译的原始输出
#[derive(Debug, Clone)]
pub struct PassOutput {
    /// 编译器是否报告成功（退出码 0）
    pub success: bool,
    pub exit_code: Option<i32>,
    /// 本遍日志（.log 文件或进程输出）
    pub log: String,
}

/// 外部排版编译器（外部协作者）
#[async_trait]
pub trait DocumentCompiler: Send + Sync {
    /// 对文档执行一遍编译；进程无法启动等情况返回 Err
    async fn run_pass(&self, document: &Path, pass: usize) -> Result<PassOutput, ToolError>;

    /// 运行参考文献处理（如 bibtex）；默认不做任何事
    async fn run_bibliography(&self, _document: &Path) -> Result<(), ToolError> {
        Ok(())
    }
}

/// 通过 tokio::process 调用 pdflatex 之类的命令，在文档所在目录内执行
pub struct LatexCompiler {
    command: String,
    args: Vec<String>,
    bibliography_command: Option<String>,
}

impl LatexCompiler {
    pub fn new(section: &CompileSection) -> Self {
        Self {
            command: section.command.clone(),
            args: section.args.clone(),
            bibliography_command: section.bibliography_command.clone(),
        }
    }
}

fn split_document(document: &Path) -> Result<(PathBuf, String, String), ToolError> {
    let dir = document
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("."));
    let file = document
        .file_name()
        .map(|f| f.to_string_lossy().to_string())
        .ok_or_else(|| ToolError::InvalidArguments("document path has no file name".into()))?;
    let stem = document
        .file_stem()
        .map(|f| f.to_string_lossy().to_string())
        .unwrap_or_else(|| file.clone());
    Ok((dir, file, stem))
}

#[async_trait]
impl DocumentCompiler for LatexCompiler {
    async fn run_pass(&self, document: &Path, pass: usize) -> Result<PassOutput, ToolError> {
        let (dir, file, stem) = split_document(document)?;
        tracing::debug!(command = %self.command, pass, document = %file, "compiler pass");
        let output = Command::new(&self.command)
            .args(&self.args)
            .arg(&file)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ToolError::CompilationFailed {
                passes: pass,
                log_summary: format!("failed to start {}: {e}", self.command),
            })?;

        let log = match tokio::fs::read_to_string(dir.join(format!("{stem}.log"))).await {
            Ok(log) => log,
            Err(_) => format!(
                "{}{}",
                String::from_utf8_lossy(&output.stdout),
                String::from_utf8_lossy(&output.stderr)
            ),
        };
        Ok(PassOutput {
            success: output.status.success(),
            exit_code: output.status.code(),
            log,
        })
    }

    async fn run_bibliography(&self, document: &Path) -> Result<(), ToolError> {
        let Some(command) = &self.bibliography_command else {
            return Ok(());
        };
        let (dir, _, stem) = split_document(document)?;
        let output = Command::new(command)
            .arg(&stem)
            .current_dir(&dir)
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| ToolError::Io(format!("failed to start {command}: {e}")))?;
        if !output.status.success() {
            return Err(ToolError::Io(format!(
                "{command} exited with {}",
                output.status
            )));
        }
        Ok(())
    }
}

/// 需要重跑的日志标记
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RerunMarker {
    CrossReferences,
    Outlines,
    LabelsChanged,
    UndefinedReferences,
    UndefinedCitations,
    RunBibtex,
    RunBiber,
    MissingToc,
    MissingBibliography,
}

impl RerunMarker {
    /// 检测日志中的全部标记（按枚举顺序，去重）
    pub fn detect(log: &str) -> Vec<RerunMarker> {
        let missing_toc = Regex::new(r"No file [^\s]+\.toc").ok();
        let missing_bbl = Regex::new(r"No file [^\s]+\.bbl").ok();
        let found = |m: RerunMarker| match m {
            RerunMarker::CrossReferences => log.contains("Rerun to get cross-references right"),
            RerunMarker::Outlines => log.contains("Rerun to get outlines right"),
            RerunMarker::LabelsChanged => log.contains("Label(s) may have changed"),
            RerunMarker::UndefinedReferences => log.contains("There were undefined references"),
            RerunMarker::UndefinedCitations => log.contains("There were undefined citations"),
            RerunMarker::RunBibtex => log.contains("Please (re)run BibTeX"),
            RerunMarker::RunBiber => log.contains("Please (re)run Biber"),
            RerunMarker::MissingToc => missing_toc.as_ref().is_some_and(|r| r.is_match(log)),
            RerunMarker::MissingBibliography => missing_bbl.as_ref().is_some_and(|r| r.is_match(log)),
        };
        Self::ALL.into_iter().filter(|m| found(*m)).collect()
    }

    pub const ALL: [RerunMarker; 9] = [
        RerunMarker::CrossReferences,
        RerunMarker::Outlines,
        RerunMarker::LabelsChanged,
        RerunMarker::UndefinedReferences,
        RerunMarker::UndefinedCitations,
        RerunMarker::RunBibtex,
        RerunMarker::RunBiber,
        RerunMarker::MissingToc,
        RerunMarker::MissingBibliography,
    ];

    /// 该标记是否意味着需要先处理参考文献
    pub fn needs_bibliography(&self) -> bool {
        matches!(
            self,
            RerunMarker::UndefinedCitations
                | RerunMarker::RunBibtex
                | RerunMarker::RunBiber
                | RerunMarker::MissingBibliography
        )
    }
}

impl fmt::Display for RerunMarker {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RerunMarker::CrossReferences => "cross-references changed",
            RerunMarker::Outlines => "outlines changed",
            RerunMarker::LabelsChanged => "labels may have changed",
            RerunMarker::UndefinedReferences => "undefined references",
            RerunMarker::UndefinedCitations => "undefined citations",
            RerunMarker::RunBibtex => "BibTeX requested",
            RerunMarker::RunBiber => "Biber requested",
            RerunMarker::MissingToc => "table of contents not yet generated",
            RerunMarker::MissingBibliography => "bibliography not yet generated",
        };
        f.write_str(s)
    }
}

/// 编译状态
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompileState {
    Pending,
    Running { pass: usize },
    NeedsRerun { pass: usize, markers: Vec<RerunMarker> },
    Done,
    Failed,
}

/// 一次编译器调用的记录
#[derive(Debug, Clone)]
pub struct CompilationAttempt {
    pub pass: usize,
    pub success: bool,
    pub exit_code: Option<i32>,
    pub markers: Vec<RerunMarker>,
    /// 本遍之后参考文献处理失败时的错误
    pub bibliography_error: Option<String>,
}

/// 一次完整的编译过程
#[derive(Debug, Clone)]
pub struct CompilationRun {
    /// 依次经过的状态（首个为 Pending，最后为 Done 或 Failed）
    pub transitions: Vec<CompileState>,
    pub attempts: Vec<CompilationAttempt>,
    /// 仅在 Done 时存在
    pub pdf_path: Option<PathBuf>,
    pub log_summary: String,
}

impl CompilationRun {
    pub fn state(&self) -> &CompileState {
        self.transitions.last().unwrap_or(&CompileState::Pending)
    }

    pub fn is_done(&self) -> bool {
        *self.state() == CompileState::Done
    }

    pub fn pass_count(&self) -> usize {
        self.attempts.len()
    }

    fn enter(&mut self, state: CompileState) {
        tracing::debug!(?state, "compile state");
        self.transitions.push(state);
    }

    fn fail(mut self, reason: String, log: &str) -> Self {
        let bib_errors = self
            .attempts
            .iter()
            .filter_map(|a| {
                a.bibliography_error
                    .as_ref()
                    .map(|e| format!("bibliography pass after pass {} failed: {e}", a.pass))
            })
            .collect::<Vec<_>>();
        self.log_summary = if bib_errors.is_empty() {
            format!("{reason}\n{}", summarize_log(log))
        } else {
            format!("{reason}\n{}\n{}", bib_errors.join("\n"), summarize_log(log))
        };
        self.enter(CompileState::Failed);
        tracing::warn!(passes = self.pass_count(), reason = %reason, "compilation failed");
        self
    }
}

pub struct CompilationStateMachine {
    compiler: Arc<dyn DocumentCompiler>,
    max_passes: usize,
}

impl CompilationStateMachine {
    pub fn new(compiler: Arc<dyn DocumentCompiler>, max_passes: usize) -> Self {
        Self {
            compiler,
            max_passes: max_passes.max(1),
        }
    }

    /// 编译文档直到 DONE 或 FAILED；遍数不超过 max_passes
    pub async fn compile(&self, document: &Path) -> CompilationRun {
        let mut run = CompilationRun {
            transitions: vec![CompileState::Pending],
            attempts: Vec::new(),
            pdf_path: None,
            log_summary: String::new(),
        };

        let mut pass = 0;
        loop {
            pass += 1;
            run.enter(CompileState::Running { pass });
            let output = match self.compiler.run_pass(document, pass).await {
                Ok(o) => o,
                Err(e) => return run.fail(e.to_string(), ""),
            };
            let markers = RerunMarker::detect(&output.log);
            run.attempts.push(CompilationAttempt {
                pass,
                success: output.success,
                exit_code: output.exit_code,
                markers: markers.clone(),
                bibliography_error: None,
            });
            tracing::info!(pass, success = output.success, markers = markers.len(), "compiler pass finished");

            if !output.success {
                let code = output
                    .exit_code
                    .map(|c| c.to_string())
                    .unwrap_or_else(|| "signal".to_string());
                return run.fail(
                    format!("compiler reported a fatal error on pass {pass} (exit {code})"),
                    &output.log,
                );
            }

            if markers.is_empty() {
                let pdf = document.with_extension("pdf");
                if !pdf.is_file() {
                    return run.fail(
                        format!("compiler finished but produced no {}", display_name(&pdf)),
                        &output.log,
                    );
                }
                run.log_summary = summarize_log(&output.log);
                run.pdf_path = Some(pdf);
                run.enter(CompileState::Done);
                return run;
            }

            if pass >= self.max_passes {
                let list = markers
                    .iter()
                    .map(ToString::to_string)
                    .collect::<Vec<_>>()
                    .join(", ");
                return run.fail(
                    format!("rerun still required after {pass} pass(es): {list}"),
                    &output.log,
                );
            }

            if markers.iter().any(RerunMarker::needs_bibliography) {
                if let Err(e) = self.compiler.run_bibliography(document).await {
                    tracing::warn!(pass, error = %e, "bibliography pass failed");
                    if let Some(attempt) = run.attempts.last_mut() {
                        attempt.bibliography_error = Some(e.to_string());
                    }
                }
            }
            run.enter(CompileState::NeedsRerun { pass, markers });
        }
    }
}

fn display_name(path: &Path) -> String {
    path.file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_default()
}

/// 精简日志：先收集错误块（`!` 开头或 file:line: 形式的行及其后两行），剩余额度再放警告行；
/// 都没有时取末尾若干行
pub fn summarize_log(log: &str) -> String {
    const MAX_LINES: usize = 40;
    let file_line_error = Regex::new(r"^[^\s:]+:\d+: ").ok();
    let lines: Vec<&str> = log.lines().collect();

    let mut errors: Vec<&str> = Vec::new();
    let mut warnings: Vec<&str> = Vec::new();
    let mut i = 0;
    while i < lines.len() {
        let line = lines[i];
        let is_error = line.starts_with('!')
            || file_line_error.as_ref().is_some_and(|r| r.is_match(line));
        if is_error {
            errors.extend(lines.iter().skip(i).take(3).copied());
            i += 3;
            continue;
        }
        if line.contains("Warning:") {
            warnings.push(line);
        }
        i += 1;
    }

    let mut picked: Vec<&str> = errors.into_iter().take(MAX_LINES).collect();
    let room = MAX_LINES - picked.len();
    picked.extend(warnings.into_iter().take(room));

    if picked.is_empty() {
        picked = lines
            .iter()
            .rev()
            .filter(|l| !l.trim().is_empty())
            .take(15)
            .copied()
            .collect();
        picked.reverse();
    }
    let summary = picked.join("\n");
    if summary.trim().is_empty() {
        "(no compiler output)".to_string()
    } else {
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;
    use tempfile::TempDir;

    /// 依次返回预设日志；成功的遍会写出 PDF
    struct Scripted {
        logs: Mutex<Vec<(bool, String)>>,
        passes: Mutex<usize>,
        bib_runs: Mutex<usize>,
        bib_fails: bool,
    }

    impl Scripted {
        fn new(logs: &[(bool, &str)]) -> Self {
            Self {
                logs: Mutex::new(logs.iter().rev().map(|(s, l)| (*s, l.to_string())).collect()),
                passes: Mutex::new(0),
                bib_runs: Mutex::new(0),
                bib_fails: false,
            }
        }
    }

    #[async_trait]
    impl DocumentCompiler for Scripted {
        async fn run_pass(&self, document: &Path, _pass: usize) -> Result<PassOutput, ToolError> {
            *self.passes.lock().unwrap() += 1;
            let mut logs = self.logs.lock().unwrap();
            let (success, log) = if logs.len() > 1 {
                logs.pop().unwrap()
            } else {
                logs[0].clone()
            };
            if success {
                std::fs::write(document.with_extension("pdf"), b"%PDF-1.5").unwrap();
            }
            Ok(PassOutput {
                success,
                exit_code: Some(if success { 0 } else { 1 }),
                log,
            })
        }

        async fn run_bibliography(&self, _document: &Path) -> Result<(), ToolError> {
            *self.bib_runs.lock().unwrap() += 1;
            if self.bib_fails {
                return Err(ToolError::Io("bibtex: I couldn't open file name `main.aux'".to_string()));
            }
            Ok(())
        }
    }

    fn doc() -> (TempDir, PathBuf) {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("main.tex");
        std::fs::write(&path, "\\documentclass{article}").unwrap();
        (dir, path)
    }

    #[test]
    fn test_detect_known_markers() {
        let cases = [
            ("LaTeX Warning: Label(s) may have changed. Rerun to get cross-references right.", vec![RerunMarker::CrossReferences, RerunMarker::LabelsChanged]),
            ("Package rerunfilecheck Warning: File `main.out' has changed.\n(rerunfilecheck) Rerun to get outlines right", vec![RerunMarker::Outlines]),
            ("LaTeX Warning: There were undefined references.", vec![RerunMarker::UndefinedReferences]),
            ("LaTeX Warning: There were undefined citations.", vec![RerunMarker::UndefinedCitations]),
            ("Package biblatex Warning: Please (re)run Biber on the file:", vec![RerunMarker::RunBiber]),
            ("Please (re)run BibTeX on the file(s):", vec![RerunMarker::RunBibtex]),
            ("No file main.toc.", vec![RerunMarker::MissingToc]),
            ("No file report.bbl.", vec![RerunMarker::MissingBibliography]),
            ("Output written on main.pdf (3 pages).", vec![]),
        ];
        for (log, expected) in cases {
            assert_eq!(RerunMarker::detect(log), expected, "log: {log}");
        }
        assert!(RerunMarker::RunBibtex.needs_bibliography());
        assert!(!RerunMarker::MissingToc.needs_bibliography());
    }

    #[tokio::test]
    async fn test_clean_log_is_done_after_one_pass() {
        let (_d, path) = doc();
        let compiler = Arc::new(Scripted::new(&[(true, "Output written on main.pdf")]));
        let run = CompilationStateMachine::new(compiler.clone(), 4).compile(&path).await;
        assert!(run.is_done());
        assert_eq!(run.pass_count(), 1);
        assert_eq!(
            run.transitions,
            vec![CompileState::Pending, CompileState::Running { pass: 1 }, CompileState::Done]
        );
        assert_eq!(run.pdf_path, Some(path.with_extension("pdf")));
    }

    #[tokio::test]
    async fn test_rerun_then_done_runs_bibliography() {
        let (_d, path) = doc();
        let compiler = Arc::new(Scripted::new(&[
            (true, "No file main.bbl.\nThere were undefined citations."),
            (true, "Label(s) may have changed. Rerun to get cross-references right."),
            (true, "Output written on main.pdf"),
        ]));
        let run = CompilationStateMachine::new(compiler.clone(), 4).compile(&path).await;
        assert!(run.is_done());
        assert_eq!(run.pass_count(), 3);
        assert_eq!(*compiler.bib_runs.lock().unwrap(), 1);
        assert!(matches!(
            run.transitions[2],
            CompileState::NeedsRerun { pass: 1, .. }
        ));
    }

    #[tokio::test]
    async fn test_persistent_markers_fail_at_max_passes() {
        let (_d, path) = doc();
        let compiler = Arc::new(Scripted::new(&[(true, "Rerun to get cross-references right.")]));
        let run = CompilationStateMachine::new(compiler.clone(), 3).compile(&path).await;
        assert_eq!(*run.state(), CompileState::Failed);
        assert_eq!(run.pass_count(), 3);
        assert_eq!(*compiler.passes.lock().unwrap(), 3);
        assert!(run.pdf_path.is_none());
        assert!(run.log_summary.contains("after 3 pass(es)"));
    }

    #[tokio::test]
    async fn test_fatal_error_fails_immediately() {
        let (_d, path) = doc();
        let log = "This is pdfTeX\n./main.tex:12: Undefined control sequence.\nl.12 \\foo\n\nmore\n";
        let compiler = Arc::new(Scripted::new(&[(false, log)]));
        let run = CompilationStateMachine::new(compiler, 4).compile(&path).await;
        assert_eq!(*run.state(), CompileState::Failed);
        assert_eq!(run.pass_count(), 1);
        assert!(run.log_summary.contains("Undefined control sequence"));
    }

    #[test]
    fn test_summarize_log() {
        assert_eq!(summarize_log(""), "(no compiler output)");
        let log = "line a\n! LaTeX Error: File `x.sty' not found.\nType X to quit\nl.3\nLaTeX Warning: Reference `a' undefined\nend";
        let s = summarize_log(log);
        assert!(s.starts_with("! LaTeX Error"));
        assert!(s.contains("l.3"));
        assert!(s.contains("Reference `a' undefined"));
        assert!(!s.contains("line a"));
        assert_eq!(summarize_log("just\nsome\noutput"), "just\nsome\noutput");
    }

    #[test]
    fn test_summary_keeps_error_after_many_warnings() {
        let mut log = String::new();
        for i in 0..50 {
            log.push_str(&format!("LaTeX Font Warning: Font shape `T1/cmr/m/n' undefined on input line {i}.\n"));
        }
        log.push_str("./main.tex:99: Undefined control sequence.\nl.99 \\bogus\n");
        let s = summarize_log(&log);
        assert!(s.starts_with("./main.tex:99: Undefined control sequence."));
        assert!(s.contains("l.99"));
        assert_eq!(s.lines().count(), 40);
    }

    #[tokio::test]
    async fn test_bibliography_failure_reaches_summary() {
        let (_d, path) = doc();
        let mut scripted = Scripted::new(&[(true, "LaTeX Warning: There were undefined citations.")]);
        scripted.bib_fails = true;
        let compiler = Arc::new(scripted);
        let run = CompilationStateMachine::new(compiler.clone(), 2).compile(&path).await;
        assert_eq!(*run.state(), CompileState::Failed);
        assert!(run.attempts[0].bibliography_error.is_some());
        assert!(run.log_summary.contains("bibliography pass after pass 1 failed"));
        assert!(run.log_summary.contains("main.aux"));
    }
}
