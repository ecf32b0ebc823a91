//! 文档子系统：模板渲染、章节组装与多遍编译

pub mod assembler;
pub mod compile;
pub mod template;

pub use assembler::{DocumentAssembler, DocumentDraft, DocumentRequest};
pub use compile::{
    summarize_log, CompilationAttempt, CompilationRun, CompilationStateMachine, CompileState,
    DocumentCompiler, LatexCompiler, PassOutput, RerunMarker,
};
pub use template::{SectionContent, TemplateStore, TemplateVars};
