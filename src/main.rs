//! Cheap Research - 命令行入口
//!
//! 加载配置、构建研究团队；带任务参数时运行一次并打印答案，否则进入交互模式（保留最近几轮历史）。
//! 日志与进度输出到 stderr，答案输出到 stdout。

use std::io::Write;
use std::path::PathBuf;

use anyhow::{bail, Context};
use clap::Parser;
use cheap_research::config::{default_config_path, ensure_config_file, ensure_defaults, load_config};
use cheap_research::memory::ConversationMemory;
use cheap_research::ResearchBuilder;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const EXIT_WORDS: [&str; 4] = ["exit", "quit", "q", "bye"];

#[derive(Parser)]
#[command(name = "cheap-research")]
#[command(about = "Multi-agent research assistant: search, save sources, write and compile LaTeX", long_about = None)]
#[command(version)]
struct Cli {
    /// 配置文件路径（默认 <XDG config>/cheap_research/config.toml）
    #[arg(short, long, env = "CHEAP_RESEARCH_CONFIG")]
    config: Option<PathBuf>,

    /// 不输出进度行
    #[arg(short, long)]
    quiet: bool,

    /// 研究任务；省略时进入交互模式
    task: Vec<String>,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // 日志：默认 info，可通过 RUST_LOG 覆盖；写到 stderr
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().with_writer(std::io::stderr))
        .init();

    let cli = Cli::parse();
    let path = match cli.config {
        Some(p) => p,
        None => default_config_path().context("could not determine the configuration directory")?,
    };

    if ensure_config_file(&path)
        .with_context(|| format!("failed to write default configuration to {}", path.display()))?
    {
        bail!(
            "wrote a default configuration to {}; add your API keys, set initialized = true and run again",
            path.display()
        );
    }
    ensure_defaults(&path)
        .with_context(|| format!("failed to update configuration at {}", path.display()))?;
    let config = load_config(&path)
        .with_context(|| format!("failed to load configuration from {}", path.display()))?;
    config.validate().map_err(anyhow::Error::msg)?;
    let max_turns = config.app.max_context_turns;

    let mut orchestrator = ResearchBuilder::new(config)
        .build()
        .context("failed to build the research team")?;
    if !cli.quiet {
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
        orchestrator = orchestrator.with_event_sender(tx);
        tokio::spawn(async move {
            while let Some(ev) = rx.recv().await {
                eprintln!("{}", ev.to_progress_line());
            }
        });
    }

    if !cli.task.is_empty() {
        let task = cli.task.join(" ");
        println!("{}", orchestrator.run(&task, &[]).await);
        return Ok(());
    }

    let mut history = ConversationMemory::new(max_turns);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        print!("research> ");
        std::io::stdout().flush().context("stdout")?;
        let Some(line) = lines.next_line().await.context("failed to read stdin")? else {
            break;
        };
        let task = line.trim();
        if task.is_empty() {
            continue;
        }
        if EXIT_WORDS.contains(&task.to_lowercase().as_str()) {
            break;
        }
        let answer = orchestrator.run(task, history.messages()).await;
        println!("{answer}\n");
        history.push_turn(task, &answer);
    }
    Ok(())
}
