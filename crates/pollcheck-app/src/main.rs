//! pollcheck - flags biased or ungrammatical wording in poll questions
//!
//! Reads a poll from the command line, stdin, or a file (one poll per line),
//! sends it to OpenRouter, and prints the resolved spans plus a neutral
//! rewrite as JSON.

mod telemetry;

use anyhow::{Context, Result};
use clap::Parser;
use futures::stream::{self, StreamExt};
use pollcheck_adapters::config::{self, Config};
use pollcheck_adapters::{keyring, FilePromptTemplates};
use pollcheck_core::AnalysisResult;
use pollcheck_engine::llm::openrouter_user;
use pollcheck_engine::{
    AnalysisDiagnostics, AnalysisError, AnalyzerConfig, OpenRouterClient, PollTextAnalyzer,
};
use serde::Serialize;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tokio::io::AsyncReadExt;

const EXIT_FAILURE: u8 = 1;
const EXIT_INVALID_INPUT: u8 = 2;

#[derive(Parser, Debug)]
#[command(
    name = "pollcheck",
    about = "Flag biased or ungrammatical wording in poll questions",
    long_about = "Flags biased or ungrammatical wording in poll questions and suggests\n\
                  a neutral rewrite. Output is JSON with character offsets into the input.",
    version
)]
struct Args {
    /// Poll text to analyze (reads stdin when omitted)
    text: Option<String>,

    /// Analyze each non-empty line of this file as a separate poll
    #[arg(long, conflicts_with = "text")]
    file: Option<PathBuf>,

    /// End-user identifier forwarded to OpenRouter
    #[arg(long, env = "POLLCHECK_USER_ID")]
    user_id: Option<String>,

    /// Polls analyzed at once with --file
    #[arg(long, default_value_t = 4, value_parser = clap::value_parser!(u16).range(1..=32))]
    concurrency: u16,

    /// Pretty-print JSON output
    #[arg(long)]
    pretty: bool,

    /// Include per-attempt diagnostics in the output
    #[arg(long)]
    diagnostics: bool,

    /// Debug logging on stderr
    #[arg(short, long)]
    verbose: bool,

    /// Set up OpenRouter API key (BYOK mode)
    #[arg(long)]
    setup: bool,
}

/// One poll to analyze. `line` is 1-based and only set for `--file` input.
#[derive(Debug, Clone, PartialEq, Eq)]
struct PollInput {
    line: Option<usize>,
    text: String,
}

#[derive(Debug, Serialize)]
struct ErrorReport {
    kind: &'static str,
    status: u16,
    message: String,
}

#[derive(Debug, Serialize)]
struct Report {
    #[serde(skip_serializing_if = "Option::is_none")]
    line: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    result: Option<AnalysisResult>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<ErrorReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    diagnostics: Option<AnalysisDiagnostics>,
}

impl Report {
    fn exit_code(&self) -> u8 {
        match &self.error {
            None => 0,
            Some(err) if err.status == 400 => EXIT_INVALID_INPUT,
            Some(_) => EXIT_FAILURE,
        }
    }
}

fn error_report(err: &AnalysisError) -> ErrorReport {
    ErrorReport {
        kind: err.kind(),
        status: err.status_code(),
        message: err.to_string(),
    }
}

/// Gateway failures outrank invalid input.
fn combined_exit_code(codes: impl IntoIterator<Item = u8>) -> u8 {
    codes
        .into_iter()
        .fold(0, |worst, code| match (worst, code) {
            (EXIT_FAILURE, _) | (_, EXIT_FAILURE) => EXIT_FAILURE,
            (a, b) => a.max(b),
        })
}

fn polls_from_lines(content: &str) -> Vec<PollInput> {
    content
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty())
        .map(|(idx, line)| PollInput {
            line: Some(idx + 1),
            text: line.to_string(),
        })
        .collect()
}

async fn collect_inputs(args: &Args) -> Result<Vec<PollInput>> {
    if let Some(path) = &args.file {
        let content = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("Failed to read {}", path.display()))?;
        return Ok(polls_from_lines(&content));
    }

    let text = match &args.text {
        Some(text) => text.clone(),
        None => {
            let mut buf = String::new();
            tokio::io::stdin()
                .read_to_string(&mut buf)
                .await
                .context("Failed to read poll text from stdin")?;
            buf
        }
    };
    Ok(vec![PollInput { line: None, text }])
}

fn build_analyzer(config: &mut Config) -> Result<PollTextAnalyzer> {
    let client = OpenRouterClient::from_config(config)?;
    let mut analyzer_config = AnalyzerConfig::from_config(config);
    analyzer_config.default_user_id = openrouter_user(config);

    let mut analyzer = PollTextAnalyzer::new(Arc::new(client)).with_config(analyzer_config);
    if let Some(templates) = FilePromptTemplates::from_config(config) {
        tracing::debug!(
            event = "prompt_templates.configured",
            dir = %templates.dir().display(),
            enabled = config.prompt_templates_enabled,
            "prompt template source configured"
        );
        analyzer = analyzer.with_templates(Arc::new(templates));
    }
    Ok(analyzer)
}

async fn analyze(
    analyzer: &PollTextAnalyzer,
    input: PollInput,
    user_id: Option<&str>,
    with_diagnostics: bool,
) -> Report {
    let outcome = analyzer
        .analyze_text_with_diagnostics(&input.text, user_id)
        .await;
    let (result, error) = match outcome.result {
        Ok(result) => (Some(result), None),
        Err(err) => (None, Some(error_report(&err))),
    };
    Report {
        line: input.line,
        result,
        error,
        diagnostics: with_diagnostics.then_some(outcome.diagnostics),
    }
}

fn print_report(report: &Report, pretty: bool) -> Result<()> {
    let json = if pretty {
        serde_json::to_string_pretty(report)?
    } else {
        serde_json::to_string(report)?
    };
    println!("{}", json);
    Ok(())
}

async fn run(args: Args) -> Result<u8> {
    if args.setup {
        setup_api_key()?;
        return Ok(0);
    }

    let inputs = collect_inputs(&args).await?;
    let mut config = Config::load();
    let analyzer = build_analyzer(&mut config)?;
    let user_id = args.user_id.as_deref();

    let mut reports = stream::iter(inputs)
        .map(|input| analyze(&analyzer, input, user_id, args.diagnostics))
        .buffered(usize::from(args.concurrency));

    let mut codes = Vec::new();
    while let Some(report) = reports.next().await {
        print_report(&report, args.pretty)?;
        codes.push(report.exit_code());
    }
    Ok(combined_exit_code(codes))
}

fn setup_api_key() -> Result<()> {
    config::setup_api_key_interactive().map_err(|e| anyhow::anyhow!("{}", e))?;

    match Config::load().get_api_key() {
        Some(_) => {
            println!("  + API key verified and ready to use!");
            Ok(())
        }
        None => {
            eprintln!();
            eprintln!("  ! Warning: API key was saved but cannot be read back.");
            eprintln!(
                "  ! This may be due to {} access issues.",
                keyring::credentials_store_label()
            );
            eprintln!();
            eprintln!("  Workaround: Set the OPENROUTER_API_KEY environment variable:");
            eprintln!("    export OPENROUTER_API_KEY=\"your-key-here\"");
            eprintln!();
            Err(anyhow::anyhow!("API key verification failed"))
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    let args = Args::parse();
    telemetry::init_tracing(args.verbose);

    match run(args).await {
        Ok(code) => ExitCode::from(code),
        Err(err) => {
            eprintln!("error: {:#}", err);
            ExitCode::from(EXIT_FAILURE)
        }
    }
}
