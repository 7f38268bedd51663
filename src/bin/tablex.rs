//! CLI binary for edgequake-tablex.
//!
//! A thin shim over the library crate: maps CLI flags to `PipelineConfig`,
//! answers review checkpoints on the terminal and prints the run report.

use anyhow::{Context, Result};
use clap::Parser;
use edgequake_tablex::{
    load_filing, BackendKind, Checkpoint, CheckpointDecision, NoReview, NormalizedTable, Pipeline,
    PipelineConfig, PipelineProgressCallback, ProgressCallback, ReviewGate, RunReport,
    StructuredTableRecord,
};
use indicatif::{ProgressBar, ProgressStyle};
use std::io::{self, BufRead, IsTerminal, Write};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};
use tracing_subscriber::EnvFilter;

// ── ANSI colour helpers (no extra deps) ──────────────────────────────────────

fn green(s: &str) -> String {
    format!("\x1b[32m{s}\x1b[0m")
}
fn red(s: &str) -> String {
    format!("\x1b[31m{s}\x1b[0m")
}
fn dim(s: &str) -> String {
    format!("\x1b[2m{s}\x1b[0m")
}
fn bold(s: &str) -> String {
    format!("\x1b[1m{s}\x1b[0m")
}
fn cyan(s: &str) -> String {
    format!("\x1b[36m{s}\x1b[0m")
}

const TICKS: &[&str] = &["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏", "⠿"];

// ── CLI progress callback using indicatif ────────────────────────────────────

/// Terminal progress callback: a live bar over the tables of the filing and
/// one log line per table and backend.
struct CliProgressCallback {
    bar: ProgressBar,
    /// Wall-clock start of the table in flight.
    started: Mutex<Option<Instant>>,
}

impl CliProgressCallback {
    fn new_dynamic() -> Arc<Self> {
        let bar = ProgressBar::new(0); // length set in on_run_start

        let spinner_style = ProgressStyle::with_template("{spinner:.cyan} {prefix:.bold}  {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner())
            .tick_strings(TICKS);

        bar.set_style(spinner_style);
        bar.set_prefix("Preparing");
        bar.set_message("Reading filing…");
        bar.enable_steady_tick(Duration::from_millis(80));

        Arc::new(Self {
            bar,
            started: Mutex::new(None),
        })
    }

    fn activate_bar(&self, total: usize) {
        let progress_style = ProgressStyle::with_template(
            "{spinner:.cyan} {prefix:.bold}  \
             [{bar:42.green/238}] {pos:>3}/{len} tables  \
             ⏱ {elapsed_precise}",
        )
        .unwrap_or_else(|_| ProgressStyle::default_bar())
        .progress_chars("█▉▊▋▌▍▎▏  ")
        .tick_strings(TICKS);

        self.bar.set_length(total as u64);
        self.bar.set_style(progress_style);
        self.bar.set_prefix("Extracting");
    }

    fn elapsed_secs(&self) -> f64 {
        self.started
            .lock()
            .ok()
            .and_then(|mut s| s.take())
            .map(|t| t.elapsed().as_secs_f64())
            .unwrap_or(0.0)
    }

    /// Hide the bar while the operator answers a checkpoint.
    fn suspend<R>(&self, f: impl FnOnce() -> R) -> R {
        self.bar.suspend(f)
    }
}

impl PipelineProgressCallback for CliProgressCallback {
    fn on_run_start(&self, total_tables: usize, unparseable: usize) {
        self.activate_bar(total_tables);
        let note = if unparseable > 0 {
            dim(&format!("  ({unparseable} not parseable as markup)"))
        } else {
            String::new()
        };
        self.bar.println(format!(
            "{} {}{}",
            cyan("◆"),
            bold(&format!("Found {total_tables} tables")),
            note
        ));
    }

    fn on_table_start(&self, index: usize, _total: usize) {
        if let Ok(mut s) = self.started.lock() {
            *s = Some(Instant::now());
        }
        self.bar.set_message(format!("table {index}"));
    }

    fn on_backend_output(&self, index: usize, backend: BackendKind, tables: &[NormalizedTable]) {
        self.bar.println(backend_block(index, backend, tables));
    }

    fn on_table_complete(&self, index: usize, total: usize) {
        self.bar.println(format!(
            "  {} Table {:>3}/{:<3}  {}",
            green("✓"),
            index,
            total,
            dim(&format!("{:.1}s", self.elapsed_secs())),
        ));
        self.bar.inc(1);
    }

    fn on_table_error(&self, index: usize, total: usize, error: &str) {
        let msg = match error.char_indices().nth(79) {
            Some((cut, _)) => format!("{}\u{2026}", &error[..cut]),
            None => error.to_string(),
        };

        self.bar.println(format!(
            "  {} Table {:>3}/{:<3}  {}",
            red("✗"),
            index,
            total,
            red(&msg),
        ));
    }

    fn on_run_complete(&self, total_tables: usize, clean_tables: usize) {
        let failed = total_tables.saturating_sub(clean_tables);
        self.bar.finish_and_clear();

        if failed == 0 {
            eprintln!(
                "{} {} tables processed cleanly",
                green("✔"),
                bold(&clean_tables.to_string())
            );
        } else {
            eprintln!(
                "{} {}/{} tables clean  ({} with problems)",
                if failed == total_tables {
                    red("✘")
                } else {
                    cyan("⚠")
                },
                bold(&clean_tables.to_string()),
                total_tables,
                red(&failed.to_string()),
            );
        }
    }
}

/// What a backend saw for one table: a shape line, then its first table.
fn backend_block(index: usize, backend: BackendKind, tables: &[NormalizedTable]) -> String {
    let shape = match tables.first() {
        Some(t) => format!("{} rows × {} cols", t.rows.len(), t.width()),
        None => "no table".to_string(),
    };
    let extra = if tables.len() > 1 {
        format!(" (+{} more)", tables.len() - 1)
    } else {
        String::new()
    };
    let mut block = format!(
        "    {} {:<7} {}{}",
        dim(&format!("#{index}")),
        backend.to_string(),
        dim(&shape),
        dim(&extra)
    );
    if let Some(table) = tables.first() {
        for line in table.to_string().lines() {
            block.push_str("\n      ");
            block.push_str(line);
        }
    }
    block
}

/// Line-per-event callback for runs without the progress bar.
struct PlainProgressCallback;

impl PipelineProgressCallback for PlainProgressCallback {
    fn on_run_start(&self, total_tables: usize, unparseable: usize) {
        eprintln!("Found {total_tables} tables ({unparseable} not parseable as markup)");
    }

    fn on_backend_output(&self, index: usize, backend: BackendKind, tables: &[NormalizedTable]) {
        eprintln!("{}", backend_block(index, backend, tables));
    }

    fn on_table_error(&self, index: usize, total: usize, error: &str) {
        eprintln!("  {} Table {index}/{total}  {}", red("✗"), red(error));
    }
}

// ── Terminal review gate ─────────────────────────────────────────────────────

/// Answers checkpoints by prompting on stderr and reading stdin.
struct StdinReview {
    first: Option<usize>,
    ask_first: bool,
    progress: Option<Arc<CliProgressCallback>>,
}

impl StdinReview {
    fn ask(&self, question: &str) -> String {
        let read = || {
            eprint!("{} {} ", cyan("?"), bold(question));
            io::stderr().flush().ok();
            let mut line = String::new();
            // EOF or a broken stdin count as an empty answer.
            io::stdin().lock().read_line(&mut line).ok();
            line.trim().to_string()
        };
        // The gate runs on the async runtime; reading stdin blocks.
        tokio::task::block_in_place(|| match &self.progress {
            Some(p) => p.suspend(read),
            None => read(),
        })
    }

    fn ask_index(&self, question: &str) -> Option<usize> {
        loop {
            let answer = self.ask(question);
            if answer.is_empty() {
                return None;
            }
            match answer.parse::<usize>() {
                Ok(i) => return Some(i),
                Err(_) => eprintln!("  {}", red(&format!("'{answer}' is not a table index"))),
            }
        }
    }

    fn ask_yes_no(&self, question: &str) -> bool {
        matches!(
            self.ask(&format!("{question} [y/N]")).to_lowercase().as_str(),
            "y" | "yes"
        )
    }

    fn show(&self, checkpoint: &Checkpoint<'_>) {
        let print = || {
            eprintln!();
            eprintln!(
                "{} {}",
                cyan("◆"),
                bold(&format!(
                    "Checkpoint: table {}/{}",
                    checkpoint.index, checkpoint.total
                ))
            );
            if let Some(caption) = checkpoint.caption {
                eprintln!("  caption  {caption}");
            }
            if let Some(image) = checkpoint.image {
                eprintln!("  image    {}", image.display());
            }
            if let Some(pdf) = checkpoint.pdf {
                eprintln!("  pdf      {}", pdf.display());
            }
            if let Some(markup) = checkpoint.markup {
                eprintln!("  {}", dim("markup:"));
                print_table(markup);
            }
            for output in checkpoint.backends {
                eprintln!("  {}", dim(&format!("{}:", output.backend)));
                if output.tables.is_empty() {
                    eprintln!("    {}", dim("no table found"));
                }
                for table in &output.tables {
                    print_table(table);
                }
            }
        };
        match &self.progress {
            Some(p) => p.suspend(print),
            None => print(),
        }
    }
}

fn print_table(table: &NormalizedTable) {
    for line in table.to_string().lines() {
        eprintln!("    {line}");
    }
}

impl ReviewGate for StdinReview {
    fn first_pause(&mut self) -> Option<usize> {
        if self.ask_first {
            self.first = self.ask_index("First table index to pause at (empty = never):");
        }
        self.first
    }

    fn on_checkpoint(&mut self, checkpoint: &Checkpoint<'_>) -> CheckpointDecision {
        self.show(checkpoint);
        let next_pause = self.ask_index("Next table index to pause at (empty = next table):");
        let structure = self.ask_yes_no("Run structured extraction on this table?");
        CheckpointDecision {
            next_pause,
            structure,
        }
    }

    fn confirm_persist(&mut self, record: &StructuredTableRecord) -> bool {
        eprintln!(
            "  {} {}  {}",
            green("✓"),
            bold(&record.name),
            dim(&format!(
                "{} columns, {} rows",
                record.columns.len(),
                record.data.len()
            ))
        );
        if !record.summary.is_empty() {
            eprintln!("    {}", dim(&record.summary));
        }
        self.ask_yes_no("Save to PostgreSQL?")
    }
}

const AFTER_HELP: &str = r#"EXAMPLES:
  # List the tables of a filing with their captions (no external tools)
  tablex --list-tables nvda-20240128.htm

  # Print every table parsed straight from the markup
  tablex --markup-only nvda-20240128.htm

  # Render + cross-check all tables, pause at table 12
  tablex --ticker nvda --tabula-jar tabula.jar --pause-at 12 nvda-20240128.htm

  # Filing from EDGAR (EDGAR wants a descriptive User-Agent)
  tablex --user-agent "Jane Doe jane@example.com" --ticker nvda \
    https://www.sec.gov/Archives/edgar/data/1045810/000104581024000029/nvda-20240128.htm

  # pdfium backend only, machine-readable report
  tablex --backends pdfium --json filing.htm > report.json

REVIEW CHECKPOINTS:
  When the run reaches the pause index it prints the caption, artifact paths
  and every backend's table, then asks for the next index to pause at and
  whether to send the table to the vision model. Extracted records are
  written to <output-root>/<ticker>/<index>/image/document.json and can be
  saved to PostgreSQL as a new table named after the record.

ARTIFACTS:
  <output-root>/<ticker>/<index>/image/<index>.png
  <output-root>/<ticker>/<index>/pdf/<index>.pdf

ENVIRONMENT VARIABLES:
  OPENAI_API_KEY          OpenAI API key
  ANTHROPIC_API_KEY       Anthropic API key
  GEMINI_API_KEY          Google Gemini API key
  EDGEQUAKE_LLM_PROVIDER  Override provider (openai, anthropic, gemini, ollama)
  EDGEQUAKE_MODEL         Override model ID
  PDFIUM_LIB_PATH         Directory holding libpdfium
  TABULA_JAR              Path to the tabula-java jar
  POSTGRES_CONN_STRING    PostgreSQL connection string

EXTERNAL TOOLS:
  weasyprint              Renders each table to PDF
  libpdfium               Rasterises the PDF, runs the pdfium backend
  java + tabula-java      Runs the tabula backend
"#;

/// Extract the tables of an HTML filing and structure them with Vision LLMs.
#[derive(Parser, Debug)]
#[command(
    name = "tablex",
    version,
    about = "Extract tables from HTML filings, cross-check them and structure them with Vision LLMs",
    long_about = "Locate every table of an HTML filing (local file or URL), render each one to \
PDF and PNG, extract it again with pdfium and tabula-java, and print all views side by side. \
At review checkpoints a table can be sent to a Vision Language Model to get a typed record, \
which can then be saved to PostgreSQL.",
    arg_required_else_help = true,
    color = clap::ColorChoice::Auto,
    after_long_help = AFTER_HELP
)]
struct Cli {
    /// Local HTML filing path or HTTP/HTTPS URL.
    input: String,

    /// Ticker symbol; names the artifact directory.
    #[arg(short, long, env = "TABLEX_TICKER", default_value = "filing")]
    ticker: String,

    /// Root directory of the artifact tree.
    #[arg(short, long, env = "TABLEX_OUTPUT_ROOT", default_value = "files")]
    output_root: PathBuf,

    /// First table index to pause at. Prompted for when omitted on a terminal.
    #[arg(short, long)]
    pause_at: Option<usize>,

    /// Never pause; only render and cross-check.
    #[arg(long, conflicts_with = "pause_at")]
    no_review: bool,

    /// PNG resolution (72–600).
    #[arg(long, env = "TABLEX_DPI", default_value_t = 300,
          value_parser = clap::value_parser!(u32).range(72..=600))]
    dpi: u32,

    /// WeasyPrint executable.
    #[arg(long, env = "WEASYPRINT_BIN", default_value = "weasyprint")]
    weasyprint: PathBuf,

    /// Render fragments without the built-in stylesheet.
    #[arg(long)]
    no_css: bool,

    /// File holding a `<head>` block that replaces the built-in stylesheet.
    #[arg(long)]
    stylesheet: Option<PathBuf>,

    /// Directory holding the pdfium shared library.
    #[arg(long, env = "PDFIUM_LIB_PATH")]
    pdfium_lib_dir: Option<PathBuf>,

    /// PDF table backends to run: pdfium, tabula (comma separated).
    #[arg(long, env = "TABLEX_BACKENDS", value_delimiter = ',', default_value = "pdfium,tabula")]
    backends: Vec<String>,

    /// Path to the tabula-java jar (required by the tabula backend).
    #[arg(long, env = "TABULA_JAR")]
    tabula_jar: Option<PathBuf>,

    /// Java executable used to run tabula.
    #[arg(long, env = "JAVA_BIN", default_value = "java")]
    java: PathBuf,

    /// Merge a two-row stacked header into one row.
    #[arg(long)]
    flatten_headers: bool,

    /// Do not look for captions or send them to the model.
    #[arg(long)]
    no_caption: bool,

    /// LLM model ID (e.g. gpt-4o, claude-sonnet-4-20250514).
    #[arg(long, env = "EDGEQUAKE_MODEL")]
    model: Option<String>,

    /// LLM provider: openai, anthropic, gemini, ollama, azure.
    #[arg(long, env = "EDGEQUAKE_LLM_PROVIDER")]
    provider: Option<String>,

    /// Path to a text file containing a custom system prompt.
    #[arg(long, env = "TABLEX_SYSTEM_PROMPT")]
    system_prompt: Option<PathBuf>,

    /// Max LLM output tokens per table.
    #[arg(long, default_value_t = 4096)]
    max_tokens: usize,

    /// PostgreSQL connection string; enables saving records.
    #[arg(long, env = "POSTGRES_CONN_STRING", hide_env_values = true)]
    database_url: Option<String>,

    /// User-Agent header for URL downloads.
    #[arg(long, env = "TABLEX_USER_AGENT")]
    user_agent: Option<String>,

    /// Print the index and caption of every table, then exit.
    #[arg(long, conflicts_with = "markup_only")]
    list_tables: bool,

    /// Print the tables parsed from the markup, then exit.
    #[arg(long)]
    markup_only: bool,

    /// Output JSON instead of text.
    #[arg(long)]
    json: bool,

    /// Disable progress bar.
    #[arg(long, env = "TABLEX_NO_PROGRESS")]
    no_progress: bool,

    /// Enable DEBUG-level tracing logs.
    #[arg(short, long, env = "TABLEX_VERBOSE")]
    verbose: bool,

    /// Suppress all output except errors.
    #[arg(short, long, env = "TABLEX_QUIET")]
    quiet: bool,

    /// HTTP download timeout in seconds.
    #[arg(long, default_value_t = 120)]
    download_timeout: u64,

    /// Per-table LLM call timeout in seconds.
    #[arg(long, default_value_t = 120)]
    api_timeout: u64,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // ── Logging setup ────────────────────────────────────────────────────
    let listing = cli.list_tables || cli.markup_only;
    let show_progress = !cli.quiet && !cli.no_progress && !cli.json && !listing;
    let filter = if cli.verbose {
        "debug"
    } else if cli.quiet || show_progress {
        "error"
    } else {
        "info"
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(filter)),
        )
        .with_writer(io::stderr)
        .init();

    let progress = if show_progress {
        Some(CliProgressCallback::new_dynamic())
    } else {
        None
    };
    let callback: Option<ProgressCallback> = match &progress {
        Some(p) => Some(p.clone() as ProgressCallback),
        None if !cli.quiet && !listing => {
            Some(Arc::new(PlainProgressCallback) as ProgressCallback)
        }
        None => None,
    };
    let config = build_config(&cli, callback).await?;

    // ── Markup-only modes ────────────────────────────────────────────────
    if listing {
        let filing = load_filing(&cli.input, &config)
            .await
            .context("Failed to read filing")?;
        if cli.json {
            let value = if cli.list_tables {
                serde_json::to_value(&filing.fragments)
            } else {
                serde_json::to_value(&filing.markup.tables)
            }
            .context("Failed to serialise tables")?;
            println!(
                "{}",
                serde_json::to_string_pretty(&value).context("Failed to serialise tables")?
            );
        } else if cli.list_tables {
            for f in &filing.fragments {
                println!(
                    "{:>4}  {}",
                    f.index,
                    f.caption.as_deref().unwrap_or("-")
                );
            }
        } else {
            for (index, table) in &filing.markup.tables {
                println!("── table {index} ──");
                if let Some(caption) = &table.caption {
                    println!("{caption}");
                }
                print!("{table}");
                println!();
            }
            if !cli.quiet {
                eprintln!(
                    "{} tables, {} not parseable as markup",
                    filing.fragments.len(),
                    filing.markup.skipped
                );
            }
        }
        return Ok(());
    }

    // ── Full run ─────────────────────────────────────────────────────────
    let pipeline = Pipeline::from_config(config)
        .await
        .context("Failed to set up pipeline")?;

    let interactive = io::stdin().is_terminal();
    let report = if cli.no_review || (cli.pause_at.is_none() && !interactive) {
        pipeline.run(&cli.input, &mut NoReview).await
    } else {
        let mut gate = StdinReview {
            first: cli.pause_at,
            ask_first: cli.pause_at.is_none(),
            progress: progress.clone(),
        };
        pipeline.run(&cli.input, &mut gate).await
    }
    .context("Run failed")?;

    if cli.json {
        println!(
            "{}",
            serde_json::to_string_pretty(&report).context("Failed to serialise report")?
        );
    } else if !cli.quiet {
        print_summary(&report, show_progress);
    }

    Ok(())
}

fn print_summary(report: &RunReport, progress_shown: bool) {
    if !progress_shown {
        eprintln!(
            "Processed {} tables in {}ms ({} clean)",
            report.total_tables,
            report.duration_ms,
            report.clean_tables()
        );
        for outcome in &report.outcomes {
            for e in &outcome.errors {
                eprintln!("  {}", e);
            }
        }
    }
    eprintln!(
        "   {} checkpoints  /  {} records  /  {} saved  /  {}ms total",
        dim(&report.checkpoints.to_string()),
        dim(&report.structured_tables().to_string()),
        dim(&report
            .outcomes
            .iter()
            .filter(|o| o.persisted_rows.is_some())
            .count()
            .to_string()),
        report.duration_ms,
    );
}

/// Map CLI args to `PipelineConfig`.
async fn build_config(cli: &Cli, progress: Option<ProgressCallback>) -> Result<PipelineConfig> {
    let system_prompt = match &cli.system_prompt {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read system prompt from {:?}", path))?,
        ),
        None => None,
    };
    let stylesheet = match &cli.stylesheet {
        Some(path) => Some(
            tokio::fs::read_to_string(path)
                .await
                .with_context(|| format!("Failed to read stylesheet from {:?}", path))?,
        ),
        None => None,
    };

    // Listing needs no backends (and so no tabula jar).
    let listing = cli.list_tables || cli.markup_only;
    let backends = cli
        .backends
        .iter()
        .filter(|_| !listing)
        .filter(|b| !b.trim().is_empty())
        .map(|b| b.parse::<BackendKind>())
        .collect::<Result<Vec<_>, _>>()
        .context("Invalid --backends")?;

    let mut builder = PipelineConfig::builder()
        .ticker(cli.ticker.as_str())
        .output_root(cli.output_root.clone())
        .dpi(cli.dpi)
        .weasyprint_bin(cli.weasyprint.clone())
        .override_css(!cli.no_css)
        .backends(backends)
        .java_bin(cli.java.clone())
        .flatten_headers(cli.flatten_headers)
        .include_caption(!cli.no_caption)
        .max_tokens(cli.max_tokens)
        .download_timeout_secs(cli.download_timeout)
        .api_timeout_secs(cli.api_timeout);

    if let Some(head) = stylesheet {
        builder = builder.stylesheet(head);
    }
    if let Some(dir) = &cli.pdfium_lib_dir {
        builder = builder.pdfium_lib_dir(dir.clone());
    }
    if let Some(jar) = &cli.tabula_jar {
        builder = builder.tabula_jar(jar.clone());
    }
    if let Some(model) = &cli.model {
        builder = builder.model(model.as_str());
    }
    if let Some(provider) = &cli.provider {
        builder = builder.provider_name(provider.as_str());
    }
    if let Some(prompt) = system_prompt {
        builder = builder.system_prompt(prompt);
    }
    if let Some(url) = &cli.database_url {
        builder = builder.database_url(url.as_str());
    }
    if let Some(ua) = &cli.user_agent {
        builder = builder.user_agent(ua.as_str());
    }
    if let Some(cb) = progress {
        builder = builder.progress_callback(cb);
    }

    builder.build().context("Invalid configuration")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn table() -> NormalizedTable {
        NormalizedTable {
            headers: vec!["Segment".into(), "FY24".into()],
            rows: vec![vec!["Graphics".into(), "13,517".into()]],
            caption: None,
        }
    }

    #[test]
    fn backend_block_shows_the_first_table() {
        let block = backend_block(3, BackendKind::Tabula, &[table(), table()]);
        let lines: Vec<&str> = block.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].contains("tabula"));
        assert!(lines[0].contains("1 rows × 2 cols"));
        assert!(lines[0].contains("(+1 more)"));
        assert!(lines[1].contains("Segment") && lines[1].contains("FY24"));
        assert!(lines[2].contains("Graphics") && lines[2].contains("13,517"));
    }

    #[test]
    fn backend_block_without_tables_is_one_line() {
        let block = backend_block(0, BackendKind::Pdfium, &[]);
        assert_eq!(block.lines().count(), 1);
        assert!(block.contains("no table"));
    }
}
