//! a3s-websearch CLI: search the web or fetch a readable page.

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use a3s_websearch::extract::{ExtractionMode, OutputFormat as ContentFormat};
use a3s_websearch::{
    Config, Diagnostics, FetchRequest, Fetcher, Flag, Search, SearchError, SearchQuery,
};

/// Resilient web search and page fetching
#[derive(Parser)]
#[command(name = "a3s-websearch")]
#[command(author, version, about, long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// TOML configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Outbound proxy (http://, https:// or socks5://), overrides PROXY
    #[arg(long, global = true)]
    proxy: Option<String>,

    /// Output format
    #[arg(short, long, global = true, default_value = "text")]
    output: Output,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Search the web
    Search(SearchArgs),

    /// Fetch a page and extract its main content
    Fetch(FetchArgs),

    /// List search backends
    Engines,
}

#[derive(Parser)]
struct SearchArgs {
    /// Search query
    query: String,

    /// Restrict results to a site (same as `site:` in the query)
    #[arg(short, long)]
    site: Option<String>,

    /// Generic backends in fallback order (comma-separated)
    #[arg(short, long, value_delimiter = ',')]
    engines: Option<Vec<String>>,

    /// Maximum number of results
    #[arg(short, long)]
    limit: Option<usize>,

    /// Overall timeout in seconds
    #[arg(short, long)]
    timeout: Option<u64>,
}

#[derive(Parser)]
struct FetchArgs {
    /// Page URL
    url: String,

    /// Extraction mode: quality, balanced or speed
    #[arg(short, long)]
    mode: Option<ExtractionMode>,

    /// Content format: markdown or text
    #[arg(short, long)]
    format: Option<ContentFormat>,

    /// Disable the headless browser fallback
    #[arg(long)]
    no_browser: bool,

    /// Extra request header as `name: value` (repeatable)
    #[arg(short = 'H', long = "header")]
    headers: Vec<String>,
}

#[derive(Clone, Copy, ValueEnum)]
enum Output {
    /// Human-readable text output
    Text,
    /// JSON output
    Json,
    /// Compact single-line output
    Compact,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let mut config = match cli.config {
        Some(ref path) => Config::load(path)
            .with_context(|| format!("failed to load {}", path.display()))?,
        None => Config::default(),
    };
    config.apply_env();
    if let Some(proxy) = cli.proxy {
        config.proxy.outbound = Some(proxy);
    }

    match cli.command {
        Commands::Search(args) => run_search(config, args, cli.output).await,
        Commands::Fetch(args) => run_fetch(config, args, cli.output).await,
        Commands::Engines => list_engines(&config),
    }
}

fn list_engines(config: &Config) -> Result<()> {
    println!("Generic backends (tried in order):\n");
    println!("  brave       - Brave Search");
    println!("  duckduckgo  - DuckDuckGo HTML (alias: ddg)");
    println!();
    println!("Site backends (used for site: queries):\n");
    println!("  wikipedia   - MediaWiki search API (*.wikipedia.org)");
    println!("  stackexchange - Stack Exchange API (stackoverflow.com and other sites)");
    println!();
    println!("Configured chain: {}", config.search.engines.join(" -> "));
    if config.llm.credentials().is_some() {
        println!("AI summary: {}", config.llm.model);
    } else {
        println!("AI summary: disabled (set OPENAI_API_KEY and OPENAI_BASE_URL)");
    }
    Ok(())
}

async fn run_search(mut config: Config, args: SearchArgs, output: Output) -> Result<()> {
    if let Some(engines) = args.engines {
        config.search.engines = engines;
    }
    if let Some(limit) = args.limit {
        config.search.result_limit = limit;
    }
    if let Some(timeout) = args.timeout {
        config.search.timeout_s = timeout;
    }
    config.validate()?;

    let search = Search::from_config(&config)?;
    let mut query = SearchQuery::new(&args.query);
    if let Some(site) = &args.site {
        query = query.with_site(site);
    }

    let response = match search.search(query).await {
        Ok(response) => response,
        Err(failure) => return report_failure(failure.error, &failure.diagnostics, output),
    };

    match output {
        Output::Text => {
            println!(
                "\nSearch results for \"{}\" ({} results in {}ms):\n",
                args.query,
                response.len(),
                response.duration_ms
            );
            if let Some(summary) = response.summary() {
                println!("{}\n", summary.text);
                for (i, cite) in summary.citations.iter().enumerate() {
                    println!("  [{}] {} {}", i + 1, cite.title, cite.url);
                }
                println!();
            }
            for (i, result) in response.items().iter().enumerate() {
                println!("{}. {}", i + 1, result.title);
                println!("   URL: {}", result.url);
                if !result.snippet.is_empty() {
                    println!("   {}", ellipsize(&result.snippet, 150));
                }
                println!("   Engine: {} #{}", result.engine, result.position);
                println!();
            }
            print_flags(response.diagnostics());
        }
        Output::Json => {
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Output::Compact => {
            for result in response.items() {
                println!("{}\t{}", result.title, result.url);
            }
        }
    }

    Ok(())
}

async fn run_fetch(mut config: Config, args: FetchArgs, output: Output) -> Result<()> {
    if let Some(mode) = args.mode {
        config.fetch.mode = mode;
    }
    if let Some(format) = args.format {
        config.fetch.format = format;
    }
    if args.no_browser {
        config.browser.enabled = false;
    }
    config.validate()?;

    let mut request = FetchRequest::new(&args.url);
    for header in &args.headers {
        let (name, value) = header
            .split_once(':')
            .with_context(|| format!("invalid header '{header}', expected 'name: value'"))?;
        request = request.with_header(name.trim(), value.trim());
    }

    let fetcher = Fetcher::from_config(&config)?;
    let response = match fetcher.fetch(request).await {
        Ok(response) => response,
        Err(failure) => return report_failure(failure.error, &failure.diagnostics, output),
    };

    match output {
        Output::Text => {
            if let Some(title) = &response.page.title {
                eprintln!("Title: {title}");
            }
            eprintln!(
                "Strategy: {} | Quality: {} | Chars: {}{}",
                response.page.strategy,
                response.page.quality,
                response.page.chars,
                if response.via_browser { " | via browser" } else { "" }
            );
            print_flags(&response.diagnostics);
            println!("{}", response.page.content);
        }
        Output::Json => {
            println!("{}", serde_json::to_string_pretty(&response)?);
        }
        Output::Compact => {
            println!("{}\t{}", response.page.url, response.page.chars);
        }
    }

    Ok(())
}

fn report_failure(error: SearchError, diagnostics: &Diagnostics, output: Output) -> Result<()> {
    if matches!(output, Output::Json) {
        let body = serde_json::json!({
            "error": error.to_string(),
            "class": error.class(),
            "diagnostics": diagnostics,
        });
        println!("{}", serde_json::to_string_pretty(&body)?);
    } else {
        for attempt in diagnostics.attempts() {
            eprintln!("  {:?} {} {:?}", attempt.stage, attempt.name, attempt.outcome);
        }
    }
    Err(error.into())
}

fn print_flags(diagnostics: &Diagnostics) {
    for flag in diagnostics.flags() {
        let note = match flag {
            Flag::EngineFallback { from, to } => format!("fell back from {from} to {to}"),
            Flag::SummaryUnavailable => "AI summary unavailable".to_string(),
            Flag::BrowserFallback { trigger } => format!("browser fallback ({trigger})"),
            Flag::ChallengeDetected { reason } => format!("challenge detected ({reason})"),
            Flag::Truncated => "content truncated".to_string(),
            Flag::Degraded => "degraded to title and description".to_string(),
            other => format!("{other:?}"),
        };
        eprintln!("note: {note}");
    }
}

fn ellipsize(text: &str, max_chars: usize) -> String {
    if text.chars().count() <= max_chars {
        return text.to_string();
    }
    let cut: String = text.chars().take(max_chars).collect();
    format!("{cut}...")
}
