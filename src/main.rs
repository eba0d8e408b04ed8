use clap::Parser;
use dotenv::dotenv;
use std::process::ExitCode;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

use github_dork_search_lib::{Args, GitHubSearcher, Outcome, SearchConfig, SearchProgress};

#[tokio::main]
async fn main() -> ExitCode {
    // Logs go to stderr next to the progress bars; RUST_LOG overrides the level.
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    dotenv().ok();
    let args = Args::parse();

    let config = match SearchConfig::from_args(&args) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("[!] {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Ctrl-C stops new pages from starting; downloads already running finish.
    let cancel = CancellationToken::new();
    {
        let cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupted by user, finishing in-flight downloads");
                cancel.cancel();
            }
        });
    }

    let progress = SearchProgress::new(config.max_pages);
    let searcher = match GitHubSearcher::new(config, progress) {
        Ok(searcher) => searcher,
        Err(e) => {
            error!("{}", e);
            eprintln!("[!] {}", e);
            return ExitCode::FAILURE;
        }
    };

    match searcher.run(&cancel).await {
        Ok(summary) => {
            if let Outcome::Aborted { .. } = summary.outcome {
                eprintln!("[!] Interrupted by user");
            }
            info!("{}", summary);
            println!(
                "[✓] {}. Review {} and the output directory.",
                summary,
                searcher.store().path().display()
            );
            ExitCode::SUCCESS
        }
        Err(e) => {
            eprintln!("[!] {}", e);
            ExitCode::FAILURE
        }
    }
}
