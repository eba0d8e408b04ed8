use clap::Parser;
use std::path::PathBuf;

/// Run a GitHub code search dork, stream every matching file to disk and
/// record the first matching line of each file in a CSV report.
#[derive(Parser, Debug, Clone)]
#[clap(
    author,
    version,
    about,
    long_about = "Searches GitHub code with a dork, downloads each hit to the output \
                  directory and appends one finding per file to findings.csv while \
                  staying inside the search rate limit."
)]
pub struct Args {
    /// GitHub personal access token. Falls back to the GITHUB_TOKEN environment variable.
    #[clap(short, long)]
    pub token: Option<String>,

    /// GitHub code search query, e.g. "filename:.env DB_PASSWORD".
    #[clap(short, long)]
    pub dork: String,

    /// Base directory for downloaded files and findings.csv.
    #[clap(short, long, default_value = "output")]
    pub output_dir: PathBuf,

    /// Skip files already listed in an existing findings.csv.
    #[clap(short, long)]
    pub resume: bool,

    /// File with one extra regex pattern per line (case-insensitive).
    #[clap(long, value_name = "FILE")]
    pub patterns: Option<PathBuf>,

    /// Webhook URL that receives a JSON message for every finding. Repeatable.
    #[clap(long = "webhook", value_name = "URL")]
    pub webhooks: Vec<String>,

    /// Maximum number of result pages to walk (100 results per page).
    #[clap(short = 'p', long, value_name = "NUM", default_value = "10")]
    pub max_pages: u32,

    /// Number of files downloaded in parallel within a page.
    #[clap(short = 'c', long, default_value = "5")]
    pub concurrency: usize,

    /// Lines of context kept on each side of the matching line.
    #[clap(long, value_name = "NUM", default_value = "3")]
    pub context_lines: usize,
}
