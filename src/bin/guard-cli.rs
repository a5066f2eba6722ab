use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use reqwest::Method;
use serde_json::Value;
use url::Url;

const API_KEY_ENV: &str = "GUARD_ADMIN_API_KEY";

#[derive(Parser)]
#[command(name = "guard-cli")]
#[command(about = "Management CLI for the request guard gateway", long_about = None)]
struct Cli {
    #[arg(short, long, default_value = "http://localhost:8080")]
    url: Url,

    /// Admin API key; falls back to $GUARD_ADMIN_API_KEY.
    #[arg(short, long)]
    key: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show breaker states and store sizes
    Status,
    /// Force a circuit breaker closed
    ResetBreaker {
        /// Breaker name (database or api)
        name: String,
    },
    /// Clear the dedup cache, or a single entry
    ClearCache {
        #[arg(long)]
        key: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let key = match cli.key {
        Some(key) => key,
        None => std::env::var(API_KEY_ENV)
            .map_err(|_| format!("no admin key: pass --key or set {}", API_KEY_ENV))?,
    };

    let mut headers = HeaderMap::new();
    headers.insert(AUTHORIZATION, HeaderValue::from_str(&format!("Bearer {}", key))?);

    let (method, segments): (Method, Vec<&str>) = match &cli.command {
        Commands::Status => (Method::GET, vec!["admin", "status"]),
        Commands::ResetBreaker { name } => (Method::POST, vec!["admin", "breakers", name.as_str(), "reset"]),
        Commands::ClearCache { key: None } => (Method::DELETE, vec!["admin", "cache"]),
        Commands::ClearCache { key: Some(key) } => (Method::DELETE, vec!["admin", "cache", key.as_str()]),
    };

    let mut url = cli.url.clone();
    url.path_segments_mut()
        .map_err(|_| "gateway URL cannot be a base")?
        .pop_if_empty()
        .extend(segments);

    let res = client.request(method, url).headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
