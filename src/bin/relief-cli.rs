use clap::{Args, Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "relief-cli")]
#[command(about = "Admin CLI for the relief backend request logs", long_about = None)]
struct Cli {
    #[arg(short, long, env = "RELIEF_URL", default_value = "http://localhost:8000")]
    url: String,

    #[arg(short, long, env = "ADMIN_API_KEY")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
struct Filters {
    #[arg(long)]
    method: Option<String>,
    #[arg(long)]
    status_code: Option<u16>,
    /// Substring of the request path
    #[arg(long)]
    path: Option<String>,
    #[arg(long)]
    ip: Option<String>,
    /// RFC 3339 lower bound on created_at
    #[arg(long)]
    start_date: Option<String>,
    /// RFC 3339 upper bound on created_at
    #[arg(long)]
    end_date: Option<String>,
}

impl Filters {
    fn query(&self) -> Vec<(&'static str, String)> {
        let mut query = Vec::new();
        let mut push = |name, value: Option<String>| {
            if let Some(value) = value {
                query.push((name, value));
            }
        };
        push("method", self.method.clone());
        push("status_code", self.status_code.map(|s| s.to_string()));
        push("path", self.path.clone());
        push("ip", self.ip.clone());
        push("start_date", self.start_date.clone());
        push("end_date", self.end_date.clone());
        query
    }
}

#[derive(Subcommand)]
enum Commands {
    /// List request logs, newest first
    List {
        #[arg(long, default_value_t = 0)]
        skip: u64,
        #[arg(long, default_value_t = 100)]
        limit: u64,
        #[command(flatten)]
        filters: Filters,
    },
    /// Count request logs matching the filters
    Count {
        #[command(flatten)]
        filters: Filters,
    },
    /// Show one request log
    Get { id: String },
    /// List request logs for a resource id
    Resource {
        resource_id: String,
        #[arg(long, default_value_t = 0)]
        skip: u64,
        #[arg(long, default_value_t = 100)]
        limit: u64,
    },
    /// Delete one request log
    Delete { id: String },
    /// Check backend health
    Health,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();
    let base = cli.url.trim_end_matches('/');

    let mut headers = HeaderMap::new();
    headers.insert("x-api-key", HeaderValue::from_str(&cli.key)?);

    let request = match cli.command {
        Commands::List {
            skip,
            limit,
            filters,
        } => {
            let mut query = filters.query();
            query.push(("skip", skip.to_string()));
            query.push(("limit", limit.to_string()));
            client.get(format!("{}/request-logs", base)).query(&query)
        }
        Commands::Count { filters } => client
            .get(format!("{}/request-logs/count", base))
            .query(&filters.query()),
        Commands::Get { id } => client.get(format!("{}/request-logs/{}", base, id)),
        Commands::Resource {
            resource_id,
            skip,
            limit,
        } => client
            .get(format!("{}/request-logs/resource/{}", base, resource_id))
            .query(&[("skip", skip), ("limit", limit)]),
        Commands::Delete { id } => client.delete(format!("{}/request-logs/{}", base, id)),
        Commands::Health => client.get(format!("{}/health", base)),
    };

    let res = request.headers(headers).send().await?;
    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        std::process::exit(1);
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}
