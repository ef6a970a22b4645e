use clap::{Parser, Subcommand};
use reqwest::header::{HeaderMap, HeaderValue, AUTHORIZATION};
use serde_json::Value;

#[derive(Parser)]
#[command(name = "capture-cli")]
#[command(about = "Management CLI for the capture proxy", long_about = None)]
struct Cli {
    #[arg(short, long, env = "CAPTURE_ADMIN_URL", default_value = "http://localhost:8081")]
    url: String,

    #[arg(short, long, env = "CAPTURE_ADMIN_KEY", default_value = "CHANGE_ME_IN_PRODUCTION")]
    key: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check proxy status
    Status,
    /// Show the number of in-flight sessions
    Sessions,
    /// Show tenant cache sizes
    Cache,
    /// Drop every cached tenant lookup
    Invalidate,
    /// Check that the live event feed accepts connections
    Events,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let client = reqwest::Client::new();

    let mut headers = HeaderMap::new();
    headers.insert(
        AUTHORIZATION,
        HeaderValue::from_str(&format!("Bearer {}", cli.key))?,
    );

    let base = cli.url.trim_end_matches('/');
    let res = match cli.command {
        Commands::Status => client.get(format!("{base}/admin/status")),
        Commands::Sessions => client.get(format!("{base}/admin/sessions")),
        Commands::Cache => client.get(format!("{base}/admin/cache")),
        Commands::Invalidate => client.post(format!("{base}/admin/cache/invalidate")),
        Commands::Events => {
            return probe_events(&client, base, headers).await;
        }
    }
    .headers(headers)
    .send()
    .await?;

    print_response(res).await
}

async fn print_response(res: reqwest::Response) -> Result<(), Box<dyn std::error::Error>> {
    let status = res.status();
    if !status.is_success() {
        eprintln!("Error: Admin API returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
        return Ok(());
    }

    let json: Value = res.json().await?;
    println!("{}", serde_json::to_string_pretty(&json)?);
    Ok(())
}

/// Issue the WebSocket handshake and report whether the server accepted it.
async fn probe_events(
    client: &reqwest::Client,
    base: &str,
    mut headers: HeaderMap,
) -> Result<(), Box<dyn std::error::Error>> {
    headers.insert("connection", HeaderValue::from_static("upgrade"));
    headers.insert("upgrade", HeaderValue::from_static("websocket"));
    headers.insert("sec-websocket-version", HeaderValue::from_static("13"));
    headers.insert("sec-websocket-key", HeaderValue::from_static("dGhlIHNhbXBsZSBub25jZQ=="));

    let res = client
        .get(format!("{base}/admin/events"))
        .headers(headers)
        .send()
        .await?;

    let status = res.status();
    if status == reqwest::StatusCode::SWITCHING_PROTOCOLS {
        println!("Event feed available at {base}/admin/events");
    } else {
        eprintln!("Error: event feed handshake returned status {}", status);
        if let Ok(text) = res.text().await {
            eprintln!("Response: {}", text);
        }
    }
    Ok(())
}
