use finvoice_orchestrator::{bootstrap::Runtime, config::AppConfig};
use futures::StreamExt;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tracing::info;
use tracing_subscriber::EnvFilter;

const SESSION_ID: &str = "demo_user";

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    dotenv::dotenv().ok();

    // Logs go to stderr so they don't mix with the streamed reply.
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = AppConfig::from_env()?;
    let runtime = Runtime::connect(&config).await?;
    info!(session_id = SESSION_ID, "FinVoice chat started");

    println!("FinVoice - your personal finance assistant. Type 'exit' to quit.");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdout = tokio::io::stdout();

    loop {
        stdout.write_all(b"\nYou: ").await?;
        stdout.flush().await?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let input = line.trim();

        if input.is_empty() {
            continue;
        }
        if matches!(input.to_lowercase().as_str(), "exit" | "quit") {
            println!("Goodbye!");
            break;
        }

        stdout.write_all(b"FinVoice: ").await?;
        let mut turn = runtime.orchestrator.submit_turn(SESSION_ID, input);
        while let Some(fragment) = turn.next().await {
            stdout.write_all(fragment.as_bytes()).await?;
            stdout.flush().await?;
        }
        stdout.write_all(b"\n").await?;

        let report = turn.finish().await;
        info!(
            round_trips = report.round_trips,
            tool_calls = report.tool_calls,
            version = report.version,
            "Turn complete"
        );
    }

    runtime.shutdown().await;
    Ok(())
}
