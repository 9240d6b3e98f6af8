//! relayq CLI — operator interface to the queue.

use clap::{Parser, Subcommand};
use relayq::config::Config;
use relayq::envelope::JobEnvelope;
use relayq::history::HistoryReader;
use relayq::producer::Producer;
use relayq::store::postgres::PgStore;
use relayq::telemetry::{TelemetryConfig, init_telemetry};
use secrecy::ExposeSecret;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "relayq", about = "List-backed work queue")]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Push a job onto a queue
    Push {
        /// Queue name, unprefixed (e.g. `emails`)
        queue: String,
        /// Job name, selects the handler pair on the worker side
        #[arg(long, default_value = "default")]
        job: String,
        /// JSON payload for the job
        #[arg(long)]
        payload: Option<String>,
    },
    /// Inspect the processed-history lists
    History {
        #[command(subcommand)]
        list: HistoryList,
    },
}

#[derive(Subcommand)]
enum HistoryList {
    /// Successfully processed jobs, most recent first
    Success {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
    /// Failed jobs, most recent first
    Failed {
        #[arg(long, default_value_t = 20)]
        limit: i64,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();

    let config = Config::from_env()?;
    let _guard = init_telemetry(TelemetryConfig {
        endpoint: config.otel_endpoint.clone(),
        service_name: "relayq".to_string(),
    })?;

    let store = PgStore::connect(config.database_url.expose_secret()).await?;
    store.migrate().await?;
    let store: Arc<PgStore> = Arc::new(store);

    match cli.command {
        Command::Push {
            queue,
            job,
            payload,
        } => {
            let payload: serde_json::Value = match payload {
                Some(json) => serde_json::from_str(&json)?,
                None => serde_json::json!({}),
            };

            let len = Producer::new(store).push(&queue, &job, payload).await?;
            println!("Pushed to queue:{queue} (length now {len})");
        }
        Command::History { list } => {
            let reader = HistoryReader::new(store);
            let records = match list {
                HistoryList::Success { limit } => reader.successes(0, limit - 1).await?,
                HistoryList::Failed { limit } => reader.failures(0, limit - 1).await?,
            };

            if records.is_empty() {
                println!("No records.");
                return Ok(());
            }

            for record in &records {
                print_record(record)?;
            }
            println!("{} record(s)", records.len());
        }
    }

    Ok(())
}

fn print_record(record: &JobEnvelope) -> anyhow::Result<()> {
    println!("ID:        {}", record.meta.id);
    println!("Queue:     {}", record.meta.queue);
    println!("Job:       {}", record.meta.job_name);
    println!("Datetime:  {}", record.meta.datetime);
    println!("Payload:   {}", serde_json::to_string_pretty(&record.job)?);
    if let Some(ref context) = record.context {
        println!("Context:   {}", serde_json::to_string_pretty(context)?);
    }
    println!("---");
    Ok(())
}
