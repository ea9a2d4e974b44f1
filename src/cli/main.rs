use anyhow::{bail, Context};
use clap::{Args, Parser, Subcommand};
use reqwest::Client;
use serde_json::{json, Map, Value};
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "queue-forecast-cli")]
#[command(about = "Queue Forecast CLI", long_about = None)]
struct Cli {
    #[arg(short, long, env = "QUEUE_FORECAST_ENDPOINT", default_value = "http://localhost:5001")]
    endpoint: String,

    #[command(subcommand)]
    command: Commands,
}

/// Fields shared by the single-value prediction commands
#[derive(Args)]
struct ContextArgs {
    /// Service name
    #[arg(short, long)]
    service: Option<String>,

    /// Join timestamp (RFC 3339 or YYYY-MM-DDTHH:MM:SS)
    #[arg(short = 'j', long)]
    joined_at: Option<String>,

    /// Day of week, 0 = Monday
    #[arg(short, long)]
    day_of_week: Option<u32>,

    /// Hour of day, 0-23
    #[arg(short = 'H', long)]
    hour: Option<u32>,

    /// Position in the queue
    #[arg(short, long)]
    position: Option<u32>,
}

impl ContextArgs {
    fn to_json(&self) -> Value {
        let mut body = Map::new();
        if let Some(service) = &self.service {
            body.insert("service".into(), json!(service));
        }
        if let Some(joined_at) = &self.joined_at {
            body.insert("joinedAt".into(), json!(joined_at));
        }
        if let Some(day) = self.day_of_week {
            body.insert("dayOfWeek".into(), json!(day));
        }
        if let Some(hour) = self.hour {
            body.insert("hourOfDay".into(), json!(hour));
        }
        if let Some(position) = self.position {
            body.insert("positionInQueue".into(), json!(position));
        }
        Value::Object(body)
    }
}

#[derive(Subcommand)]
enum Commands {
    /// Check server health
    Health,

    /// Predict the waiting time in minutes
    WaitTime(ContextArgs),

    /// Predict the number of people waiting
    QueueLength(ContextArgs),

    /// Predict the no-show probability
    NoShow(ContextArgs),

    /// Predict queue density for an hour
    PeakHours {
        #[command(flatten)]
        context: ContextArgs,

        /// Also predict every opening hour of the day
        #[arg(long)]
        daily: bool,
    },

    /// Suggest the best hours to visit
    Suggest {
        #[arg(short, long)]
        service: Option<String>,

        /// Day of week, 0 = Monday
        #[arg(short, long)]
        day_of_week: Option<u32>,
    },

    /// Retrain all models from a JSON file of records
    Train {
        /// File holding a JSON array of records, or an object with a `data` array
        #[arg(short, long)]
        file: PathBuf,
    },
}

async fn post(client: &Client, url: String, body: &Value) -> anyhow::Result<Value> {
    let response = client
        .post(&url)
        .json(body)
        .send()
        .await
        .with_context(|| format!("request to {} failed", url))?;
    Ok(response.json().await?)
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let client = Client::new();

    let body: Value = match cli.command {
        Commands::Health => {
            let response = client
                .get(format!("{}/health", cli.endpoint))
                .send()
                .await?;
            response.json().await?
        }

        Commands::WaitTime(context) => {
            post(&client, format!("{}/predict/waiting-time", cli.endpoint), &context.to_json()).await?
        }

        Commands::QueueLength(context) => {
            post(&client, format!("{}/predict/queue-length", cli.endpoint), &context.to_json()).await?
        }

        Commands::NoShow(context) => {
            post(&client, format!("{}/predict/no-show", cli.endpoint), &context.to_json()).await?
        }

        Commands::PeakHours { context, daily } => {
            let path = if daily { "predict/peak-hours/daily" } else { "predict/peak-hours" };
            post(&client, format!("{}/{}", cli.endpoint, path), &context.to_json()).await?
        }

        Commands::Suggest { service, day_of_week } => {
            let mut body = Map::new();
            if let Some(service) = service {
                body.insert("service".into(), json!(service));
            }
            if let Some(day) = day_of_week {
                body.insert("dayOfWeek".into(), json!(day));
            }
            post(&client, format!("{}/suggest/best-time", cli.endpoint), &Value::Object(body)).await?
        }

        Commands::Train { file } => {
            let raw = std::fs::read_to_string(&file)
                .with_context(|| format!("cannot read {}", file.display()))?;
            let records: Value = serde_json::from_str(&raw)
                .with_context(|| format!("{} is not valid JSON", file.display()))?;

            let body = if records.is_array() {
                json!({ "data": records })
            } else if records.get("data").is_some() {
                records
            } else {
                bail!("{} must hold an array of records", file.display());
            };
            post(&client, format!("{}/train", cli.endpoint), &body).await?
        }
    };

    println!("{}", serde_json::to_string_pretty(&body)?);
    Ok(())
}
