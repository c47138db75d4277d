use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ledgerlink::config::{default_config_path, ResolvedConfig};
use ledgerlink::error::LinkError;
use ledgerlink::gate::Gate;
use ledgerlink::link::{LinkMode, LinkOutcome, LinkRequest, LinkService};
use ledgerlink::models::Id;
use ledgerlink::provider::{Credentials, HttpProviderClient, LoginForm, LoginFormRow, ProviderGateway};
use ledgerlink::storage::JsonFileStorage;

#[derive(Parser)]
#[command(name = "ledgerlink")]
#[command(about = "Links financial accounts through an aggregation provider")]
struct Cli {
    /// Path to config file
    #[arg(short, long)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Link an institution for a user and poll until the attempt finishes
    Link {
        #[arg(long)]
        user: String,
        /// The institution's id at the aggregation provider
        #[arg(long)]
        provider: String,
        /// Display name for the institution
        #[arg(long)]
        name: Option<String>,
        /// Institution username
        #[arg(long)]
        username: String,
        /// Institution password
        #[arg(long)]
        password: String,
        /// Run as a non-interactive refresh: MFA requests fail the attempt
        #[arg(long)]
        background: bool,
    },
    /// Submit MFA answers for a link waiting on user input
    Mfa {
        #[arg(long)]
        link: String,
        /// Form answers as id=value pairs, repeatable
        #[arg(long = "answer")]
        answers: Vec<String>,
    },
    /// Show a user's links and their statuses
    Status {
        #[arg(long)]
        user: String,
    },
    /// Re-run reconciliation for a successfully linked record
    Reconcile {
        #[arg(long)]
        link: String,
    },
    /// Delete a link, its accounts and transactions, and the remote
    /// provider-account
    Delete {
        #[arg(long)]
        link: String,
    },
}

fn build_service(config: &ResolvedConfig) -> Result<LinkService> {
    let storage = Arc::new(JsonFileStorage::new(&config.data_dir));

    let username = config
        .provider
        .username
        .clone()
        .or_else(|| std::env::var("LEDGERLINK_PROVIDER_USERNAME").ok())
        .context("provider username not configured (set [provider].username or LEDGERLINK_PROVIDER_USERNAME)")?;
    let password = config
        .provider
        .password
        .clone()
        .or_else(|| std::env::var("LEDGERLINK_PROVIDER_PASSWORD").ok())
        .context("provider password not configured (set [provider].password or LEDGERLINK_PROVIDER_PASSWORD)")?;

    let client = Arc::new(HttpProviderClient::new(config.provider.base_url.clone()));
    let gate = Gate::new(config.link.gate_permits)?;
    let gateway = Arc::new(ProviderGateway::new(
        client,
        Credentials::new(username, password),
        gate,
        config.link.retry_backoff,
    ));

    Ok(LinkService::new(
        storage,
        gateway,
        config.link.poll_interval,
    ))
}

fn parse_answers(answers: &[String]) -> Result<LoginForm> {
    let mut rows = Vec::with_capacity(answers.len());
    for answer in answers {
        let (id, value) = answer
            .split_once('=')
            .with_context(|| format!("expected id=value, got: {answer}"))?;
        rows.push(LoginFormRow {
            id: id.to_string(),
            label: id.to_string(),
            value: Some(value.to_string()),
        });
    }
    if rows.is_empty() {
        anyhow::bail!("at least one --answer is required");
    }
    Ok(LoginForm {
        form_type: "questionAndAnswer".to_string(),
        rows,
    })
}

fn report_outcome(outcome: &LinkOutcome) {
    match outcome {
        LinkOutcome::Completed(link) => {
            println!("{}  {}  {}", link.id, link.provider_name, link.status);
        }
        LinkOutcome::Superseded { link: Some(link) } => {
            println!(
                "attempt superseded; authoritative status: {}  {}",
                link.id, link.status
            );
        }
        LinkOutcome::Superseded { link: None } => {
            println!("attempt superseded; link record was deleted");
        }
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = ResolvedConfig::load_or_default(&config_path)?;
    let service = build_service(&config)?;

    match cli.command {
        Command::Link {
            user,
            provider,
            name,
            username,
            password,
            background,
        } => {
            let request = LinkRequest {
                provider_name: name.unwrap_or_else(|| provider.clone()),
                provider_id: provider,
                credentials: Credentials::new(username, password),
            };
            let mode = if background {
                LinkMode::Background
            } else {
                LinkMode::Interactive
            };
            match service.begin_link(&Id::from_string(user), request, mode).await {
                Ok(outcome) => report_outcome(&outcome),
                Err(LinkError::BadRequest(reason)) => anyhow::bail!("rejected: {reason}"),
                Err(err) => return Err(err.into()),
            }
        }
        Command::Mfa { link, answers } => {
            let form = parse_answers(&answers)?;
            service.submit_mfa(&Id::from_string(link), &form).await?;
            println!("submitted; the running attempt will pick the answers up on its next poll");
        }
        Command::Status { user } => {
            for link in service.list_links(&Id::from_string(user)).await? {
                println!("{}  {}  {}", link.id, link.provider_name, link.status);
            }
        }
        Command::Reconcile { link } => {
            let id = Id::from_string(link);
            let link = service
                .get_link(&id)
                .await?
                .with_context(|| format!("no such link: {id}"))?;
            let summary = service.reconcile(&link).await?;
            println!(
                "accounts: +{} ~{} -{}  transactions: +{} -{}",
                summary.accounts_created,
                summary.accounts_updated,
                summary.accounts_deleted,
                summary.transactions_inserted,
                summary.transactions_deleted
            );
        }
        Command::Delete { link } => {
            service.delete_link(&Id::from_string(link)).await?;
            println!("deleted");
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .init();

    if let Err(err) = run().await {
        eprintln!("error: {err:#}");
        std::process::exit(1);
    }
}
