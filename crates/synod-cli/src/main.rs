use std::time::Duration;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use synod_client::SynodClient;
use synod_core::ClusterConfig;

/// Command-line client for MajorityLock / MajorityRegister / LockingQueue
/// clusters.
#[derive(Parser, Debug)]
#[command(name = "synodctl", version, about)]
struct Cli {
    /// Path to a cluster config JSON file (see `ClusterConfig`).
    #[arg(long, global = true)]
    config: Option<String>,

    /// Redis-compatible server URLs, comma-separated. Overrides `--config`
    /// when given alongside `--n-servers`.
    #[arg(long, global = true, value_delimiter = ',')]
    server: Vec<String>,

    /// Declared cluster size, required when `--server` is used directly.
    #[arg(long, global = true)]
    n_servers: Option<usize>,

    /// Lease/lock timeout in seconds.
    #[arg(long, global = true, default_value_t = 30.0)]
    lock_timeout: f64,

    /// Lease renewal polling interval in seconds.
    #[arg(long, global = true, default_value_t = 5.0)]
    polling_interval: f64,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Operate on a MajorityLock.
    Lock {
        #[command(subcommand)]
        action: LockAction,
    },
    /// Operate on a MajorityRegister.
    Register {
        #[command(subcommand)]
        action: RegisterAction,
    },
    /// Operate on a LockingQueue.
    Queue {
        #[command(subcommand)]
        action: QueueAction,
    },
}

#[derive(Subcommand, Debug)]
enum LockAction {
    Acquire { path: String },
    Release { path: String },
    Extend { path: String },
}

#[derive(Subcommand, Debug)]
enum RegisterAction {
    Get { path: String },
    Set { path: String, value: String },
    Exists { path: String },
    Ttl { path: String },
}

#[derive(Subcommand, Debug)]
enum QueueAction {
    Put {
        queue: String,
        item: String,
        #[arg(default_value_t = 0)]
        priority: i64,
    },
    Get {
        queue: String,
    },
    /// Re-extends a previously claimed item's lock. `handle` is the token
    /// printed by `queue get`.
    Extend {
        queue: String,
        handle: String,
    },
    /// Marks a previously claimed item as permanently done.
    Consume {
        queue: String,
        handle: String,
    },
    Size {
        queue: String,
    },
}

fn load_config(cli: &Cli) -> Result<ClusterConfig> {
    if let Some(path) = &cli.config {
        return ClusterConfig::from_file(path).with_context(|| format!("loading {path}"));
    }
    let n_servers = cli
        .n_servers
        .context("--n-servers is required when --config is not given")?;
    ClusterConfig::new(
        cli.server.clone(),
        n_servers,
        Duration::from_secs_f64(cli.lock_timeout),
        Duration::from_secs_f64(cli.polling_interval),
    )
    .context("building cluster config from CLI flags")
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    let config = load_config(&cli)?;
    let client = SynodClient::connect(config).context("connecting to cluster")?;

    match cli.command {
        Command::Lock { action } => run_lock(&client, action).await?,
        Command::Register { action } => run_register(&client, action).await?,
        Command::Queue { action } => run_queue(&client, action).await?,
    }
    Ok(())
}

async fn run_lock(client: &SynodClient, action: LockAction) -> Result<()> {
    let lock = client.lock();
    match action {
        LockAction::Acquire { path } => {
            let expireat = lock.lock(&path).await.context("acquiring lock")?;
            println!("locked {path} until {expireat}");
        }
        LockAction::Release { path } => {
            lock.unlock(&path).await.context("releasing lock")?;
            println!("unlocked {path}");
        }
        LockAction::Extend { path } => {
            lock.extend_lock(&path).await.context("extending lock")?;
            println!("extended {path}");
        }
    }
    Ok(())
}

async fn run_register(client: &SynodClient, action: RegisterAction) -> Result<()> {
    let register = client.register();
    match action {
        RegisterAction::Get { path } => match register.get(&path).await.context("reading register")? {
            Some(value) => println!("{value}"),
            None => println!("(unset)"),
        },
        RegisterAction::Set { path, value } => {
            register.set(&path, &value).await.context("writing register")?;
            println!("set {path}");
        }
        RegisterAction::Exists { path } => {
            let exists = register.exists(&path).await.context("checking register")?;
            println!("{exists}");
        }
        RegisterAction::Ttl { path } => match register.ttl(&path).await.context("reading ttl")? {
            Some(ms) => println!("{ms}ms"),
            None => println!("(no ttl)"),
        },
    }
    Ok(())
}

async fn run_queue(client: &SynodClient, action: QueueAction) -> Result<()> {
    match action {
        QueueAction::Put { queue, item, priority } => {
            let handle = client.queue(queue).put(&item, priority).await.context("putting item")?;
            println!("put {handle}");
        }
        QueueAction::Get { queue } => {
            let handle = client.queue(queue).get().await.context("getting item")?;
            println!("{handle}");
        }
        QueueAction::Extend { queue, handle } => {
            let handle = synod_core::QueueHandle::parse(&handle).context("parsing handle")?;
            client.queue(queue).extend_lock(&handle).await.context("extending item lock")?;
            println!("extended {handle}");
        }
        QueueAction::Consume { queue, handle } => {
            let handle = synod_core::QueueHandle::parse(&handle).context("parsing handle")?;
            let confirmed = client.queue(queue).consume(&handle).await.context("consuming item")?;
            println!("consumed {handle} ({:.0}% confirmed)", confirmed * 100.0);
        }
        QueueAction::Size { queue } => match client.queue(queue).size().await.context("sizing queue")? {
            Some(n) => println!("{n}"),
            None => println!("(unknown, below quorum)"),
        },
    }
    Ok(())
}
