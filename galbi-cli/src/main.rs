mod after_response;
mod authorize;
mod config;

use std::collections::{BTreeMap, BTreeSet};
use std::process;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use galbi::{
    CommandCipher, GithubTracker, Key, ProxyClient, SecretStore, Store, WriteMode,
};
use serde_json::Value;
use tracing_subscriber::EnvFilter;

use crate::authorize::Outcome;
use crate::config::{Config, Paths, ProxyConfig, StoreConfig};

#[derive(Parser, Debug)]
#[command(name = "galbi")]
#[command(version)]
#[command(about = "Versioned key-value store on top of an issue tracker", long_about = None)]
struct Args {
    /// Bearer token, overrides the saved credential
    #[arg(long, global = true, env = "GALBI_TOKEN", hide_env_values = true)]
    token: Option<String>,

    /// Log every remote request
    #[arg(long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    cmd: Cmd,
}

#[derive(Subcommand, Debug)]
enum Cmd {
    /// Write the local config and credential
    Init {
        /// Repository backing the store (owner/name)
        #[arg(long)]
        repo: Option<String>,

        /// Tracker API base url
        #[arg(long)]
        api_url: Option<String>,

        /// Secret proxy base url
        #[arg(long)]
        proxy: Option<String>,

        /// Overwrite an existing config
        #[arg(long)]
        refresh: bool,
    },
    /// Obtain a token through the browser
    Authorize {
        /// Ask again even if a credential is saved
        #[arg(long)]
        force: bool,

        /// Local port for the callback, 0 picks a free one
        #[arg(short = 'p', long, default_value_t = 0)]
        port: u16,
    },
    /// Upsert every entry of a JSON object file
    Deploy {
        #[arg(env = "FILENAME")]
        file: String,
    },
    /// Upsert a single key
    DeployKey {
        #[arg(short = 'k', long = "key")]
        key: String,

        #[arg(short = 'v', long = "value")]
        value: String,

        /// Parse the value as JSON instead of storing it as a string
        #[arg(long)]
        json: bool,
    },
    /// Print the current values of keys
    Get {
        #[arg(short = 'k', long = "key", required = true, num_args = 1..)]
        keys: Vec<String>,
    },
    /// Print one revision of a key, 0 is the first write
    Rev { key: String, rev: u64 },
    /// Print every revision of a key
    History { key: String },
    /// Move every key's latest value into its issue body
    Migrate,
    /// Encrypted values kept on the secret proxy
    Secret {
        #[command(subcommand)]
        cmd: SecretCmd,
    },
}

#[derive(Subcommand, Debug)]
enum SecretCmd {
    Put {
        #[arg(short = 'k', long = "key")]
        key: String,

        #[arg(short = 'v', long = "value")]
        value: String,

        #[arg(long)]
        json: bool,
    },
    Get {
        #[arg(short = 'k', long = "key", required = true, num_args = 1..)]
        keys: Vec<String>,
    },
}

fn main() {
    let args = Args::parse();
    init_tracing(args.verbose);

    if let Err(err) = run(args) {
        eprintln!("error: {err:#}");
        process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn run(args: Args) -> anyhow::Result<()> {
    let paths = Paths::locate()?;
    let token = args.token.as_deref();

    match args.cmd {
        Cmd::Init {
            repo,
            api_url,
            proxy,
            refresh,
        } => run_init(&paths, repo, api_url, proxy, token, refresh),
        Cmd::Authorize { force, port } => run_authorize(paths, force, port),
        Cmd::Deploy { file } => run_deploy(&paths, token, &file),
        Cmd::DeployKey { key, value, json } => {
            let store = open_store(&paths, token)?;
            store.upsert(&Key::parse(key)?, &parse_value(value, json)?)?;
            Ok(())
        }
        Cmd::Get { keys } => {
            let store = open_store(&paths, token)?;
            let found = store.get(&parse_keys(keys)?)?;
            print_json(&found)
        }
        Cmd::Rev { key, rev } => {
            let store = open_store(&paths, token)?;
            print_json(&store.get_revision(&Key::parse(key)?, rev)?)
        }
        Cmd::History { key } => {
            let store = open_store(&paths, token)?;
            for revision in store.history(&Key::parse(key)?)? {
                println!(
                    "{}\t{}\t{}",
                    revision.rev,
                    revision.created_at.to_rfc3339(),
                    revision.value
                );
            }
            Ok(())
        }
        Cmd::Migrate => {
            let store = open_store(&paths, token)?;
            let report = galbi::migrate(store.tracker())?;
            println!(
                "scanned {} issues, migrated {}, skipped {} without comments",
                report.scanned, report.migrated, report.skipped
            );
            Ok(())
        }
        Cmd::Secret { cmd } => run_secret(&paths, token, cmd),
    }
}

fn run_init(
    paths: &Paths,
    repo: Option<String>,
    api_url: Option<String>,
    proxy: Option<String>,
    token: Option<&str>,
    refresh: bool,
) -> anyhow::Result<()> {
    if paths.config_file().exists() && !refresh {
        println!(
            "{} already exists, pass --refresh to overwrite it",
            paths.config_file().display()
        );
        return Ok(());
    }
    if repo.is_none() && proxy.is_none() {
        bail!("init needs --repo, --proxy or both");
    }

    let mut config = paths.load_config()?;
    if let Some(repo) = repo {
        let previous = config.store.take();
        config.store = Some(StoreConfig {
            repo,
            api_url: api_url
                .or_else(|| previous.as_ref().map(|s| s.api_url.clone()))
                .unwrap_or_else(|| galbi::github::DEFAULT_API_URL.to_string()),
            mode: previous.map(|s| s.mode).unwrap_or(WriteMode::Append),
        });
    }
    if let Some(url) = proxy {
        config.proxy = Some(match config.proxy.take() {
            Some(existing) => ProxyConfig { url, ..existing },
            None => ProxyConfig::new(url),
        });
    }
    paths.save_config(&config)?;
    if let Some(token) = token {
        paths.save_token(token)?;
    }
    println!("Wrote {}", paths.config_file().display());
    Ok(())
}

fn run_authorize(paths: Paths, force: bool, port: u16) -> anyhow::Result<()> {
    let config = paths.load_config()?;
    let authorize_url = config.proxy()?.authorize_url();

    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .context("failed to start the async runtime")?;
    match runtime.block_on(authorize::authorize(paths, &authorize_url, port, force))? {
        Outcome::AlreadyAuthorized => {
            println!("Already authorized, pass --force to authorize again")
        }
        Outcome::Authorized => println!("Authorized"),
    }
    Ok(())
}

fn run_deploy(paths: &Paths, token: Option<&str>, file: &str) -> anyhow::Result<()> {
    let content =
        std::fs::read_to_string(file).with_context(|| format!("failed to read {file}"))?;
    let object: BTreeMap<String, Value> = serde_json::from_str(&content)
        .with_context(|| format!("{file} must contain a JSON object"))?;
    let entries = object
        .into_iter()
        .map(|(key, value)| Ok((Key::parse(key)?, value)))
        .collect::<galbi::Result<BTreeMap<_, _>>>()?;

    let store = open_store(paths, token)?;
    let count = store.deploy(&entries, file)?;
    println!("Deployed {count} keys from {file}");
    Ok(())
}

fn run_secret(paths: &Paths, token: Option<&str>, cmd: SecretCmd) -> anyhow::Result<()> {
    let config = paths.load_config()?;
    let proxy = config.proxy()?;
    let cipher = CommandCipher::new(proxy.encrypt_command.clone(), proxy.decrypt_command.clone())?;
    let token = paths.resolve_token(token)?;
    let store = SecretStore::new(cipher, ProxyClient::new(&proxy.url, &token)?);

    match cmd {
        SecretCmd::Put { key, value, json } => {
            store.upsert(&Key::parse(key)?, &parse_value(value, json)?)?;
            Ok(())
        }
        SecretCmd::Get { keys } => print_json(&store.get(&parse_keys(keys)?)?),
    }
}

fn open_store(paths: &Paths, token: Option<&str>) -> anyhow::Result<Store<GithubTracker>> {
    let config: Config = paths.load_config()?;
    let store_config = config.store()?;
    let token = paths.resolve_token(token)?;
    let tracker = GithubTracker::new(&store_config.api_url, &store_config.repo, &token)?;
    Ok(Store::new(tracker).with_mode(store_config.mode))
}

fn parse_value(raw: String, json: bool) -> anyhow::Result<Value> {
    if json {
        serde_json::from_str(&raw).context("value is not valid JSON")
    } else {
        Ok(Value::String(raw))
    }
}

fn parse_keys(raw: Vec<String>) -> galbi::Result<BTreeSet<Key>> {
    raw.into_iter().map(Key::parse).collect()
}

fn print_json<T: serde::Serialize>(value: &T) -> anyhow::Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
