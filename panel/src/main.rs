mod app;
mod handoff;
mod logger;
mod subscription;

use std::error::Error;
use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, bail};
use async_std::task::block_on;
use clap::{Parser, Subcommand};
use config::{RuleSetDescriptor, RuleSetFormat, SettingsProvider};
use ruleset::{Mirror, ProvisionerConfig};

use crate::app::{App, describe_action, parse_action};
use crate::handoff::{FileSink, StdoutSink};
use crate::logger::setup_logger;

const DB_FILE: &str = "panel.sqlite";
const CONFIG_FILE: &str = "config.json";

#[derive(Parser)]
#[command(
    name = "panel",
    version,
    about = "Keeps rule-sets cached and writes the proxy kernel configuration."
)]
struct Cli {
    /// Data directory holding the rule-set cache and generated config.
    #[arg(long, global = true, value_name = "DIR")]
    data_dir: Option<PathBuf>,
    /// Settings and node database. Defaults to <data-dir>/panel.sqlite.
    #[arg(long, global = true, value_name = "FILE")]
    db: Option<PathBuf>,
    /// Log file. Logs go to stderr when omitted.
    #[arg(short, long, global = true, value_name = "PATH")]
    log: Option<PathBuf>,
    #[arg(short, long, global = true)]
    verbose: bool,
    /// Download timeout, e.g. `30s` or `500ms`.
    #[arg(long, global = true, value_parser = config::duration::parse_duration)]
    timeout: Option<Duration>,
    /// Extra download mirror that takes the full url after its prefix.
    #[arg(long = "mirror", global = true, value_name = "PREFIX")]
    mirrors: Vec<String>,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Generate the kernel configuration.
    Generate {
        /// Write to this file instead of stdout.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    /// Download every enabled remote rule-set that is not cached yet.
    Provision,
    /// Report which enabled rule-sets are available locally.
    Check,
    /// Provision, generate and write the configuration.
    Run {
        /// Defaults to <data-dir>/config.json.
        #[arg(short, long)]
        out: Option<PathBuf>,
    },
    Settings {
        #[command(subcommand)]
        command: SettingsCommand,
    },
    Nodes {
        #[command(subcommand)]
        command: NodesCommand,
    },
    Rulesets {
        #[command(subcommand)]
        command: RuleSetsCommand,
    },
}

#[derive(Subcommand)]
enum SettingsCommand {
    Show,
    /// Update settings, e.g. `set tun_enabled=true local_port=2080`.
    Set {
        #[arg(required = true, value_name = "KEY=VALUE")]
        pairs: Vec<String>,
    },
}

#[derive(Subcommand)]
enum NodesCommand {
    List,
    /// Replace the node list with the nodes in a yaml file.
    Import { file: PathBuf },
    /// Replace the node list with the nodes of a subscription.
    Subscribe { url: String },
    /// Make a node the selector default.
    Select { tag: String },
}

#[derive(Subcommand)]
enum RuleSetsCommand {
    List,
    Add {
        tag: String,
        #[arg(long)]
        name: Option<String>,
        /// Download url of a remote rule-set.
        #[arg(long, conflicts_with = "path", required_unless_present = "path")]
        url: Option<String>,
        /// A rule-set file managed by you.
        #[arg(long)]
        path: Option<PathBuf>,
        /// `direct`, `proxy`, `block`, `node:<tag>` or `profile:<name>`.
        #[arg(long, default_value = "proxy")]
        action: String,
        /// The file is a source (json) rule-set instead of a binary one.
        #[arg(long)]
        source: bool,
    },
    Remove { tag: String },
    Enable { tag: String },
    Disable { tag: String },
}

fn default_data_dir() -> PathBuf {
    match std::env::var_os("HOME") {
        Some(home) => PathBuf::from(home).join(".panel"),
        None => PathBuf::from("panel-data"),
    }
}

fn print_progress(tag: &str, index: usize, total: usize) {
    println!("[{index}/{total}] {tag}");
}

fn main() -> Result<(), Box<dyn Error>> {
    let cli = Cli::parse();
    setup_logger(cli.log.as_deref(), cli.verbose)?;
    run(cli)?;
    Ok(())
}

fn run(cli: Cli) -> anyhow::Result<()> {
    let data_dir = cli.data_dir.clone().unwrap_or_else(default_data_dir);
    let db_path = cli.db.clone().unwrap_or_else(|| data_dir.join(DB_FILE));
    let mut provisioner_config = ProvisionerConfig::new(&data_dir);
    if let Some(timeout) = cli.timeout {
        provisioner_config.timeout = timeout;
    }
    provisioner_config
        .mirrors
        .extend(cli.mirrors.iter().cloned().map(Mirror::Prefix));

    let app = App::open(&db_path, provisioner_config)?;
    match cli.command {
        Command::Generate { out } => match out {
            Some(out) => app.generate_to(&FileSink::new(out))?,
            None => app.generate_to(&StdoutSink)?,
        },
        Command::Provision => {
            let report = block_on(app.provision(print_progress))?;
            println!("{} succeeded, {} failed", report.succeeded, report.failed);
            for (tag, reason) in &report.failures {
                println!("  {tag}: {reason}");
            }
            if report.failed > 0 {
                bail!("{} rule-sets could not be provisioned", report.failed);
            }
        }
        Command::Check => {
            let readiness = app.readiness()?;
            for tag in &readiness.ready {
                println!("ready   {tag}");
            }
            for tag in &readiness.missing {
                println!("missing {tag}");
            }
            if !readiness.is_ready() {
                bail!("{} rule-sets missing", readiness.missing.len());
            }
        }
        Command::Run { out } => {
            let sink = FileSink::new(out.unwrap_or_else(|| data_dir.join(CONFIG_FILE)));
            let report = block_on(app.run(&sink, print_progress))?;
            println!(
                "{} rule-sets ready, {} failed; configuration written to {}",
                report.succeeded,
                report.failed,
                sink.path().display()
            );
        }
        Command::Settings { command } => match command {
            SettingsCommand::Show => {
                let settings = app.store().get_settings()?;
                println!("{}", serde_json::to_string_pretty(&settings)?);
            }
            SettingsCommand::Set { pairs } => {
                let settings = app.set_settings(&pairs)?;
                println!("{}", serde_json::to_string_pretty(&settings)?);
            }
        },
        Command::Nodes { command } => run_nodes(&app, command)?,
        Command::Rulesets { command } => run_rule_sets(&app, command)?,
    }
    Ok(())
}

fn run_nodes(app: &App, command: NodesCommand) -> anyhow::Result<()> {
    let store = app.store();
    match command {
        NodesCommand::List => {
            let active = store.active_node()?;
            for node in store.nodes()? {
                let mark = if active.as_deref() == Some(node.tag.as_str()) {
                    "*"
                } else {
                    " "
                };
                println!(
                    "{mark} {:<24} {:<12} {}",
                    node.tag,
                    node.protocol,
                    node.server().unwrap_or("-")
                );
            }
        }
        NodesCommand::Import { file } => {
            let nodes =
                config::nodes_from_file(&file).with_context(|| format!("read nodes {:?}", file))?;
            store.replace_nodes(&nodes)?;
            println!("imported {} nodes", nodes.len());
        }
        NodesCommand::Subscribe { url } => {
            let nodes = subscription::load_subscription(
                store,
                &url,
                subscription::read_data_from_remote_config,
            )?;
            store.replace_nodes(&nodes)?;
            println!("imported {} nodes", nodes.len());
        }
        NodesCommand::Select { tag } => {
            app.select_node(&tag)?;
            println!("selected {tag}");
        }
    }
    Ok(())
}

fn run_rule_sets(app: &App, command: RuleSetsCommand) -> anyhow::Result<()> {
    let mut manifest = app.manifest()?;
    match command {
        RuleSetsCommand::List => {
            let provisioner = app.provisioner();
            for descriptor in manifest.rule_sets() {
                let state = if !descriptor.enabled {
                    "disabled"
                } else if provisioner
                    .check_readiness(std::slice::from_ref(descriptor))
                    .is_ready()
                {
                    "ready"
                } else {
                    "missing"
                };
                let location = match descriptor.url() {
                    Some(url) => url.to_string(),
                    None => descriptor
                        .artifact_path(&provisioner.cache_dir())
                        .display()
                        .to_string(),
                };
                println!(
                    "{:<28} {:<9} {:<14} {}",
                    descriptor.tag,
                    state,
                    describe_action(&descriptor.action),
                    location
                );
            }
            return Ok(());
        }
        RuleSetsCommand::Add {
            tag,
            name,
            url,
            path,
            action,
            source,
        } => {
            let name = name.unwrap_or_else(|| tag.clone());
            let action = parse_action(&action)?;
            let mut descriptor = match (url, path) {
                (Some(url), None) => RuleSetDescriptor::remote(&tag, &name, &url, action),
                (None, Some(path)) => RuleSetDescriptor::local(&tag, &name, path, action),
                _ => bail!("exactly one of --url or --path is required"),
            };
            if source {
                descriptor.format = RuleSetFormat::Source;
            }
            manifest.add(descriptor)?;
            println!("added {tag}");
        }
        RuleSetsCommand::Remove { tag } => {
            manifest.remove(&tag)?;
            println!("removed {tag}");
        }
        RuleSetsCommand::Enable { tag } => manifest.set_enabled(&tag, true)?,
        RuleSetsCommand::Disable { tag } => manifest.set_enabled(&tag, false)?,
    }
    manifest.save()?;
    Ok(())
}
