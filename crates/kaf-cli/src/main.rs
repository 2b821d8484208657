//! `kaf` command-line client.
//!
//! Manages the cluster list in `~/.kaf/config` and runs admin and offset
//! commands against the selected cluster.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{bail, Context};
use clap::{Parser, Subcommand};
use tracing::{debug, Level};
use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use kaf_core::broker::BrokerConnection;
use kaf_core::config::Config;
use kaf_core::manager::{ConnManager, FileConfigLoader};
use kaf_core::offsets::{OffsetRequest, OffsetTime};
use kaf_core::TopicDetail;

/// Environment variable switching log output to JSON.
const LOG_JSON_ENV: &str = "KAF_LOG_JSON";

/// Kafka command-line client.
#[derive(Parser)]
#[command(name = "kaf")]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the config file (default: ~/.kaf/config).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Cluster to use instead of the current one.
    #[arg(short, long, global = true)]
    cluster: Option<String>,

    /// Increase logging verbosity (-v info, -vv debug, -vvv trace).
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Inspect and switch clusters.
    #[command(subcommand)]
    Config(ConfigCommand),

    #[command(flatten)]
    Cluster(ClusterCommand),
}

/// Commands that connect to a cluster.
#[derive(Subcommand)]
enum ClusterCommand {
    /// List topics.
    Topics,

    /// Create or delete a topic.
    #[command(subcommand)]
    Topic(TopicCommand),

    /// Inspect brokers.
    #[command(subcommand)]
    Node(NodeCommand),

    /// Show earliest and latest offsets of every partition of a topic.
    Offsets {
        /// Topic name.
        topic: String,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Print the current cluster.
    CurrentContext,
    /// List configured clusters.
    GetClusters,
    /// Make a cluster the current one.
    UseCluster {
        /// Cluster name.
        name: String,
    },
}

#[derive(Subcommand)]
enum TopicCommand {
    /// Create a topic.
    Create {
        /// Topic name.
        name: String,
        /// Number of partitions.
        #[arg(short, long, default_value_t = 1)]
        partitions: i32,
        /// Replication factor.
        #[arg(short, long, default_value_t = 1)]
        replicas: i16,
        /// Only validate the request on the controller.
        #[arg(long)]
        validate_only: bool,
    },
    /// Delete a topic.
    Delete {
        /// Topic name.
        name: String,
    },
}

#[derive(Subcommand)]
enum NodeCommand {
    /// List brokers.
    Ls,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    setup_tracing(args.verbose);

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;

    runtime.block_on(run(args))
}

fn setup_tracing(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::INFO,
        2 => Level::DEBUG,
        _ => Level::TRACE,
    };

    let filter = EnvFilter::from_default_env().add_directive(level.into());
    let json = std::env::var(LOG_JSON_ENV).is_ok_and(|v| !v.is_empty() && v != "0");

    let subscriber = tracing_subscriber::registry().with(filter);

    if json {
        subscriber
            .with(fmt::layer().json().with_writer(std::io::stderr))
            .init();
    } else {
        subscriber
            .with(fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config_path = args.config.as_deref();

    match args.command {
        Command::Config(command) => run_config(command, config_path),
        Command::Cluster(command) => {
            let config = Config::read(config_path)?;
            let cluster = args
                .cluster
                .unwrap_or_else(|| config.current_cluster.clone());
            debug!(cluster = %cluster, "selected cluster");

            let manager = ConnManager::with_loader(FileConfigLoader::new(args.config.clone()));
            let result = run_cluster(command, &manager, &cluster).await;
            manager.close_all().await;
            result
        }
    }
}

fn run_config(command: ConfigCommand, path: Option<&std::path::Path>) -> anyhow::Result<()> {
    let mut config = Config::read(path)?;

    match command {
        ConfigCommand::CurrentContext => {
            if config.current_cluster.is_empty() {
                bail!("no current cluster set");
            }
            println!("{}", config.current_cluster);
        }
        ConfigCommand::GetClusters => {
            println!("NAME");
            for cluster in &config.clusters {
                let marker = if cluster.name == config.current_cluster {
                    " *"
                } else {
                    ""
                };
                println!("{}{marker}", cluster.name);
            }
        }
        ConfigCommand::UseCluster { name } => {
            config.set_current_cluster(&name)?;
            config.write(path)?;
            println!("Switched to cluster \"{name}\".");
        }
    }
    Ok(())
}

async fn run_cluster(
    command: ClusterCommand,
    manager: &ConnManager,
    cluster: &str,
) -> anyhow::Result<()> {
    match command {
        ClusterCommand::Topics => {
            let admin = manager.get_admin_client(cluster).await?;
            let topics = admin.list_topics().await?;

            let width = topics.keys().map(String::len).max().unwrap_or(0).max(4);
            println!("{:<width$}  {:>10}  {:>8}", "NAME", "PARTITIONS", "REPLICAS");
            for (name, detail) in &topics {
                println!(
                    "{name:<width$}  {:>10}  {:>8}",
                    detail.num_partitions, detail.replication_factor
                );
            }
        }
        ClusterCommand::Topic(TopicCommand::Create {
            name,
            partitions,
            replicas,
            validate_only,
        }) => {
            let admin = manager.get_admin_client(cluster).await?;
            let detail = TopicDetail {
                num_partitions: partitions,
                replication_factor: replicas,
                ..TopicDetail::default()
            };
            admin
                .create_topic(&name, &detail, validate_only)
                .await
                .with_context(|| format!("failed to create topic {name}"))?;
            if validate_only {
                println!("Topic {name} is valid.");
            } else {
                println!("Created topic {name}.");
            }
        }
        ClusterCommand::Topic(TopicCommand::Delete { name }) => {
            let admin = manager.get_admin_client(cluster).await?;
            admin
                .delete_topic(&name)
                .await
                .with_context(|| format!("failed to delete topic {name}"))?;
            println!("Deleted topic {name}.");
        }
        ClusterCommand::Node(NodeCommand::Ls) => {
            let admin = manager.get_admin_client(cluster).await?;
            let description = admin.describe_cluster().await?;

            println!("{:>6}  {:<30}  CONTROLLER", "ID", "ADDRESS");
            for broker in &description.brokers {
                let controller = if broker.id == description.controller_id {
                    "true"
                } else {
                    "false"
                };
                println!("{:>6}  {:<30}  {controller}", broker.id, broker.address);
            }
        }
        ClusterCommand::Offsets { topic } => show_offsets(manager, cluster, &topic).await?,
    }
    Ok(())
}

/// Print earliest and latest offsets per partition, querying each leader once.
async fn show_offsets(manager: &ConnManager, cluster: &str, topic: &str) -> anyhow::Result<()> {
    let client = manager.get_client(cluster).await?;
    let partitions = client.partitions(topic).await?;

    let mut by_leader: BTreeMap<i32, (Arc<BrokerConnection>, Vec<i32>)> = BTreeMap::new();
    for partition in partitions {
        let leader = client
            .leader(topic, partition)
            .await
            .with_context(|| format!("no leader for {topic}/{partition}"))?;
        by_leader
            .entry(leader.id())
            .or_insert_with(|| (Arc::clone(&leader), Vec::new()))
            .1
            .push(partition);
    }

    let mut rows: BTreeMap<i32, (i64, i64)> = BTreeMap::new();
    for (leader, partitions) in by_leader.values() {
        let mut earliest = OffsetRequest::new();
        let mut latest = OffsetRequest::new();
        for &partition in partitions {
            earliest.add_block(topic, partition, OffsetTime::Earliest, 1);
            latest.add_block(topic, partition, OffsetTime::Latest, 1);
        }

        let earliest = manager.get_available_offsets(leader, cluster, &earliest).await?;
        let latest = manager.get_available_offsets(leader, cluster, &latest).await?;

        for &partition in partitions {
            let low = match earliest.get_block(topic, partition) {
                Some(block) => block.result()?,
                None => bail!("missing earliest offset for {topic}/{partition}"),
            };
            let high = match latest.get_block(topic, partition) {
                Some(block) => block.result()?,
                None => bail!("missing latest offset for {topic}/{partition}"),
            };
            rows.insert(partition, (low, high));
        }
    }

    println!("{:>9}  {:>15}  {:>15}", "PARTITION", "EARLIEST", "LATEST");
    for (partition, (low, high)) in rows {
        println!("{partition:>9}  {low:>15}  {high:>15}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Args::command().debug_assert();
    }

    #[test]
    fn test_parse_topic_create() {
        let args = Args::parse_from(["kaf", "-c", "prod", "topic", "create", "events", "-p", "6", "-r", "3"]);
        assert_eq!(args.cluster.as_deref(), Some("prod"));
        match args.command {
            Command::Cluster(ClusterCommand::Topic(TopicCommand::Create {
                name,
                partitions,
                replicas,
                validate_only,
            })) => {
                assert_eq!(name, "events");
                assert_eq!(partitions, 6);
                assert_eq!(replicas, 3);
                assert!(!validate_only);
            }
            _ => panic!("expected topic create"),
        }
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let args = Args::parse_from(["kaf", "offsets", "orders", "--config", "/tmp/kaf.yaml", "-vv"]);
        assert_eq!(args.verbose, 2);
        assert_eq!(args.config, Some(PathBuf::from("/tmp/kaf.yaml")));
        assert!(matches!(
            args.command,
            Command::Cluster(ClusterCommand::Offsets { ref topic }) if topic == "orders"
        ));
    }

    #[test]
    fn test_parse_config_use_cluster() {
        let args = Args::parse_from(["kaf", "config", "use-cluster", "staging"]);
        assert!(matches!(
            args.command,
            Command::Config(ConfigCommand::UseCluster { ref name }) if name == "staging"
        ));
    }
}
