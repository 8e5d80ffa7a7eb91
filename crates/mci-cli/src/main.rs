//! mci - multi-cloud VM fleet CLI
//!
//! Talks to a running `mci-orchestrator` daemon over its control port:
//! - Namespaces, connections and SSH keys
//! - MCI creation, scale-out, power actions and deletion
//! - Remote commands, file copy and bastion assignment

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use mci_core::model::{ConnectionConfig, DeleteOption, MciView, VmFilter};
use mci_core::VmAction;
use mci_fleet::commands::{self, DeleteTarget, Targets};
use mci_fleet::ipc::{FleetClient, DEFAULT_ADDRESS};

#[derive(Parser)]
#[command(name = "mci")]
#[command(author, version, about = "Multi-cloud VM fleet manager")]
#[command(propagate_version = true)]
struct Cli {
    /// Orchestrator control address
    #[arg(short, long, global = true, env = "MCI_ADDRESS", default_value = DEFAULT_ADDRESS)]
    address: String,

    /// Namespace to operate in
    #[arg(short, long, global = true, env = "MCI_NAMESPACE", default_value = "default")]
    ns: String,

    /// Path to the orchestrator configuration file
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Enable verbose output
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    /// Suppress all output except errors
    #[arg(short, long, global = true)]
    quiet: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the orchestrator daemon in the background
    Start {
        /// Persist records to this JSON file
        #[arg(long)]
        store: Option<PathBuf>,
    },

    /// Stop the orchestrator daemon
    Stop,

    /// Check that the orchestrator answers
    Ping,

    /// Show orchestrator status
    Status,

    /// Manage namespaces
    #[command(alias = "ns")]
    Namespace {
        #[command(subcommand)]
        action: NamespaceAction,
    },

    /// Manage cloud connections
    #[command(alias = "conn")]
    Connection {
        #[command(subcommand)]
        action: ConnectionAction,
    },

    /// Manage SSH keys of the namespace
    Key {
        #[command(subcommand)]
        action: KeyAction,
    },

    /// Create an MCI from a JSON or TOML request file
    Create {
        /// Request file (`.toml` for TOML, JSON otherwise)
        file: PathBuf,
        /// Templates use `provider+region+spec` and are resolved by the daemon
        #[arg(short, long)]
        dynamic: bool,
    },

    /// Show one MCI
    Get {
        mci: String,
        /// default, id, status or accessinfo
        #[arg(long, default_value = "default")]
        view: MciView,
        /// Only VMs whose attribute matches, e.g. `status=Running`
        #[arg(short, long)]
        filter: Option<VmFilter>,
        /// Show detailed VM columns
        #[arg(short, long)]
        long: bool,
    },

    /// List MCIs in the namespace
    #[command(alias = "ls")]
    List {
        /// default, id, status or accessinfo
        #[arg(long, default_value = "default")]
        view: MciView,
        /// Only MCIs with a VM whose attribute matches
        #[arg(short, long)]
        filter: Option<VmFilter>,
        /// Show every MCI's VMs as well
        #[arg(short, long)]
        long: bool,
    },

    /// Inspect VMs
    Vm {
        #[command(subcommand)]
        action: VmCommand,
    },

    /// Add a SubGroup to an MCI from a VM template file
    AddSubgroup {
        mci: String,
        /// Template file (`.toml` for TOML, JSON otherwise)
        file: PathBuf,
    },

    /// Add replicas to a SubGroup
    ScaleOut {
        mci: String,
        sub_group: String,
        /// Number of VMs to add
        #[arg(allow_negative_numbers = true)]
        count: i64,
    },

    /// Suspend, resume, reboot or terminate VMs
    Control {
        mci: String,
        action: VmAction,
        /// Only this VM
        #[arg(long)]
        vm: Option<String>,
    },

    /// Drop the records of failed VMs
    Refine { mci: String },

    /// Delete a VM, an MCI, or every MCI in the namespace
    Delete {
        /// MCI to delete
        #[arg(required_unless_present = "all", conflicts_with = "all")]
        mci: Option<String>,
        /// Only this VM of the MCI
        #[arg(long, requires = "mci")]
        vm: Option<String>,
        /// Every MCI in the namespace
        #[arg(long)]
        all: bool,
        /// Remove records even when termination cannot be confirmed
        #[arg(long)]
        force: bool,
        /// Remove records without terminating provider instances
        #[arg(long)]
        keep_instances: bool,
    },

    /// Run shell commands on the VMs of an MCI
    Cmd {
        mci: String,
        /// Commands, run in order on each VM
        #[arg(required = true, last = true)]
        commands: Vec<String>,
        #[arg(long)]
        sub_group: Option<String>,
        #[arg(long)]
        vm: Option<String>,
        /// Log in as this user instead of the VM's user
        #[arg(short, long)]
        user: Option<String>,
    },

    /// Copy a local file to the VMs of an MCI
    Copy {
        mci: String,
        file: PathBuf,
        /// Destination directory on the VMs
        target_path: String,
        #[arg(long)]
        sub_group: Option<String>,
        #[arg(long)]
        vm: Option<String>,
    },

    /// Manage bastion hosts
    Bastion {
        #[command(subcommand)]
        action: BastionAction,
    },

    /// Manage the orchestrator configuration file
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum NamespaceAction {
    Create {
        id: String,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    Get {
        id: String,
    },
    List,
    Delete {
        id: String,
    },
}

#[derive(Subcommand)]
enum ConnectionAction {
    Register {
        name: String,
        #[arg(long)]
        provider: String,
        #[arg(long)]
        region: String,
        #[arg(long)]
        zone: Option<String>,
        /// Credential reference passed to the driver
        #[arg(long)]
        credential: String,
    },
    Get {
        name: String,
    },
    List,
}

#[derive(Subcommand)]
enum KeyAction {
    Register {
        id: String,
        /// Login user for VMs created with this key
        #[arg(short, long)]
        user: String,
        /// Private key file (OpenSSH or PEM)
        #[arg(short = 'k', long)]
        private_key: PathBuf,
        #[arg(short, long, default_value = "")]
        description: String,
    },
    List,
    Delete {
        id: String,
    },
}

#[derive(Subcommand)]
enum VmCommand {
    Get {
        mci: String,
        vm: String,
    },
    List {
        mci: String,
        #[arg(short, long)]
        filter: Option<VmFilter>,
        #[arg(short, long)]
        long: bool,
    },
}

#[derive(Subcommand)]
enum BastionAction {
    /// Make `bastion` serve the VNet of `vm`
    Set {
        mci: String,
        vm: String,
        bastion: String,
    },
    /// Show the bastions serving the VNet of `vm`
    Get {
        mci: String,
        vm: String,
    },
    List,
    /// Remove `bastion` from every VNet it serves
    Remove {
        mci: String,
        bastion: String,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Write a default configuration file
    Init {
        #[arg(short, long)]
        force: bool,
    },
    /// Show current configuration
    Show,
    /// Get a value by dotted key
    Get { key: String },
    /// Set a value by dotted key
    Set { key: String, value: String },
    /// Show the default config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let log_level = match (cli.quiet, cli.verbose) {
        (true, _) => "error",
        (false, 0) => "warn",
        (false, 1) => "info",
        (false, 2) => "debug",
        (false, _) => "trace",
    };

    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| log_level.into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_target(false))
        .init();

    let mut client = FleetClient::with_address(&cli.address);
    let ns = cli.ns.as_str();

    match cli.command {
        Commands::Start { store } => {
            commands::start_command(&mut client, cli.config.as_ref(), store.as_ref()).await?;
        }
        Commands::Stop => commands::stop_command(&mut client).await?,
        Commands::Ping => commands::ping_command(&mut client).await?,
        Commands::Status => commands::status_command(&mut client).await?,

        Commands::Namespace { action } => match action {
            NamespaceAction::Create { id, description } => {
                commands::namespace_create(&mut client, &id, &description).await?
            }
            NamespaceAction::Get { id } => commands::namespace_get(&mut client, &id).await?,
            NamespaceAction::List => commands::namespace_list(&mut client).await?,
            NamespaceAction::Delete { id } => commands::namespace_delete(&mut client, &id).await?,
        },

        Commands::Connection { action } => match action {
            ConnectionAction::Register {
                name,
                provider,
                region,
                zone,
                credential,
            } => {
                let connection = ConnectionConfig {
                    name,
                    provider,
                    region,
                    zone,
                    credential,
                };
                commands::connection_register(&mut client, connection).await?
            }
            ConnectionAction::Get { name } => commands::connection_get(&mut client, &name).await?,
            ConnectionAction::List => commands::connection_list(&mut client).await?,
        },

        Commands::Key { action } => match action {
            KeyAction::Register {
                id,
                user,
                private_key,
                description,
            } => {
                commands::key_register(&mut client, ns, &id, &user, &private_key, &description)
                    .await?
            }
            KeyAction::List => commands::key_list(&mut client, ns).await?,
            KeyAction::Delete { id } => commands::key_delete(&mut client, ns, &id).await?,
        },

        Commands::Create { file, dynamic } => {
            commands::create_command(&mut client, ns, &file, dynamic).await?
        }
        Commands::Get {
            mci,
            view,
            filter,
            long,
        } => commands::get_command(&mut client, ns, &mci, view, filter, long).await?,
        Commands::List { view, filter, long } => {
            commands::list_command(&mut client, ns, view, filter, long).await?
        }
        Commands::Vm { action } => match action {
            VmCommand::Get { mci, vm } => commands::vm_get_command(&mut client, ns, &mci, &vm).await?,
            VmCommand::List { mci, filter, long } => {
                commands::vm_list_command(&mut client, ns, &mci, filter, long).await?
            }
        },
        Commands::AddSubgroup { mci, file } => {
            commands::add_sub_group_command(&mut client, ns, &mci, &file).await?
        }
        Commands::ScaleOut {
            mci,
            sub_group,
            count,
        } => commands::scale_out_command(&mut client, ns, &mci, &sub_group, count).await?,

        Commands::Control { mci, action, vm } => {
            commands::control_command(&mut client, ns, &mci, vm.as_deref(), action).await?
        }
        Commands::Refine { mci } => commands::refine_command(&mut client, ns, &mci).await?,
        Commands::Delete {
            mci,
            vm,
            all,
            force,
            keep_instances,
        } => {
            let target = match (mci, vm) {
                (Some(mci), Some(vm)) => DeleteTarget::Vm { mci, vm },
                (Some(mci), None) => DeleteTarget::Mci(mci),
                (None, _) if all => DeleteTarget::All,
                (None, _) => anyhow::bail!("Name an MCI to delete, or pass --all"),
            };
            let option = DeleteOption {
                force,
                terminate: !keep_instances,
            };
            commands::delete_command(&mut client, ns, target, option).await?
        }

        Commands::Cmd {
            mci,
            commands: cmds,
            sub_group,
            vm,
            user,
        } => {
            let targets = Targets { sub_group, vm };
            commands::cmd_command(&mut client, ns, &mci, &targets, user, cmds).await?
        }
        Commands::Copy {
            mci,
            file,
            target_path,
            sub_group,
            vm,
        } => {
            let targets = Targets { sub_group, vm };
            commands::copy_command(&mut client, ns, &mci, &targets, &file, &target_path).await?
        }

        Commands::Bastion { action } => match action {
            BastionAction::Set { mci, vm, bastion } => {
                commands::bastion_set(&mut client, ns, &mci, &vm, &bastion).await?
            }
            BastionAction::Get { mci, vm } => {
                commands::bastion_get(&mut client, ns, &mci, &vm).await?
            }
            BastionAction::List => commands::bastion_list(&mut client, ns).await?,
            BastionAction::Remove { mci, bastion } => {
                commands::bastion_remove(&mut client, ns, &mci, &bastion).await?
            }
        },

        Commands::Config { action } => match action {
            ConfigAction::Init { force } => commands::config_init(cli.config.as_ref(), force)?,
            ConfigAction::Show => commands::config_show(cli.config.as_ref())?,
            ConfigAction::Get { key } => commands::config_get(cli.config.as_ref(), &key)?,
            ConfigAction::Set { key, value } => {
                commands::config_set(cli.config.as_ref(), &key, &value)?
            }
            ConfigAction::Path => {
                println!("{}", mci_core::config::default_config_path().display());
            }
        },
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_consistent() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_cmd_takes_trailing_commands() {
        let cli = Cli::try_parse_from([
            "mci", "cmd", "mci01", "--sub-group", "web", "--", "uname -a", "uptime",
        ])
        .unwrap();
        match cli.command {
            Commands::Cmd {
                mci,
                commands,
                sub_group,
                ..
            } => {
                assert_eq!(mci, "mci01");
                assert_eq!(commands, vec!["uname -a", "uptime"]);
                assert_eq!(sub_group.as_deref(), Some("web"));
            }
            _ => panic!("Wrong command"),
        }
    }

    #[test]
    fn test_view_and_filter_parse() {
        let cli = Cli::try_parse_from([
            "mci", "--ns", "team-a", "get", "mci01", "--view", "status", "-f", "status=Failed",
        ])
        .unwrap();
        assert_eq!(cli.ns, "team-a");
        match cli.command {
            Commands::Get { view, filter, .. } => {
                assert_eq!(view, MciView::Status);
                assert_eq!(filter, Some(VmFilter::new("status", "Failed")));
            }
            _ => panic!("Wrong command"),
        }
    }

    #[test]
    fn test_delete_requires_target() {
        assert!(Cli::try_parse_from(["mci", "delete"]).is_err());
        assert!(Cli::try_parse_from(["mci", "delete", "mci01", "--all"]).is_err());
        assert!(Cli::try_parse_from(["mci", "delete", "--all", "--force"]).is_ok());
    }

    #[test]
    fn test_control_action_parse() {
        let cli = Cli::try_parse_from(["mci", "control", "mci01", "suspend", "--vm", "g1-1"]).unwrap();
        match cli.command {
            Commands::Control { action, vm, .. } => {
                assert_eq!(action, VmAction::Suspend);
                assert_eq!(vm.as_deref(), Some("g1-1"));
            }
            _ => panic!("Wrong command"),
        }
        assert!(Cli::try_parse_from(["mci", "control", "mci01", "explode"]).is_err());
    }
}
