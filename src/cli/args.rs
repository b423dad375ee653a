//! CLI argument parsing using clap.

use clap::{
    Args, Parser, Subcommand,
    builder::styling::{AnsiColor, Effects, Styles},
};
use std::path::PathBuf;

use crate::events::Lifecycle;
use crate::handlers::Permission;

fn clap_cargo_style() -> Styles {
    Styles::styled()
        .header(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .usage(AnsiColor::Cyan.on_default() | Effects::BOLD)
        .literal(AnsiColor::Green.on_default())
        .placeholder(AnsiColor::Green.on_default())
}

/// Keeps backend services in sync with platform events
#[derive(Parser)]
#[command(
    name = "stacksync",
    version = env!("CARGO_PKG_VERSION"),
    about = "Keep backend services in sync with user, permission and filesystem events",
    next_line_help = true,
    styles = clap_cargo_style()
)]
pub struct Cli {
    /// Path to a custom settings.toml file
    #[arg(short, long, global = true, env = "STACKSYNC_CONFIG")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Commands,
}

/// Available CLI commands
#[derive(Subcommand)]
pub enum Commands {
    /// Restore watches and keep them alive until Ctrl-C
    #[command(
        about = "Run the sync service",
        after_help = "Degraded watches are retried every monitoring.reconcile_interval_secs."
    )]
    Serve,

    /// List active handlers in dispatch order
    #[command(about = "Show active handlers and their priorities")]
    Handlers,

    /// List persisted watch descriptors
    #[command(about = "Show persisted filesystem watches")]
    Monitors,

    /// Dispatch a user event to the active handlers
    #[command(
        about = "Dispatch a user created/deleted event",
        after_help = "Examples:\n  stacksync user created alice\n  stacksync user deleted alice"
    )]
    User {
        #[arg(value_enum)]
        event: LifecycleArg,

        /// User name
        name: String,
    },

    /// Dispatch a permission event to the active handlers
    #[command(
        about = "Dispatch a permission created/deleted event",
        after_help = "Example:\n  stacksync permission created --service thredds --resource /birdhouse/data --name read --user alice"
    )]
    Permission {
        #[arg(value_enum)]
        event: LifecycleArg,

        #[command(flatten)]
        permission: PermissionArgs,
    },
}

#[derive(Clone, Copy, Debug, clap::ValueEnum)]
pub enum LifecycleArg {
    Created,
    Deleted,
}

impl From<LifecycleArg> for Lifecycle {
    fn from(arg: LifecycleArg) -> Self {
        match arg {
            LifecycleArg::Created => Lifecycle::Created,
            LifecycleArg::Deleted => Lifecycle::Deleted,
        }
    }
}

#[derive(Args, Debug)]
pub struct PermissionArgs {
    /// Service owning the resource
    #[arg(long)]
    pub service: String,

    /// Full resource name
    #[arg(long)]
    pub resource: String,

    /// Permission name, e.g. read or write
    #[arg(long)]
    pub name: String,

    /// allow or deny
    #[arg(long, default_value = "allow")]
    pub access: String,

    #[arg(long, conflicts_with = "group")]
    pub user: Option<String>,

    #[arg(long)]
    pub group: Option<String>,
}

impl From<PermissionArgs> for Permission {
    fn from(args: PermissionArgs) -> Self {
        Permission {
            service_name: args.service,
            resource_full_name: args.resource,
            name: args.name,
            access: args.access,
            user: args.user,
            group: args.group,
        }
    }
}
