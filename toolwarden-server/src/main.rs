// Copyright 2025 AgentReplay (https://github.com/agentreplay)
//
// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.
//
// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE. See the
// GNU Affero General Public License for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with this program. If not, see <https://www.gnu.org/licenses/>.

use anyhow::Result;
use clap::{ArgAction, Parser, Subcommand};
use serde::Serialize;
use std::path::PathBuf;
use toolwarden_core::{NewTool, ToolUpdate};
use toolwarden_server::{
    config::ServerConfig, init_tracing, run_server, tool_registry::RegistryService,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to configuration file (TOML)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// HTTP listen address (overrides config file)
    #[arg(long, env = "TOOLWARDEN_HTTP_ADDR", global = true)]
    http_addr: Option<String>,

    /// SQLite policy database path (overrides config file)
    #[arg(long, env = "TOOLWARDEN_DATABASE_PATH", global = true)]
    database: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the HTTP server (default)
    Serve,

    /// Register a new tool
    Register {
        name: String,
        #[arg(long, default_value = "")]
        description: String,
        #[arg(long, default_value_t = 60)]
        per_minute: u32,
        #[arg(long, default_value_t = 1000)]
        per_day: u32,
        /// Allowed role, repeatable
        #[arg(long = "role", default_value = "user")]
        roles: Vec<String>,
        /// Register the tool globally disabled
        #[arg(long)]
        disabled: bool,
        #[arg(long)]
        requires_auth: bool,
    },

    /// Change fields of a registered tool
    Update {
        /// Tool id returned by `register`
        id: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        description: Option<String>,
        #[arg(long)]
        enabled: Option<bool>,
        #[arg(long)]
        requires_auth: Option<bool>,
        #[arg(long)]
        per_minute: Option<u32>,
        #[arg(long)]
        per_day: Option<u32>,
        /// Replace the allowed roles, repeatable
        #[arg(long = "role")]
        roles: Vec<String>,
    },

    /// Ask whether a user may call a tool
    Check {
        tool: String,
        #[arg(long)]
        user: String,
        /// Caller role, repeatable (defaults to the configured roles)
        #[arg(long = "role")]
        roles: Vec<String>,
    },

    /// List registered tools
    Tools,

    /// Manage per-user tool preferences
    Prefs {
        #[command(subcommand)]
        action: PrefsCommand,
    },
}

#[derive(Subcommand, Debug)]
enum PrefsCommand {
    /// Show every tool as the user sees it
    List { user: String },
    /// Enable or disable a tool for one user
    Set {
        user: String,
        tool: String,
        #[arg(action = ArgAction::Set)]
        enabled: bool,
    },
    /// Remove all of a user's overrides
    Reset { user: String },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    // Load configuration
    let mut config = ServerConfig::load(args.config)?;

    // Apply CLI overrides
    if let Some(addr) = args.http_addr {
        config.server.listen_addr = addr;
    }
    if let Some(database) = args.database {
        config.store.database_path = database;
    }

    match args.command.unwrap_or(Command::Serve) {
        Command::Serve => run_server(config).await,
        command => {
            init_tracing();
            config.validate()?;
            let service = RegistryService::init(&config).await?;
            let outcome = run_admin(&service, &config, command).await;
            service.shutdown().await?;
            outcome
        }
    }
}

async fn run_admin(
    service: &RegistryService,
    config: &ServerConfig,
    command: Command,
) -> Result<()> {
    let registry = service.registry();

    match command {
        Command::Serve => anyhow::bail!("serve is not an administrative command"),
        Command::Register {
            name,
            description,
            per_minute,
            per_day,
            roles,
            disabled,
            requires_auth,
        } => {
            let tool = NewTool::new(name, description)
                .with_limits(per_minute, per_day)
                .with_roles(roles)
                .with_enabled(!disabled)
                .with_requires_auth(requires_auth);
            let id = registry.register_tool(tool).await?;
            println!("{}", id);
        }
        Command::Update {
            id,
            name,
            description,
            enabled,
            requires_auth,
            per_minute,
            per_day,
            roles,
        } => {
            let update = ToolUpdate {
                name,
                description,
                enabled,
                requires_auth,
                rate_limit_per_minute: per_minute,
                rate_limit_per_day: per_day,
                allowed_roles: (!roles.is_empty()).then_some(roles),
            };
            let updated = registry.update_tool(&id, &update).await?;
            println!("{}", if updated { "updated" } else { "unchanged" });
        }
        Command::Check { tool, user, roles } => {
            let roles = if roles.is_empty() {
                config.registry.default_roles.clone()
            } else {
                roles
            };
            let roles: Vec<&str> = roles.iter().map(String::as_str).collect();
            print_json(&registry.can_use_with_reason(&tool, &user, &roles).await)?;
        }
        Command::Tools => print_json(&registry.list_tools().await)?,
        Command::Prefs { action } => match action {
            PrefsCommand::List { user } => print_json(&registry.effective_tools(&user).await?)?,
            PrefsCommand::Set {
                user,
                tool,
                enabled,
            } => {
                registry.set_preference(&user, &tool, enabled).await?;
                println!(
                    "{} {} for {}",
                    tool,
                    if enabled { "enabled" } else { "disabled" },
                    user
                );
            }
            PrefsCommand::Reset { user } => {
                let removed = registry.reset_preferences(&user).await?;
                println!("removed {} preferences for {}", removed, user);
            }
        },
    }

    Ok(())
}

fn print_json<T: Serialize>(value: &T) -> Result<()> {
    println!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}
