// src/main.rs

mod cli;
mod commands;

use anyhow::Result;
use clap::{CommandFactory, Parser};
use cli::{Cli, Commands};
use commands::InstallArgs;
use tracing_subscriber::EnvFilter;

fn main() -> Result<()> {
    let cli = Cli::parse();

    // RUST_LOG wins over -v
    let default_level = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Some(Commands::Build {
            description,
            output,
            codec,
        }) => commands::cmd_build(&description, output.as_deref(), codec),

        Some(Commands::Inspect {
            package,
            tree,
            json,
        }) => commands::cmd_inspect(&package, tree, json),

        Some(Commands::Install {
            package,
            root,
            components,
            all_components,
            state_dir,
            env_file,
            program_timeout,
            quiet,
        }) => commands::cmd_install(InstallArgs {
            package: &package,
            root: root.as_deref(),
            components: components.as_deref(),
            all_components,
            state_dir: &state_dir,
            env_file: env_file.as_deref(),
            program_timeout,
            quiet,
        }),

        Some(Commands::Uninstall {
            package_name,
            log,
            state_dir,
            env_file,
            quiet,
        }) => commands::cmd_uninstall(
            package_name.as_deref(),
            log.as_deref(),
            &state_dir,
            env_file.as_deref(),
            quiet,
        ),

        Some(Commands::Log {
            package_name,
            state_dir,
        }) => commands::cmd_log(&package_name, &state_dir),

        Some(Commands::Completions { shell }) => {
            let mut cmd = Cli::command();
            clap_complete::generate(shell, &mut cmd, "setupkit", &mut std::io::stdout());
            Ok(())
        }

        None => {
            Cli::command().print_help()?;
            println!();
            Ok(())
        }
    }
}
