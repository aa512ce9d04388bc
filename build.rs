// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Common argument: state directory
fn state_dir_arg() -> Arg {
    Arg::new("state_dir")
        .long("state-dir")
        .value_name("DIR")
        .default_value("/var/lib/setupkit")
        .help("Directory holding reversal logs and lock files")
}

/// Common argument: environment file
fn env_file_arg() -> Arg {
    Arg::new("env_file")
        .long("env-file")
        .value_name("PATH")
        .help("Environment file edited by environment variable nodes")
}

fn quiet_arg() -> Arg {
    Arg::new("quiet")
        .short('q')
        .long("quiet")
        .action(ArgAction::SetTrue)
        .help("Hide the progress bar")
}

fn build_cli() -> Command {
    Command::new("setupkit")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Setupkit Contributors")
        .about("Build, install and cleanly uninstall component-based packages")
        .subcommand_required(false)
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Show debug output"),
        )
        .subcommand(
            Command::new("build")
                .about("Build a package from a description file")
                .arg(
                    Arg::new("description")
                        .default_value("setupkit.toml")
                        .help("Path to the package description"),
                )
                .arg(Arg::new("output").short('o').long("output").help("Output package path"))
                .arg(
                    Arg::new("codec")
                        .long("codec")
                        .value_parser(["store", "none", "deflate", "bzip2"])
                        .help("Override the codec named in the description"),
                ),
        )
        .subcommand(
            Command::new("inspect")
                .about("Show a package's metadata and contents")
                .arg(Arg::new("package").required(true).help("Path to the package file"))
                .arg(
                    Arg::new("tree")
                        .long("tree")
                        .action(ArgAction::SetTrue)
                        .help("List every node with its effective components"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print the manifest as JSON"),
                ),
        )
        .subcommand(
            Command::new("install")
                .about("Install a package")
                .arg(Arg::new("package").required(true).help("Path to the package file"))
                .arg(
                    Arg::new("root")
                        .short('r')
                        .long("root")
                        .help("Installation root (default: the package's default root)"),
                )
                .arg(
                    Arg::new("components")
                        .short('c')
                        .long("components")
                        .help("Comma separated components to install"),
                )
                .arg(
                    Arg::new("all_components")
                        .long("all-components")
                        .action(ArgAction::SetTrue)
                        .help("Install every declared component"),
                )
                .arg(state_dir_arg())
                .arg(env_file_arg())
                .arg(
                    Arg::new("program_timeout")
                        .long("program-timeout")
                        .value_name("SECS")
                        .help("Seconds to wait for external installers that set no timeout"),
                )
                .arg(quiet_arg()),
        )
        .subcommand(
            Command::new("uninstall")
                .about("Uninstall a package by replaying its reversal log")
                .arg(Arg::new("package_name").help("Package name as given in its manifest"))
                .arg(Arg::new("log").long("log").help("Reversal log to replay"))
                .arg(state_dir_arg())
                .arg(env_file_arg())
                .arg(quiet_arg()),
        )
        .subcommand(
            Command::new("log")
                .about("Show the actions recorded in a reversal log")
                .arg(
                    Arg::new("package_name")
                        .required(true)
                        .help("Package name as given in its manifest"),
                )
                .arg(state_dir_arg()),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "zsh", "fish", "powershell", "elvish"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = match env::var("OUT_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=OUT_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = out_dir.join("man");

    if let Err(e) = fs::create_dir_all(&man_dir) {
        println!("cargo:warning=Failed to create man directory: {}", e);
        return;
    }

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();

    if let Err(e) = man.render(&mut buffer) {
        println!("cargo:warning=Failed to render man page: {}", e);
        return;
    }

    let man_path = man_dir.join("setupkit.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
