// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("openspm")
        .version(env!("CARGO_PKG_VERSION"))
        .author("OpenSPM Contributors")
        .about("Simple package manager with YAML repositories and tag filtering")
        .subcommand_required(false)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .default_value("/etc/openspm/config.yaml")
                .global(true)
                .help("Configuration file"),
        )
        .arg(
            Arg::new("data_dir")
                .long("data-dir")
                .value_name("DIR")
                .global(true)
                .help("Directory holding the data store (overrides dataDir)"),
        )
        .arg(
            Arg::new("target_dir")
                .long("target-dir")
                .value_name("DIR")
                .global(true)
                .help("Install destination (overrides targetDir)"),
        )
        .arg(
            Arg::new("tags")
                .long("tags")
                .value_name("TAGS")
                .global(true)
                .help("Supported tags, semicolon separated (overrides supported_tags)"),
        )
        .arg(
            Arg::new("no_color")
                .long("no-color")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Disable colored log output"),
        )
        .arg(
            Arg::new("debug")
                .long("debug")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Enable debug logging"),
        )
        .subcommand(
            Command::new("add-repo")
                .about("Add a repository and rebuild the package index")
                .arg(Arg::new("url").required(true).help("Repository base URL"))
                .arg(
                    Arg::new("no_update")
                        .long("no-update")
                        .action(ArgAction::SetTrue)
                        .help("Do not rebuild the package index afterwards"),
                ),
        )
        .subcommand(
            Command::new("remove-repo")
                .about("Remove a repository")
                .arg(Arg::new("url").required(true).help("Repository base URL")),
        )
        .subcommand(Command::new("list-repos").about("List configured repositories"))
        .subcommand(
            Command::new("update")
                .about("Refresh repository metadata, then rebuild the package index"),
        )
        .subcommand(Command::new("update-repos").about("Refresh repository metadata"))
        .subcommand(
            Command::new("update-packages").about("Rebuild the package index from all repositories"),
        )
        .subcommand(
            Command::new("list").about("List available packages").arg(
                Arg::new("installed")
                    .long("installed")
                    .action(ArgAction::SetTrue)
                    .help("Show installed packages instead"),
            ),
        )
        .subcommand(
            Command::new("search")
                .about("Search package names and descriptions")
                .arg(Arg::new("pattern").required(true).help("Substring to look for (case-insensitive)")),
        )
        .subcommand(
            Command::new("install")
                .about("Install a package and its dependencies")
                .arg(Arg::new("name").required(true).help("Package name"))
                .arg(
                    Arg::new("yes")
                        .short('y')
                        .long("yes")
                        .action(ArgAction::SetTrue)
                        .help("Do not ask for confirmation"),
                ),
        )
        .subcommand(
            Command::new("remove")
                .about("Remove an installed package's files")
                .arg(Arg::new("name").required(true).help("Package name")),
        )
        .subcommand(
            Command::new("config").about("Show the effective configuration").arg(
                Arg::new("init")
                    .long("init")
                    .action(ArgAction::SetTrue)
                    .help("Write the effective configuration to the --config path"),
            ),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completion scripts")
                .arg(
                    Arg::new("shell")
                        .required(true)
                        .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
                        .help("Shell type"),
                ),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    let out_dir = PathBuf::from(env::var("OUT_DIR").expect("OUT_DIR not set"));
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("openspm.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
