// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("hubsync")
        .version(env!("CARGO_PKG_VERSION"))
        .author("hubsync Contributors")
        .about("Keep locally installed content types in sync with a content type hub")
        .subcommand_required(false)
        .arg(
            Arg::new("root")
                .short('r')
                .long("root")
                .value_name("DIR")
                .global(true)
                .default_value("/var/lib/hubsync")
                .help("Data directory holding the database, staging area and libraries"),
        )
        .subcommand(Command::new("init").about("Initialize the data directory and database"))
        .subcommand(
            Command::new("sync")
                .about("Fetch the hub catalog and install eligible updates")
                .arg(
                    Arg::new("scheduled")
                        .long("scheduled")
                        .action(ArgAction::SetTrue)
                        .help("Only run if the configured update schedule says a sync is due"),
                ),
        )
        .subcommand(
            Command::new("config")
                .about("Show or change sync settings")
                .arg(
                    Arg::new("endpoint")
                        .long("endpoint")
                        .value_name("URL")
                        .help("Hub endpoint base, e.g. api.h5p.org/v1"),
                )
                .arg(
                    Arg::new("schedule")
                        .long("schedule")
                        .value_parser(["never", "daily", "weekly"])
                        .help("How often scheduled syncs run"),
                )
                .arg(
                    Arg::new("platform_api")
                        .long("platform-api")
                        .value_name("MAJOR.MINOR")
                        .help("Platform API version"),
                )
                .arg(
                    Arg::new("principal")
                        .long("principal")
                        .help("Principal that sync runs act as"),
                ),
        )
        .subcommand(Command::new("list").about("List installed content type libraries"))
        .subcommand(
            Command::new("restrict")
                .about("Exclude a library from automatic updates")
                .arg(Arg::new("name").required(true).help("Library machine name"))
                .arg(
                    Arg::new("version")
                        .required(true)
                        .value_name("MAJOR.MINOR")
                        .help("Library version"),
                )
                .arg(
                    Arg::new("lift")
                        .long("lift")
                        .action(ArgAction::SetTrue)
                        .help("Remove the restriction instead"),
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

    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let man = Man::new(build_cli());
    let mut buffer = Vec::new();
    man.render(&mut buffer).expect("Failed to render man page");

    let man_path = man_dir.join("hubsync.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
