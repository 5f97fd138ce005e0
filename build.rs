// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

/// Optional list of repository IDs
fn repos_arg(action: &str) -> Arg {
    Arg::new("repos")
        .num_args(0..)
        .value_name("REPO")
        .help(format!("Repository IDs to {} (all if omitted)", action))
}

fn build_cli() -> Command {
    Command::new("rpmirror")
        .version(env!("CARGO_PKG_VERSION"))
        .author("rpmirror Contributors")
        .about("Verified, incremental mirroring of RPM package repositories")
        .subcommand_required(false)
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .default_value("/etc/rpmirror/mirror.toml")
                .global(true)
                .help("Mirror file describing the repositories"),
        )
        .arg(
            Arg::new("cache_dir")
                .long("cache-dir")
                .value_name("DIR")
                .global(true)
                .help("Metadata cache root (overrides the mirror file)"),
        )
        .arg(
            Arg::new("workers")
                .short('w')
                .long("workers")
                .value_name("N")
                .global(true)
                .help("Maximum concurrent downloads per repository (overrides the mirror file)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .action(ArgAction::SetTrue)
                .global(true)
                .help("Enable debug logging"),
        )
        .subcommand(
            Command::new("sync")
                .about("Mirror repositories into their package directories")
                .arg(repos_arg("sync"))
                .arg(
                    Arg::new("quiet")
                        .short('q')
                        .long("quiet")
                        .action(ArgAction::SetTrue)
                        .help("Log progress instead of drawing a progress bar"),
                )
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Print a JSON report per repository when done"),
                ),
        )
        .subcommand(
            Command::new("plan")
                .about("Show what a sync would download and remove, without changing anything")
                .arg(repos_arg("plan")),
        )
        .subcommand(
            Command::new("list")
                .about("List the packages a repository's rules select upstream")
                .arg(Arg::new("repo").required(true).help("Repository ID"))
                .arg(
                    Arg::new("json")
                        .long("json")
                        .action(ArgAction::SetTrue)
                        .help("Output as JSON"),
                ),
        )
        .subcommand(
            Command::new("check").about("Validate the mirror file and print the configured repositories"),
        )
        .subcommand(
            Command::new("completions")
                .about("Generate shell completions")
                .arg(Arg::new("shell").required(true).help("Shell to generate completions for")),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // CARGO_MANIFEST_DIR is always set by cargo
    let manifest_dir = match env::var("CARGO_MANIFEST_DIR") {
        Ok(dir) => PathBuf::from(dir),
        Err(e) => {
            println!("cargo:warning=CARGO_MANIFEST_DIR not set: {}", e);
            return;
        }
    };
    let man_dir = manifest_dir.join("man");

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

    let man_path = man_dir.join("rpmirror.1");
    if let Err(e) = fs::write(&man_path, buffer) {
        println!("cargo:warning=Failed to write man page: {}", e);
    }
}
