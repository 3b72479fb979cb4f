use std::fs;
use std::path::{Path, PathBuf};

use clap::Parser;
use vtoy_core::dispatch::{self, standard_commands};
use vtoy_core::menu::{self, EnumeratorConfig, RawEntry};
use vtoy_core::state::CoreState;

#[derive(Debug, Parser)]
#[command(name = "vtoy", about = "ventoy image-boot core inspection tool")]
struct Args {
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    cmd: Command,
}

#[derive(Debug, clap::Subcommand)]
enum Command {
    /// Walk a directory and print the menu tree the boot agent would build.
    List(ListArgs),
    /// Run a registered dispatcher command against an empty core state.
    Dispatch(DispatchArgs),
}

#[derive(Debug, clap::Args)]
struct ListArgs {
    root: PathBuf,
    #[arg(long)]
    case_sensitive: bool,
}

#[derive(Debug, clap::Args)]
struct DispatchArgs {
    name: String,
    #[arg(trailing_var_arg = true)]
    args: Vec<String>,
}

fn main() {
    let args = Args::parse();
    simple_logger::SimpleLogger::new()
        .with_level(if args.verbose {
            log::LevelFilter::Trace
        } else {
            log::LevelFilter::Warn
        })
        .init()
        .unwrap();

    match args.cmd {
        Command::List(list_args) => list(&list_args),
        Command::Dispatch(dispatch_args) => run_dispatch(&dispatch_args),
    }
}

fn list(args: &ListArgs) {
    let cfg = EnumeratorConfig {
        case_sensitive: args.case_sensitive,
        ..EnumeratorConfig::default()
    };

    let root = args.root.to_string_lossy().into_owned();
    let (tree, vlnk_candidates, custom_boot_candidates) = menu::enumerate(
        &cfg,
        &root,
        |dir| list_dir(Path::new(dir)),
        |dir| Path::new(dir).join(".ventoyignore").is_file(),
    );

    for (path, node) in &tree {
        let mut rendered = String::new();
        let display_name = path.rsplit('/').next().unwrap_or(path);
        if menu::render_node(&mut rendered, node, display_name).is_ok() && !rendered.is_empty() {
            print!("{rendered}");
        }
    }

    if !vlnk_candidates.is_empty() {
        log::info!("found {} VLNK candidate(s)", vlnk_candidates.len());
    }

    for (image_path, vcfg_path) in &custom_boot_candidates {
        log::info!("found custom-boot hook for {image_path} in {vcfg_path}");
    }
}

fn list_dir(dir: &Path) -> Option<Vec<RawEntry>> {
    let read_dir = fs::read_dir(dir).ok()?;
    let mut entries = Vec::new();
    for entry in read_dir.flatten() {
        let metadata = match entry.metadata() {
            Ok(m) => m,
            Err(_) => continue,
        };
        entries.push(RawEntry {
            name: entry.file_name().to_string_lossy().into_owned(),
            is_dir: metadata.is_dir(),
            size: metadata.len(),
        });
    }
    Some(entries)
}

fn run_dispatch(args: &DispatchArgs) {
    let dispatcher = standard_commands();
    let mut state = CoreState::new();
    match dispatcher.dispatch(&mut state, &args.name, &args.args) {
        Some(dispatch::OK) => println!("ok"),
        Some(code) => {
            eprintln!("command failed with code {code}");
            std::process::exit(code);
        }
        None => {
            eprintln!("unknown command: {}", args.name);
            std::process::exit(1);
        }
    }
}
