#![deny(rust_2018_idioms)]
#![warn(clippy::pedantic)]
#![allow(
    clippy::missing_errors_doc,
    // Identifiers like Command::Create are clearer than Self::Create regardless of context
    clippy::use_self,
    // Caused by interacting with rampart::schema::*._extra
    clippy::used_underscore_binding,
    clippy::result_large_err,
)]

mod create;
mod datetime;
mod download;
mod error;
mod root;
mod source;

use crate::error::Result;
use clap::Parser;
use rampart::schema::Target;
use rampart::TargetName;
use rayon::prelude::*;
use simplelog::{ColorChoice, ConfigBuilder, LevelFilter, TermLogger, TerminalMode};
use snafu::{ErrorCompat, OptionExt, ResultExt};
use std::collections::HashMap;
use std::fs::File;
use std::io::Write;
use std::path::Path;
use tempfile::NamedTempFile;
use walkdir::WalkDir;

static SPEC_VERSION: &str = "1.0.0";

/// This wrapper enables global options and initializes the logger before running any subcommands.
#[derive(Parser)]
struct Program {
    /// Set logging verbosity [trace|debug|info|warn|error]
    #[arg(
        name = "log-level",
        short = 'l',
        long = "log-level",
        default_value = "info"
    )]
    log_level: LevelFilter,
    #[command(subcommand)]
    cmd: Command,
}

impl Program {
    fn run(self) -> Result<()> {
        TermLogger::init(
            self.log_level,
            ConfigBuilder::new()
                .add_filter_allow_str("ramptool")
                .add_filter_allow_str("rampart")
                .build(),
            TerminalMode::Mixed,
            ColorChoice::Auto,
        )
        .context(error::LoggerSnafu)?;
        self.cmd.run()
    }
}

#[derive(Debug, Parser)]
enum Command {
    /// Create a signed repository from a directory of targets
    Create(create::CreateArgs),
    /// Refresh a repository's metadata and download its targets
    Download(download::DownloadArgs),
    /// Manipulate a root.json metadata file
    #[command(subcommand)]
    Root(root::Command),
}

impl Command {
    fn run(self) -> Result<()> {
        match self {
            Command::Create(args) => args.run(),
            Command::Download(args) => args.run(),
            Command::Root(root_subcommand) => root_subcommand.run(),
        }
    }
}

fn load_file<T>(path: &Path) -> Result<T>
where
    for<'de> T: serde::Deserialize<'de>,
{
    serde_json::from_reader(File::open(path).context(error::FileOpenSnafu { path })?)
        .context(error::FileParseJsonSnafu { path })
}

fn write_file<T>(path: &Path, json: &T) -> Result<()>
where
    T: serde::Serialize,
{
    // Use `tempfile::NamedTempFile::persist` to perform an atomic file write.
    let parent = path.parent().context(error::PathParentSnafu { path })?;
    let mut writer =
        NamedTempFile::new_in(parent).context(error::FileTempCreateSnafu { path: parent })?;
    serde_json::to_writer_pretty(&mut writer, json).context(error::FileWriteJsonSnafu { path })?;
    writer
        .write_all(b"\n")
        .context(error::FileWriteSnafu { path })?;
    writer
        .persist(path)
        .context(error::FilePersistSnafu { path })?;
    Ok(())
}

// Walk the directory specified, building a map of filename to Target structs.
// Hashing of the targets is done in parallel.
fn build_targets<P>(indir: P, follow_links: bool) -> Result<HashMap<String, Target>>
where
    P: AsRef<Path>,
{
    let indir = indir.as_ref();
    WalkDir::new(indir)
        .follow_links(follow_links)
        .into_iter()
        .par_bridge()
        .filter_map(|entry| match entry {
            Ok(entry) => {
                if entry.file_type().is_file() {
                    Some(process_target(entry.path()))
                } else {
                    None
                }
            }
            Err(err) => Some(Err(err).context(error::WalkDirSnafu { directory: indir })),
        })
        .collect()
}

fn process_target(path: &Path) -> Result<(String, Target)> {
    // Validate the file name as a target name
    let target_name = TargetName::new(
        path.file_name()
            .context(error::NoFileNameSnafu { path })?
            .to_str()
            .context(error::PathUtf8Snafu { path })?,
    )
    .context(error::InvalidTargetNameSnafu)?;

    // Build a Target from the path given. If it is not a file, this will fail
    let target = Target::from_path(path).context(error::TargetFromPathSnafu { path })?;

    Ok((target_name.raw().to_owned(), target))
}

fn main() -> ! {
    std::process::exit(match Program::parse().run() {
        Ok(()) => 0,
        Err(err) => {
            eprintln!("{err}");
            if let Some(var) = std::env::var_os("RUST_BACKTRACE") {
                if var != "0" {
                    if let Some(backtrace) = err.backtrace() {
                        eprintln!("\n{backtrace:?}");
                    }
                }
            }
            1
        }
    })
}
