//! Report the flash layout of Intel firmware images
//!
//! The Intel Flash Descriptor (IFD) at the start of a full image splits the
//! flash into regions: the descriptor itself, BIOS, (CS)ME, GbE and more.
//! This tool finds the descriptor and tells where those regions are.

use std::fs;

use clap::{Parser, Subcommand};
use log::{debug, error, info};

mod show;

use ifd_layout::{IFD, Layout};

#[derive(Subcommand, Debug)]
enum Command {
    /// Display the regions in use, ordered by base address
    Show {
        /// File to read
        file_name: String,
    },
    /// Print a flashrom compatible layout of the regions in use
    Layout {
        /// File to write the layout to instead of printing it
        #[clap(long, short = 'O')]
        output: Option<String>,
        /// File to read
        file_name: String,
    },
    /// Display the descriptor map and all regions, including unused ones
    Descriptor {
        /// File to read
        file_name: String,
    },
}

/// Find the Intel Flash Descriptor in a firmware image and report its regions
#[derive(Parser)]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Command to run
    #[command(subcommand)]
    cmd: Command,
    #[clap(long, short, action)]
    debug: bool,
    #[clap(long, short, action)]
    verbose: bool,
}

fn read_image(file_name: &str) -> Result<Vec<u8>, String> {
    info!("Reading {file_name}...");
    let data = fs::read(file_name).map_err(|e| format!("Could not read {file_name}: {e}"))?;
    let size = data.len();
    info!(
        "Image is {}MB, end address at 0x{size:x}",
        size / 1024 / 1024
    );
    Ok(data)
}

fn run(cmd: Command, verbose: bool) -> Result<(), String> {
    match cmd {
        Command::Show { file_name } => {
            let data = read_image(&file_name)?;
            let layout = Layout::parse(&data).map_err(|e| e.to_string())?;
            show::show_layout(&layout, verbose);
        }
        Command::Layout { output, file_name } => {
            let data = read_image(&file_name)?;
            let layout = Layout::parse(&data).map_err(|e| e.to_string())?;
            let text = layout.flashrom();
            match output {
                Some(out_file) => {
                    info!("Writing layout to {out_file}");
                    fs::write(&out_file, text)
                        .map_err(|e| format!("Could not write {out_file}: {e}"))?;
                }
                None => print!("{text}"),
            }
        }
        Command::Descriptor { file_name } => {
            let data = read_image(&file_name)?;
            let ifd = IFD::parse(&data).map_err(|e| e.to_string())?;
            show::show_descriptor(&ifd, verbose);
        }
    }
    Ok(())
}

fn main() {
    let Cli {
        cmd,
        debug,
        verbose,
    } = Cli::parse();
    // Default to log level "info". Otherwise, you get no "regular" logs.
    let level = if debug { "debug" } else { "info" };
    let env = env_logger::Env::default().default_filter_or(level);
    env_logger::Builder::from_env(env).init();

    debug!("Command: {cmd:?}");
    if let Err(e) = run(cmd, verbose) {
        error!("{e}");
        std::process::exit(1);
    }
}
