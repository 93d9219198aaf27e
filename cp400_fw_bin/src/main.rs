// This Source Code Form is subject to the terms of the Mozilla Public
// License, v. 2.0. If a copy of the MPL was not distributed with this
// file, You can obtain one at https://mozilla.org/MPL/2.0/.

use anyhow::{anyhow, bail, Context, Result};
use clap::Parser;
use colored::Colorize;
use cp400_fw::codec::{self, GZIP_COMPRESSION_LEVEL};
use cp400_fw::registry::{known_missing_bytes, VersionRegistry};
use cp400_fw::{pipeline, ErrorKind, ImageId};
use log::info;
use std::path::{Path, PathBuf};

#[derive(Debug, Parser)]
enum Command {
    /// Extract both firmware images from an OSupdateDLL.dll
    Extract {
        /// OSupdateDLL.dll from the updater
        dll: PathBuf,
        /// output file for the 3069 image
        fw3069: PathBuf,
        /// output file for the 3070 image
        fw3070: PathBuf,
    },
    /// Compress a firmware image back into the form stored in the DLL
    Pack {
        /// decompressed firmware image
        image: PathBuf,
        /// output file (stored resource)
        packed: PathBuf,
        /// OSupdateDLL.dll the image will be placed into
        dll: PathBuf,

        /// gzip compression level (0-9)
        #[clap(long, default_value_t = GZIP_COMPRESSION_LEVEL, value_parser = parse_int::parse::<u32>)]
        level: u32,

        /// which resource the image is packed for
        #[clap(long = "image", default_value = "3070")]
        image_id: ImageId,
    },
    /// Apply a patches directory to a 3070 image
    Patch {
        /// directory holding metadata.json and patchset subdirectories
        patches_dir: PathBuf,
        /// unpatched 3070 image
        fw3070: PathBuf,
        /// output file (patched image)
        patched: PathBuf,
    },
    /// Decompress a stored resource dumped by some other tool
    Decode {
        /// stored resource
        stored: PathBuf,
        /// output file (decompressed image)
        out: PathBuf,

        /// missing byte to reinsert
        #[clap(long, value_parser = parse_int::parse::<u8>, conflicts_with = "version")]
        missing_byte: Option<u8>,

        /// look the missing byte up by updater release name instead
        #[clap(long, requires = "image_id")]
        version: Option<String>,

        /// resource the stored stream was taken from (3069 or 3070)
        #[clap(long = "image")]
        image_id: Option<ImageId>,
    },
    /// List the updater releases that can be identified
    Versions,
}

#[derive(Debug, Parser)]
#[clap(name = "cp400-fw", about = "fx-CP400 firmware extraction and patching")]
struct Opts {
    /// TOML file with additional [[version]] entries
    #[clap(long, global = true)]
    registry: Option<PathBuf>,

    /// log debug output
    #[clap(short, long, global = true, conflicts_with = "quiet")]
    verbose: bool,

    /// only log warnings and errors
    #[clap(short, long, global = true)]
    quiet: bool,

    #[clap(subcommand)]
    cmd: Command,
}

fn read(path: &Path) -> Result<Vec<u8>> {
    std::fs::read(path).with_context(|| format!("could not read {path:?}"))
}

fn write(path: &Path, data: &[u8]) -> Result<()> {
    pipeline::write_output(path, data).with_context(|| format!("could not write {path:?}"))?;
    info!("Wrote {} bytes to {path:?}", data.len());
    Ok(())
}

fn load_registry(path: Option<&Path>) -> Result<VersionRegistry> {
    let mut registry = VersionRegistry::builtin();
    if let Some(path) = path {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("could not read registry {path:?}"))?;
        registry
            .extend_from_toml(&contents)
            .with_context(|| format!("bad registry {path:?}"))?;
    }
    Ok(registry)
}

/// One-line abort diagnostic with the whole context chain.
fn report(err: &anyhow::Error) -> String {
    format!("{}: {err:#}", "error".red().bold())
}

fn main() {
    if let Err(err) = run() {
        eprintln!("{}", report(&err));
        std::process::exit(1);
    }
}

fn run() -> Result<()> {
    let opts = Opts::parse();

    let filter = if opts.verbose {
        "debug"
    } else if opts.quiet {
        "warn"
    } else {
        "info"
    };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(filter)).init();

    let registry = load_registry(opts.registry.as_deref())?;

    match opts.cmd {
        Command::Extract {
            dll,
            fw3069,
            fw3070,
        } => {
            let installer = read(&dll)?;
            let extracted = pipeline::extract(&installer, &registry).map_err(|e| {
                if e.kind() == ErrorKind::LookupFailure {
                    anyhow!("{e}; use --registry to describe this release")
                } else {
                    e.into()
                }
            })?;
            let outputs: [(&Path, &[u8]); 2] = [
                (&fw3069, &extracted.images.fw3069),
                (&fw3070, &extracted.images.fw3070),
            ];
            pipeline::write_outputs(&outputs)
                .with_context(|| format!("could not write {fw3069:?} and {fw3070:?}"))?;
            for (path, data) in outputs {
                info!("Wrote {} bytes to {path:?}", data.len());
            }
        }
        Command::Pack {
            image,
            packed,
            dll,
            level,
            image_id,
        } => {
            let installer = read(&dll)?;
            let image = read(&image)?;
            let result = pipeline::pack(&image, image_id, &installer, &registry, level);
            let packed_image = match result {
                Err(e @ cp400_fw::Error::MissingByteMismatch { .. }) => {
                    eprintln!(
                        "{}: the packed image will not load from this DLL",
                        "warning".yellow().bold()
                    );
                    bail!(e);
                }
                r => r?,
            };
            write(&packed, &packed_image.stored)?;
        }
        Command::Patch {
            patches_dir,
            fw3070,
            patched,
        } => {
            let image = read(&fw3070)?;
            let image = pipeline::patch(&patches_dir, image)
                .with_context(|| format!("could not apply {patches_dir:?}"))?;
            write(&patched, &image)?;
        }
        Command::Decode {
            stored,
            out,
            missing_byte,
            version,
            image_id,
        } => {
            let missing_byte = match (missing_byte, version, image_id) {
                (Some(byte), _, _) => byte,
                (None, Some(version), Some(id)) => {
                    *known_missing_bytes(&version)?.get(id)
                }
                _ => bail!("either --missing-byte or --version with --image is required"),
            };
            let stored = read(&stored)?;
            let image = codec::decode(&stored, missing_byte)?;
            write(&out, &image)?;
        }
        Command::Versions => {
            for version in registry.versions() {
                println!(
                    "{} {} (missing bytes at {:#x}, {:#x})",
                    version.name.bold(),
                    version.installer_checksum,
                    version.missing_byte_offsets.fw3069,
                    version.missing_byte_offsets.fw3070,
                );
            }
            return Ok(());
        }
    }

    println!("{}", "Done!".green());
    Ok(())
}
