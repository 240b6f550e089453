//! restore - rebuild the original video from an anonymized video and its
//! data pack.

use std::path::PathBuf;

use anyhow::{anyhow, Result};
use clap::Parser;

use rva_kernel::crypto::Key;
use rva_kernel::progress::JsonProgressSink;
use rva_kernel::restore;
use rva_kernel::ui::Ui;
use rva_kernel::video::{FfmpegDecoder, FfmpegEncoder};
use rva_kernel::RvaError;

#[derive(Parser, Debug)]
#[command(name = "restore", about = "Restore the original video from a data pack")]
struct Args {
    /// Anonymized video path
    #[arg(long = "anonymized-video")]
    anonymized_video: PathBuf,

    /// Data pack path
    #[arg(long = "data-pack")]
    data_pack: PathBuf,

    /// Hex-encoded AES key used to seal the regions
    #[arg(long)]
    key: String,

    /// Hex-encoded HMAC key; defaults to the AES key if omitted
    #[arg(long = "hmac-key")]
    hmac_key: Option<String>,

    /// Restored video output path
    #[arg(long)]
    output: PathBuf,

    /// Emit one JSON progress event per line on stdout instead of a spinner
    #[arg(long = "json-progress")]
    json_progress: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();

    let aes_key = Key::from_hex(&args.key)?;
    let hmac_key = match args.hmac_key {
        Some(hex_key) => Key::from_hex(&hex_key)?,
        None => aes_key.clone(),
    };

    let progress = if args.json_progress {
        Some(JsonProgressSink::new(job_id_for(&args.anonymized_video)))
    } else {
        None
    };

    let ui = Ui::from_args(None, atty_stderr(), args.json_progress);
    let _stage = (!args.json_progress).then(|| ui.stage("restoring"));

    let result = restore::run::<FfmpegDecoder, FfmpegEncoder>(
        &args.anonymized_video,
        &args.data_pack,
        &aes_key,
        &hmac_key,
        &args.output,
        progress.as_ref(),
    );

    match result {
        Ok(outcome) => {
            eprintln!("restored {} frames to {}", outcome.frames_written, args.output.display());
            Ok(())
        }
        Err(RvaError::AuthFailed) => Err(anyhow!(
            "data pack failed HMAC verification; wrong key, or the pack was tampered with"
        )),
        Err(e) => Err(e.into()),
    }
}

fn job_id_for(input: &std::path::Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "restore".to_string())
}

fn atty_stderr() -> bool {
    use std::io::IsTerminal;
    std::io::stderr().is_terminal()
}
