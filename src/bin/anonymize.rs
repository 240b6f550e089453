//! anonymize - produce an obfuscated video and its authenticated data pack
//! from a source video.

use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use anyhow::{anyhow, Result};
use clap::Parser;

use rva_kernel::config::AnonymizeConfig;
use rva_kernel::crypto::Key;
#[cfg(feature = "detect-tract")]
use rva_kernel::detect::TractDetector;
use rva_kernel::detect::{DetectorRegistry, StubDetector};
use rva_kernel::obfuscate::ObfuscationStyle;
use rva_kernel::pipeline::{run_anonymize_job, AnonymizeRequest};
use rva_kernel::progress::{JsonProgressSink, ProgressEvent};
use rva_kernel::ui::Ui;
use rva_kernel::video::{FfmpegDecoder, FfmpegEncoder};

#[derive(Parser, Debug)]
#[command(name = "anonymize", about = "Anonymize a video and emit its data pack")]
struct Args {
    /// Source video path
    input: PathBuf,

    /// Anonymized output video path
    #[arg(long)]
    output: Option<PathBuf>,

    /// Data pack output path
    #[arg(long = "data-pack")]
    data_pack: Option<PathBuf>,

    /// Detector model path (overrides the configured default)
    #[arg(long)]
    model: Option<String>,

    /// Detector device preference: cpu, gpu, auto
    #[arg(long)]
    device: Option<String>,

    /// Hex-encoded AES key (16/24/32 bytes); random if omitted
    #[arg(long)]
    key: Option<String>,

    /// Hex-encoded HMAC key; defaults to the AES key if omitted
    #[arg(long = "hmac-key")]
    hmac_key: Option<String>,

    /// Space-separated list of detector class labels to protect
    #[arg(long, num_args = 1..)]
    classes: Vec<String>,

    /// Manually seeded region, "x1,y1,x2,y2"; may be repeated
    #[arg(long = "manual-roi")]
    manual_roi: Vec<String>,

    /// Obfuscation style: blur, mosaic, pixelate
    #[arg(long)]
    style: Option<String>,

    /// Disable the object detector; protect only manual regions
    #[arg(long = "disable-detector")]
    disable_detector: bool,

    /// Number of worker threads (reserved: the pipeline hard-codes exactly
    /// one worker today; any other value only logs a warning)
    #[arg(long)]
    workers: Option<usize>,

    /// Embed the data pack into the output video as a uuid box
    #[arg(long = "embed-pack")]
    embed_pack: bool,

    /// Output path for the embedded variant; defaults to overwriting `output`
    #[arg(long = "embedded-output")]
    embedded_output: Option<PathBuf>,

    /// Emit one JSON progress event per line on stdout instead of a spinner
    #[arg(long = "json-progress")]
    json_progress: bool,
}

fn main() -> Result<()> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("warn")).init();

    let args = Args::parse();
    let defaults = AnonymizeConfig::load()?;

    let input = args.input;
    let output = args
        .output
        .unwrap_or_else(|| input.with_file_name("anonymized.mp4"));
    let data_pack = args
        .data_pack
        .unwrap_or_else(|| output.with_extension("rvapack"));

    let aes_key_was_generated = args.key.is_none();
    let aes_key = match args.key {
        Some(hex_key) => Key::from_hex(&hex_key)?,
        None => Key::random(32)?,
    };
    let hmac_key_was_generated = args.hmac_key.is_none();
    let hmac_key = match args.hmac_key {
        Some(hex_key) => Key::from_hex(&hex_key)?,
        None => aes_key.clone(),
    };
    // A generated key lives only in process memory; losing it makes the pack
    // unrestorable, so surface it once up front rather than only at the end.
    let generated_aes_key_hex = aes_key_was_generated.then(|| aes_key.to_hex());
    let generated_hmac_key_hex = hmac_key_was_generated.then(|| hmac_key.to_hex());

    let style = match args.style {
        Some(s) => ObfuscationStyle::parse(&s)?,
        None => defaults.style,
    };
    let classes = if args.classes.is_empty() {
        defaults.classes.clone()
    } else {
        args.classes
    };
    let disable_detector = args.disable_detector || defaults.disable_detector;
    let workers = args.workers.unwrap_or(defaults.workers);
    if workers == 0 {
        return Err(anyhow!("--workers must be at least 1"));
    }
    if workers != 1 {
        log::warn!(
            "--workers {workers} requested, but this pipeline always runs exactly one worker \
             (known flag/behavior mismatch); proceeding with one worker"
        );
    }
    let manual_rois = args
        .manual_roi
        .iter()
        .map(|s| parse_roi(s))
        .collect::<Result<Vec<_>>>()?;

    let _ = &args.device; // device selection is not yet exposed by any registered backend

    let detector = if disable_detector {
        None
    } else {
        let mut registry = DetectorRegistry::new();
        #[cfg(feature = "detect-tract")]
        {
            let model_path = args.model.as_deref().unwrap_or(&defaults.model);
            let names = classes
                .iter()
                .enumerate()
                .map(|(id, label)| (id as i64, label.clone()))
                .collect();
            registry.register(TractDetector::new(model_path, 640, 640, names)?);
        }
        #[cfg(not(feature = "detect-tract"))]
        {
            let _ = &args.model;
            registry.register(StubDetector::new());
        }
        registry.default_backend()
    };

    let progress = if args.json_progress {
        Some(Arc::new(JsonProgressSink::new(job_id_for(&input))))
    } else {
        None
    };

    let cancel = Arc::new(AtomicBool::new(false));
    let cancel_for_handler = cancel.clone();
    ctrlc::set_handler(move || {
        cancel_for_handler.store(true, Ordering::SeqCst);
    })
    .map_err(|e| anyhow!("failed to install Ctrl-C handler: {e}"))?;

    let ui = Ui::from_args(None, atty_stderr(), args.json_progress);
    let _stage = (!args.json_progress).then(|| ui.stage("anonymizing"));

    let embed_pack = args.embed_pack || defaults.embed_pack;
    let args_embedded_output_display = embed_pack.then(|| {
        args.embedded_output
            .as_deref()
            .unwrap_or(&output)
            .display()
            .to_string()
    });

    let request = AnonymizeRequest {
        input,
        output,
        data_pack,
        aes_key,
        hmac_key,
        style,
        classes,
        manual_rois,
        disable_detector,
        detector,
        embed_pack,
        embedded_output: args.embedded_output,
    };

    let progress_for_completion = progress.clone();
    let outcome = run_anonymize_job::<FfmpegDecoder, FfmpegEncoder>(request, cancel.clone(), progress)?;

    if outcome.cancelled {
        if let Some(sink) = &progress_for_completion {
            sink.emit(&ProgressEvent::Cancelled);
        }
        eprintln!("anonymization cancelled after {} frames", outcome.frames_processed);
        std::process::exit(0);
    }

    if let Some(sink) = &progress_for_completion {
        sink.emit(&ProgressEvent::Completed {
            digest_hex: Some(hex::encode(outcome.pack_digest)),
            aes_key_hex: generated_aes_key_hex.clone(),
            hmac_key_hex: generated_hmac_key_hex.clone(),
            embedded_output: args_embedded_output_display.clone(),
        });
    }

    eprintln!(
        "anonymized {} frames; data pack digest {}",
        outcome.frames_processed,
        hex::encode(outcome.pack_digest)
    );
    if let Some(key_hex) = &generated_aes_key_hex {
        eprintln!("generated AES key (save this, required to restore): {key_hex}");
    }
    if let Some(key_hex) = &generated_hmac_key_hex {
        eprintln!("generated HMAC key (save this, required to restore): {key_hex}");
    }
    Ok(())
}

fn parse_roi(s: &str) -> Result<(u32, u32, u32, u32)> {
    let parts: Vec<&str> = s.split(',').collect();
    if parts.len() != 4 {
        return Err(anyhow!("--manual-roi expects \"x1,y1,x2,y2\", got \"{s}\""));
    }
    let values: Vec<u32> = parts
        .iter()
        .map(|p| p.trim().parse::<u32>())
        .collect::<Result<_, _>>()
        .map_err(|e| anyhow!("--manual-roi \"{s}\": {e}"))?;
    Ok((values[0], values[1], values[2], values[3]))
}

fn job_id_for(input: &std::path::Path) -> String {
    input
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "anonymize".to_string())
}

fn atty_stderr() -> bool {
    use std::io::IsTerminal;
    std::io::stderr().is_terminal()
}
