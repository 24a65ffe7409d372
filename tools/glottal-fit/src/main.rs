/// Glottal Fit — source-filter analysis and synthesis from the command line.
///
/// Subcommands:
///   analyze   classic LPC analysis of one WAV segment (gain, coefficients, formant peaks)
///   fit       gradient fit of the LF source-filter model to a WAV segment
///   render    synthesize a WAV from a checkpoint or explicit parameters
mod wav;

use std::fs;
use std::ops::ControlFlow;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use openglottal_dsp::frame::{self, Frame, Window};
use openglottal_dsp::{
    AdamConfig, FitConfig, Fitter, InitialParams, LpcParams, ModelConfig, ParameterSet, SourceFilterModel,
};
use serde_json::json;
use tracing_subscriber::EnvFilter;

#[derive(Debug, thiserror::Error)]
enum CliError {
    #[error(transparent)]
    Dsp(#[from] openglottal_dsp::Error),
    #[error("WAV: {0}")]
    Wav(#[from] hound::Error),
    #[error("JSON: {0}")]
    Json(#[from] serde_json::Error),
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("{0}")]
    Usage(String),
}

type CliResult<T> = Result<T, CliError>;

fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with_writer(std::io::stderr)
        .init();

    let args: Vec<String> = std::env::args().collect();
    if args.len() < 2 {
        print_usage();
        std::process::exit(1);
    }

    let rest = &args[2..];
    if has_flag(rest, "--help") || has_flag(rest, "-h") {
        print_usage();
        return;
    }

    let result = match args[1].as_str() {
        "analyze" => cmd_analyze(rest),
        "fit" => cmd_fit(rest),
        "render" => cmd_render(rest),
        "--help" | "-h" | "help" => {
            print_usage();
            return;
        }
        other => Err(CliError::Usage(format!("unknown subcommand: {other}"))),
    };

    if let Err(e) = result {
        eprintln!("error: {e}");
        if matches!(e, CliError::Usage(_)) {
            print_usage();
        }
        std::process::exit(1);
    }
}

fn print_usage() {
    eprintln!("Glottal Fit — source-filter speech analysis and synthesis");
    eprintln!();
    eprintln!("Subcommands:");
    eprintln!("  analyze   LPC analysis of a WAV segment");
    eprintln!("            -i <wav> [--start N] [--length N] [--order M] [--window rect|hann|hamming]");
    eprintln!("            [--pre-emphasis C] [--json <out.json>]");
    eprintln!("  fit       Fit the LF source-filter model to a WAV segment");
    eprintln!("            -i <wav> [--start N] [--length N] [--order M] [--iterations T] [--lr X]");
    eprintln!("            [--f0 HZ] [--rd-index X] [--tables N] [--table-size P] [--init-lpc]");
    eprintln!("            [--checkpoint <out.json>] [--losses <out.json>] [-o <prediction.wav>]");
    eprintln!("  render    Synthesize from a checkpoint or explicit parameters");
    eprintln!("            -o <wav> [--checkpoint <in.json>] [--samples N] [--sample-rate HZ]");
    eprintln!("            [--f0 HZ] [--rd-index X] [--order M] [--tables N] [--table-size P]");
    eprintln!("            [--source-only] [--normalize]");
    eprintln!();
    eprintln!("Logging follows RUST_LOG (default: info).");
}

// ─── Argument helpers ───────────────────────────────────────────────────────

fn flag_value<'a>(args: &'a [String], flags: &[&str]) -> Option<&'a str> {
    for i in 0..args.len().saturating_sub(1) {
        if flags.contains(&args[i].as_str()) {
            return Some(&args[i + 1]);
        }
    }
    None
}

fn parse_flag<T: FromStr>(args: &[String], flag: &str, default: T) -> CliResult<T> {
    match flag_value(args, &[flag]) {
        Some(v) => v
            .parse()
            .map_err(|_| CliError::Usage(format!("invalid value for {flag}: {v}"))),
        None => Ok(default),
    }
}

fn has_flag(args: &[String], flag: &str) -> bool {
    args.iter().any(|a| a == flag)
}

fn input_path(args: &[String]) -> CliResult<PathBuf> {
    flag_value(args, &["--input", "-i"])
        .map(PathBuf::from)
        .ok_or_else(|| CliError::Usage("missing --input <wav>".to_string()))
}

fn output_path(args: &[String], flags: &[&str]) -> Option<PathBuf> {
    flag_value(args, flags).map(PathBuf::from)
}

fn parse_window(name: &str) -> CliResult<Window> {
    match name {
        "rect" | "rectangular" => Ok(Window::Rectangular),
        "hann" => Ok(Window::Hann),
        "hamming" => Ok(Window::Hamming),
        other => Err(CliError::Usage(format!("unknown window: {other}"))),
    }
}

/// Segment `--start`/`--length` of the input file (length clamped to what is available).
fn load_segment(args: &[String]) -> CliResult<Frame> {
    let path = input_path(args)?;
    let audio = wav::read_mono(&path)?;
    let start: usize = parse_flag(args, "--start", 0)?;
    let length: usize = parse_flag(args, "--length", 1024)?;

    let available = audio.samples.len().saturating_sub(start);
    if available == 0 {
        return Err(CliError::Usage(format!(
            "--start {start} is past the end of {} ({} samples)",
            path.display(),
            audio.samples.len()
        )));
    }
    let frame = Frame::new(audio.samples, audio.sample_rate as f64)?;
    let segment = frame.segment(start, length.min(available))?;
    tracing::info!(
        file = %path.display(),
        sample_rate = audio.sample_rate,
        start,
        length = segment.len(),
        "loaded segment"
    );
    Ok(segment)
}

fn write_json(path: &Path, value: &serde_json::Value) -> CliResult<()> {
    fs::write(path, serde_json::to_string_pretty(value)?)?;
    tracing::info!(file = %path.display(), "written");
    Ok(())
}

// ─── analyze ────────────────────────────────────────────────────────────────

fn cmd_analyze(args: &[String]) -> CliResult<()> {
    let segment = load_segment(args)?;
    let order: usize = parse_flag(args, "--order", 16)?;
    let window = parse_window(flag_value(args, &["--window"]).unwrap_or("hamming"))?;
    let pre_emphasis: f64 = parse_flag(args, "--pre-emphasis", 0.0)?;

    let conditioned = frame::remove_dc(segment.samples());
    let conditioned = if pre_emphasis != 0.0 {
        frame::pre_emphasis(&conditioned, pre_emphasis)
    } else {
        conditioned
    };
    let conditioned = Frame::new(conditioned, segment.sample_rate())?.windowed(window);

    let lpc = LpcParams::estimate(&conditioned, order)?;
    let sr = segment.sample_rate();
    let peaks = lpc.spectral_peaks(1024, sr);

    println!("order:  {}", lpc.order());
    println!("gain:   {:.6}", lpc.gain);
    println!("stable: {}", lpc.is_stable());
    println!("coefficients:");
    for (k, a) in lpc.coefficients.iter().enumerate() {
        println!("  a[{:>2}] = {a:+.6}", k + 1);
    }
    println!("envelope peaks:");
    for p in &peaks {
        println!("  {:>8.1} Hz  {:>7.2} dB", p.frequency_hz, 20.0 * p.magnitude.log10());
    }

    if let Some(path) = output_path(args, &["--json"]) {
        let reflection = lpc.reflection().ok();
        let value = json!({
            "sample_rate": sr,
            "frame_length": segment.len(),
            "window": window,
            "pre_emphasis": pre_emphasis,
            "lpc": lpc,
            "stable": lpc.is_stable(),
            "reflection": reflection,
            "peaks_hz": peaks.iter().map(|p| p.frequency_hz).collect::<Vec<_>>(),
        });
        write_json(&path, &value)?;
    }
    Ok(())
}

// ─── fit ────────────────────────────────────────────────────────────────────

fn model_config(args: &[String], sample_rate: f64) -> CliResult<ModelConfig> {
    let defaults = ModelConfig::default();
    let config = ModelConfig {
        sample_rate,
        table_size: parse_flag(args, "--table-size", defaults.table_size)?,
        table_count: parse_flag(args, "--tables", defaults.table_count)?,
        lpc_order: parse_flag(args, "--order", defaults.lpc_order)?,
    };
    config.validate()?;
    Ok(config)
}

fn initial_params(args: &[String]) -> CliResult<InitialParams> {
    let defaults = InitialParams::default();
    Ok(InitialParams {
        f0: parse_flag(args, "--f0", defaults.f0)?,
        offset: parse_flag(args, "--offset", defaults.offset)?,
        rd_index: parse_flag(args, "--rd-index", defaults.rd_index)?,
        log_gain: parse_flag(args, "--log-gain", defaults.log_gain)?,
        log_area_ratios: Vec::new(),
    })
}

fn cmd_fit(args: &[String]) -> CliResult<()> {
    let segment = load_segment(args)?;
    let target = frame::remove_dc(segment.samples());
    let config = model_config(args, segment.sample_rate())?;
    let fit_config = FitConfig {
        iterations: parse_flag(args, "--iterations", FitConfig::default().iterations)?,
        log_every: parse_flag(args, "--log-every", FitConfig::default().log_every)?,
        optimizer: AdamConfig {
            learning_rate: parse_flag(args, "--lr", AdamConfig::default().learning_rate)?,
            ..Default::default()
        },
    };

    let bank = config.build_bank()?;
    let init = initial_params(args)?;
    let mut model = if has_flag(args, "--init-lpc") {
        SourceFilterModel::from_lpc_estimate(config.clone(), bank, &target, init)?
    } else {
        SourceFilterModel::new(config.clone(), bank, init)?
    };

    let mut fitter = Fitter::new(fit_config.clone());
    let report = fitter.fit_with(&mut model, &target, |progress, m| {
        if progress.loss.is_finite() {
            ControlFlow::Continue(())
        } else {
            tracing::warn!(iteration = progress.iteration, f0 = m.f0(), "loss is not finite, stopping");
            ControlFlow::Break(())
        }
    })?;

    println!("iterations: {}", report.iterations());
    if let (Some(first), Some(last)) = (report.initial_loss(), report.final_loss()) {
        println!("loss:       {first:.6} -> {last:.6}");
    }
    println!("f0:         {:.3} Hz", model.f0());
    println!("rd:         {:.3}", model.rd());
    println!("gain:       {:.6}", model.gain());

    if let Some(path) = output_path(args, &["--checkpoint"]) {
        write_json(&path, &checkpoint(&model))?;
    }
    if let Some(path) = output_path(args, &["--losses"]) {
        let value = json!({
            "fit": fit_config,
            "losses": report.losses,
            "stopped_early": report.stopped_early,
        });
        write_json(&path, &value)?;
    }
    if let Some(path) = output_path(args, &["--output", "-o"]) {
        let prediction = model.predict(target.len());
        wav::write_mono_24(&path, &prediction, segment.sample_rate() as u32)?;
        tracing::info!(file = %path.display(), "written");
    }
    Ok(())
}

/// `{"model": ModelConfig, "parameters": ParameterSet}`
fn checkpoint(model: &SourceFilterModel) -> serde_json::Value {
    json!({
        "model": model.config(),
        "parameters": model.parameters(),
    })
}

fn load_checkpoint(path: &Path) -> CliResult<(ModelConfig, ParameterSet)> {
    let text = fs::read_to_string(path)?;
    let mut value: serde_json::Value = serde_json::from_str(&text)?;
    let mut field = |name: &str| value.get_mut(name).map(serde_json::Value::take).unwrap_or_default();
    let config: ModelConfig = serde_json::from_value(field("model"))?;
    let parameters: ParameterSet = serde_json::from_value(field("parameters"))?;
    Ok((config, parameters))
}

// ─── render ─────────────────────────────────────────────────────────────────

fn cmd_render(args: &[String]) -> CliResult<()> {
    let output = output_path(args, &["--output", "-o"])
        .ok_or_else(|| CliError::Usage("missing --output <wav>".to_string()))?;

    let model = match output_path(args, &["--checkpoint"]) {
        Some(path) => {
            let (config, parameters) = load_checkpoint(&path)?;
            let bank = config.build_bank()?;
            let mut model = SourceFilterModel::new(config, bank, InitialParams::default())?;
            model.load_parameters(&parameters)?;
            model
        }
        None => {
            let sample_rate: f64 = parse_flag(args, "--sample-rate", ModelConfig::default().sample_rate)?;
            let config = model_config(args, sample_rate)?;
            let bank = config.build_bank()?;
            SourceFilterModel::new(config, bank, initial_params(args)?)?
        }
    };

    let sample_rate = model.sample_rate();
    let steps: usize = parse_flag(args, "--samples", sample_rate as usize)?;
    let mut samples = if has_flag(args, "--source-only") {
        model.source(steps)
    } else {
        model.predict(steps)
    };
    if has_flag(args, "--normalize") {
        wav::normalize_peak(&mut samples, 0.9);
    }

    tracing::info!(
        f0 = model.f0(),
        rd = model.rd(),
        order = model.order(),
        steps,
        peak_dbfs = wav::peak_dbfs(&samples),
        "rendering"
    );
    wav::write_mono_24(&output, &samples, sample_rate as u32)?;
    tracing::info!(file = %output.display(), "written");
    Ok(())
}
