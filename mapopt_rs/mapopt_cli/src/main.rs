use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::{anyhow, Context, Result};
use clap::{ArgAction, Parser, Subcommand, ValueEnum, ValueHint};
use mapopt::{analyze, Analysis, Params, Rejection, SignalSample};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "MAPopt estimation CLI", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Estimate the MAPopt series and burden for a prepared MAP/rSO2 recording
    Analyze(AnalyzeArgs),
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum TimeUnit {
    Hours,
    Minutes,
}

impl TimeUnit {
    fn to_hours(self, value: f64) -> f64 {
        match self {
            TimeUnit::Hours => value,
            TimeUnit::Minutes => value / 60.0,
        }
    }
}

#[derive(Parser, Debug)]
struct AnalyzeArgs {
    /// CSV/TSV with a header row and columns time, MAP, rSO2
    #[arg(value_hint = ValueHint::FilePath)]
    input: PathBuf,

    /// Output path (`-` for stdout)
    #[arg(short, long, default_value = "-", value_hint = ValueHint::FilePath)]
    output: PathBuf,

    /// Write the full JSON report instead of the series CSV
    #[arg(long, action = ArgAction::SetTrue)]
    json: bool,

    /// Unit of the time column
    #[arg(long, value_enum, default_value_t = TimeUnit::Hours)]
    time_unit: TimeUnit,

    /// Optional JSON file with run parameters
    #[arg(long, value_hint = ValueHint::FilePath)]
    config: Option<PathBuf>,

    /// Burden range start (hours)
    #[arg(long)]
    start: Option<f64>,

    /// Burden range end (hours)
    #[arg(long)]
    end: Option<f64>,

    /// Upper bound on worker threads (capped at 8)
    #[arg(long)]
    workers: Option<usize>,

    /// Sliding burden profile window (hours)
    #[arg(long)]
    burden_window: Option<f64>,

    /// Sliding burden profile step (hours)
    #[arg(long)]
    burden_step: Option<f64>,

    /// Log stage timings
    #[arg(long, action = ArgAction::SetTrue)]
    profile: bool,

    /// Verbose logging
    #[arg(short, long, action = ArgAction::SetTrue)]
    verbose: bool,
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    let default_level = match &cli.command {
        Command::Analyze(args) => {
            if args.verbose {
                "debug"
            } else {
                "info"
            }
        }
    };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .try_init();

    match cli.command {
        Command::Analyze(args) => handle_analyze(args),
    }
}

fn build_params(args: &AnalyzeArgs) -> Result<Params> {
    let mut params = match args.config.as_ref() {
        Some(path) => {
            let text = fs::read_to_string(path)
                .with_context(|| format!("failed to read {}", path.display()))?;
            Params::from_json_str(&text)
                .with_context(|| format!("invalid parameters in {}", path.display()))?
        }
        None => Params::default(),
    };
    if args.workers.is_some() {
        params.max_workers = args.workers;
    }
    if args.start.is_some() {
        params.burden_start_hour = args.start;
    }
    if args.end.is_some() {
        params.burden_end_hour = args.end;
    }
    if let Some(window) = args.burden_window {
        params.burden_window_hours = window;
    }
    if let Some(step) = args.burden_step {
        params.burden_step_hours = step;
    }
    params.validate()?;
    Ok(params)
}

fn handle_analyze(args: AnalyzeArgs) -> Result<()> {
    let params = build_params(&args)?;

    let t_read = Instant::now();
    let samples = read_samples(&args.input, args.time_unit)?;
    if args.profile || args.verbose {
        info!(
            "Read stage: {:.1} ms ({} samples)",
            t_read.elapsed().as_secs_f64() * 1000.0,
            samples.len()
        );
    }

    let progress = |percent: f64| debug!("progress {:.1}%", percent);
    let t_compute = Instant::now();
    let analysis = analyze(&samples, &params, Some(&progress))
        .with_context(|| format!("analysis of {} failed", args.input.display()))?;
    if args.profile || args.verbose {
        info!(
            "Compute stage: {:.1} ms ({} workers)",
            t_compute.elapsed().as_secs_f64() * 1000.0,
            params.resolved_workers()
        );
    }
    log_summary(&analysis);

    let output_is_stdout = args.output.as_os_str() == "-";
    if args.json {
        let text = serde_json::to_string_pretty(&analysis)?;
        if output_is_stdout {
            let stdout = io::stdout();
            let mut handle = stdout.lock();
            handle.write_all(text.as_bytes())?;
            handle.write_all(b"\n")?;
        } else {
            fs::write(&args.output, text)
                .with_context(|| format!("failed to write {}", args.output.display()))?;
        }
    } else if output_is_stdout {
        let stdout = io::stdout();
        let mut writer = csv::Writer::from_writer(stdout.lock());
        write_series_rows(&analysis, &mut writer)?;
    } else {
        let file = File::create(&args.output)
            .with_context(|| format!("failed to create {}", args.output.display()))?;
        let mut writer = csv::Writer::from_writer(file);
        write_series_rows(&analysis, &mut writer)?;
    }
    if !output_is_stdout {
        info!("Wrote {}", args.output.display());
    }
    Ok(())
}

fn parse_cell(raw: Option<&str>) -> f64 {
    match raw.map(str::trim) {
        Some("") | None => f64::NAN,
        Some(text) => text.parse::<f64>().unwrap_or(f64::NAN),
    }
}

fn read_samples(path: &Path, unit: TimeUnit) -> Result<Vec<SignalSample>> {
    let delimiter = match path.extension().and_then(|ext| ext.to_str()) {
        Some("tsv") | Some("txt") => b'\t',
        _ => b',',
    };
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .from_path(path)
        .with_context(|| format!("failed to open {}", path.display()))?;

    let mut samples = Vec::new();
    let mut skipped = 0usize;
    for (row, record) in reader.records().enumerate() {
        let record = record.with_context(|| format!("bad row {} in {}", row + 2, path.display()))?;
        if record.len() < 3 {
            return Err(anyhow!(
                "row {} in {} has {} columns; expected time, MAP, rSO2",
                row + 2,
                path.display(),
                record.len()
            ));
        }
        let time = parse_cell(record.get(0));
        if !time.is_finite() {
            skipped += 1;
            continue;
        }
        samples.push(SignalSample {
            time_h: unit.to_hours(time),
            map: parse_cell(record.get(1)),
            rso2: parse_cell(record.get(2)),
        });
    }
    if skipped > 0 {
        warn!("Skipped {skipped} rows without a usable time value");
    }
    if samples.is_empty() {
        return Err(anyhow!("no samples found in {}", path.display()));
    }
    Ok(samples)
}

fn log_summary(analysis: &Analysis) {
    let summary = &analysis.run.summary;
    info!(
        "MAPopt: {}/{} valid points ({:.1}%), {} fits, mean {:.1} mmHg (sd {:.1}, range {:.1}-{:.1})",
        summary.valid_points,
        summary.total_points,
        summary.validity_percent,
        summary.total_fits,
        summary.mapopt_mean,
        summary.mapopt_std,
        summary.mapopt_min,
        summary.mapopt_max
    );
    let burden = &analysis.burden;
    info!(
        "Burden {:.2}-{:.2} h: time {:.1}%, area ratio {:.1}%",
        burden.start_hour, burden.end_hour, burden.time_burden, burden.area_burden_ratio
    );
    let stats = &analysis.burden_summary.deviation;
    info!(
        "Deviation: mean {:.1} mmHg, above band {:.1}%, below band {:.1}%",
        stats.mean, stats.percent_above, stats.percent_below
    );
    let top = analysis
        .run
        .rejections
        .iter()
        .max_by_key(|(_, count)| *count)
        .map(|(reason, count): (Rejection, usize)| format!("{} ({count})", reason.as_str()));
    if let Some(top) = top {
        debug!("Most frequent rejection: {top}");
    }
}

fn write_series_rows<W: Write>(analysis: &Analysis, writer: &mut csv::Writer<W>) -> Result<()> {
    writer.write_record([
        "time_h",
        "mapopt_raw",
        "mapopt",
        "map",
        "deviation",
        "outside_band",
    ])?;
    let run = &analysis.run;
    for i in 0..run.time_grid.len() {
        let raw = run.raw[i];
        writer.write_record([
            format!("{:.6}", run.time_grid[i]),
            if raw.is_nan() {
                String::new()
            } else {
                format!("{raw:.3}")
            },
            format!("{:.3}", run.series[i]),
            format!("{:.3}", analysis.map_on_grid[i]),
            format!("{:.3}", analysis.deviation[i]),
            u8::from(analysis.outside_band[i]).to_string(),
        ])?;
    }
    writer.flush()?;
    Ok(())
}
