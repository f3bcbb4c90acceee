// SPDX-License-Identifier: MIT OR Apache-2.0

#![forbid(unsafe_code)]

use rrd_cli::{CliError, DecodeOptions, parse_report_batch, run_decode};
use rrd_core::{
    BinRange, BudgetMode, Constraints, DecodeConfig, DecodeConfigWire, ExecutionContext,
    ParameterSet, ParameterSetWire, ReproMode,
};
use rrd_decoder::{Sha256Encoder, build_bins, compute_auto_range_upper_bound};
use serde::Serialize;
use serde::de::DeserializeOwned;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::process;
use tracing_subscriber::EnvFilter;

#[derive(Debug)]
struct Cli {
    command: Command,
    verbose: bool,
}

#[derive(Debug)]
enum Command {
    Decode(DecodeArgs),
    Range(RangeArgs),
}

/// Overrides layered on top of the defaults or a `--params` file.
#[derive(Debug, Default)]
struct ParamOverrides {
    params_path: Option<PathBuf>,
    bit_size: Option<usize>,
    hash_count: Option<usize>,
    f: Option<f64>,
    p: Option<f64>,
    q: Option<f64>,
}

#[derive(Debug, Default)]
struct RangeOverrides {
    config_path: Option<PathBuf>,
    bin_width: Option<u64>,
    bin_start: Option<u64>,
    upper_bound: Option<u64>,
}

#[derive(Debug, Default)]
struct DecodeArgs {
    input: PathBuf,
    params: ParamOverrides,
    range: RangeOverrides,
    lambdas: Option<Vec<f64>>,
    refine: bool,
    repro_mode: ReproMode,
    time_budget_ms: Option<u64>,
    max_design_cells: Option<usize>,
    soft_budget: bool,
    diagnostics: bool,
    output: Option<PathBuf>,
}

#[derive(Debug, Default)]
struct RangeArgs {
    input: Option<PathBuf>,
    params: ParamOverrides,
    range: RangeOverrides,
    output: Option<PathBuf>,
}

#[derive(Serialize)]
struct RangeOutput {
    range: BinRange,
    bin_count: usize,
    bit_size: usize,
    hash_count: usize,
    bins: Vec<RangeBinOutput>,
}

#[derive(Serialize)]
struct RangeBinOutput {
    label: String,
    indices: Vec<usize>,
}

#[derive(Serialize)]
struct ErrorEnvelope {
    error: ErrorPayload,
}

#[derive(Serialize)]
struct ErrorPayload {
    code: String,
    message: String,
}

fn main() {
    if let Err(err) = run() {
        emit_structured_error(&err);
        process::exit(1);
    }
}

fn run() -> Result<(), CliError> {
    let Some(cli) = parse_cli_from_env()? else {
        return Ok(());
    };
    init_tracing(cli.verbose);

    match cli.command {
        Command::Decode(args) => handle_decode(args),
        Command::Range(args) => handle_range(args),
    }
}

fn init_tracing(verbose: bool) {
    let default_directive = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive));
    // A subscriber installed by an embedding process wins.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .try_init();
}

fn parse_cli_from_env() -> Result<Option<Cli>, CliError> {
    let args = env::args().skip(1).collect::<Vec<_>>();
    parse_cli(&args)
}

fn parse_cli(args: &[String]) -> Result<Option<Cli>, CliError> {
    if args.is_empty() || matches!(args[0].as_str(), "-h" | "--help") {
        print_root_help();
        return Ok(None);
    }
    if matches!(args[0].as_str(), "-V" | "--version") {
        print_version();
        return Ok(None);
    }

    let command_name = args[0].as_str();
    let mut rest = Vec::with_capacity(args.len() - 1);
    let mut verbose = false;
    for arg in &args[1..] {
        match arg.as_str() {
            "-h" | "--help" => {
                print_command_help(command_name)?;
                return Ok(None);
            }
            "-V" | "--version" => {
                print_version();
                return Ok(None);
            }
            "-v" | "--verbose" => verbose = true,
            _ => rest.push(arg.clone()),
        }
    }

    let command = match command_name {
        "decode" => Command::Decode(parse_decode_args(&rest)?),
        "range" => Command::Range(parse_range_args(&rest)?),
        _ => {
            return Err(CliError::invalid_input(format!(
                "unknown command '{command_name}'; expected one of: decode, range"
            )));
        }
    };

    Ok(Some(Cli { command, verbose }))
}

/// Consumes a parameter flag; returns `false` when the flag is not one.
fn parse_param_flag(
    params: &mut ParamOverrides,
    flag: &str,
    inline_value: &mut Option<String>,
    tokens: &[String],
    idx: &mut usize,
) -> Result<bool, CliError> {
    let slot = match flag {
        "--params" => {
            let raw = take_flag_value(flag, inline_value.take(), tokens, idx)?;
            params.params_path = Some(PathBuf::from(raw));
            return Ok(true);
        }
        "--bit-size" => &mut params.bit_size,
        "--hash-count" => &mut params.hash_count,
        "--f" | "--p" | "--q" => {
            let raw = take_flag_value(flag, inline_value.take(), tokens, idx)?;
            let value = Some(parse_f64_arg(raw.as_str(), flag)?);
            match flag {
                "--f" => params.f = value,
                "--p" => params.p = value,
                _ => params.q = value,
            }
            return Ok(true);
        }
        _ => return Ok(false),
    };
    let raw = take_flag_value(flag, inline_value.take(), tokens, idx)?;
    *slot = Some(parse_usize_arg(raw.as_str(), flag)?);
    Ok(true)
}

fn parse_range_flag(
    range: &mut RangeOverrides,
    flag: &str,
    inline_value: &mut Option<String>,
    tokens: &[String],
    idx: &mut usize,
) -> Result<bool, CliError> {
    let slot = match flag {
        "--config" => {
            let raw = take_flag_value(flag, inline_value.take(), tokens, idx)?;
            range.config_path = Some(PathBuf::from(raw));
            return Ok(true);
        }
        "--bin-width" => &mut range.bin_width,
        "--bin-start" => &mut range.bin_start,
        "--upper-bound" => &mut range.upper_bound,
        _ => return Ok(false),
    };
    let raw = take_flag_value(flag, inline_value.take(), tokens, idx)?;
    *slot = Some(parse_u64_arg(raw.as_str(), flag)?);
    Ok(true)
}

fn parse_decode_args(tokens: &[String]) -> Result<DecodeArgs, CliError> {
    let mut args = DecodeArgs::default();
    let mut idx = 0usize;
    while idx < tokens.len() {
        let (flag, inline_value) = split_flag(tokens[idx].as_str())?;
        let mut inline_value = inline_value;
        if parse_param_flag(&mut args.params, flag, &mut inline_value, tokens, &mut idx)?
            || parse_range_flag(&mut args.range, flag, &mut inline_value, tokens, &mut idx)?
        {
            idx += 1;
            continue;
        }
        match flag {
            "--input" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.input = PathBuf::from(raw);
            }
            "--lambdas" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.lambdas = Some(parse_f64_list(raw.as_str(), flag)?);
            }
            "--refine" => {
                ensure_no_inline_value(flag, inline_value)?;
                args.refine = true;
            }
            "--diagnostics" => {
                ensure_no_inline_value(flag, inline_value)?;
                args.diagnostics = true;
            }
            "--repro" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.repro_mode = parse_repro_mode(raw.as_str())?;
            }
            "--strict" => {
                ensure_no_inline_value(flag, inline_value)?;
                args.repro_mode = ReproMode::Strict;
            }
            "--time-budget-ms" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.time_budget_ms = Some(parse_u64_arg(raw.as_str(), flag)?);
            }
            "--max-design-cells" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.max_design_cells = Some(parse_usize_arg(raw.as_str(), flag)?);
            }
            "--soft-budget" => {
                ensure_no_inline_value(flag, inline_value)?;
                args.soft_budget = true;
            }
            "--output" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.output = Some(PathBuf::from(raw));
            }
            other => {
                return Err(CliError::invalid_input(format!(
                    "unknown decode option '{other}'"
                )));
            }
        }
        idx += 1;
    }

    if args.input.as_os_str().is_empty() {
        return Err(CliError::invalid_input("decode requires --input <path>"));
    }

    Ok(args)
}

fn parse_range_args(tokens: &[String]) -> Result<RangeArgs, CliError> {
    let mut args = RangeArgs::default();
    let mut idx = 0usize;
    while idx < tokens.len() {
        let (flag, inline_value) = split_flag(tokens[idx].as_str())?;
        let mut inline_value = inline_value;
        if parse_param_flag(&mut args.params, flag, &mut inline_value, tokens, &mut idx)?
            || parse_range_flag(&mut args.range, flag, &mut inline_value, tokens, &mut idx)?
        {
            idx += 1;
            continue;
        }
        match flag {
            "--input" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.input = Some(PathBuf::from(raw));
            }
            "--output" => {
                let raw = take_flag_value(flag, inline_value, tokens, &mut idx)?;
                args.output = Some(PathBuf::from(raw));
            }
            other => {
                return Err(CliError::invalid_input(format!(
                    "unknown range option '{other}'"
                )));
            }
        }
        idx += 1;
    }

    Ok(args)
}

fn split_flag(token: &str) -> Result<(&str, Option<String>), CliError> {
    if !token.starts_with("--") {
        return Err(CliError::invalid_input(format!(
            "unexpected positional argument '{token}'; expected --flag value"
        )));
    }
    if let Some((flag, value)) = token.split_once('=') {
        return Ok((flag, Some(value.to_string())));
    }
    Ok((token, None))
}

fn take_flag_value(
    flag: &str,
    inline_value: Option<String>,
    tokens: &[String],
    idx: &mut usize,
) -> Result<String, CliError> {
    if let Some(value) = inline_value {
        return Ok(value);
    }

    *idx += 1;
    let value = tokens
        .get(*idx)
        .ok_or_else(|| CliError::invalid_input(format!("{flag} requires a value")))?;
    if value.starts_with("--") {
        return Err(CliError::invalid_input(format!(
            "{flag} requires a value, but got option '{value}'"
        )));
    }
    Ok(value.clone())
}

fn ensure_no_inline_value(flag: &str, inline_value: Option<String>) -> Result<(), CliError> {
    if inline_value.is_some() {
        return Err(CliError::invalid_input(format!(
            "{flag} does not accept a value"
        )));
    }
    Ok(())
}

fn parse_usize_arg(raw: &str, flag: &str) -> Result<usize, CliError> {
    raw.parse::<usize>().map_err(|_| {
        CliError::invalid_input(format!(
            "{flag} expects a non-negative integer, got '{raw}'"
        ))
    })
}

fn parse_u64_arg(raw: &str, flag: &str) -> Result<u64, CliError> {
    raw.parse::<u64>().map_err(|_| {
        CliError::invalid_input(format!(
            "{flag} expects a non-negative integer, got '{raw}'"
        ))
    })
}

fn parse_f64_arg(raw: &str, flag: &str) -> Result<f64, CliError> {
    raw.parse::<f64>()
        .map_err(|_| CliError::invalid_input(format!("{flag} expects a number, got '{raw}'")))
}

fn parse_f64_list(raw: &str, flag: &str) -> Result<Vec<f64>, CliError> {
    raw.split(',')
        .map(str::trim)
        .filter(|part| !part.is_empty())
        .map(|part| parse_f64_arg(part, flag))
        .collect()
}

fn parse_repro_mode(raw: &str) -> Result<ReproMode, CliError> {
    match raw {
        "strict" => Ok(ReproMode::Strict),
        "balanced" => Ok(ReproMode::Balanced),
        "fast" => Ok(ReproMode::Fast),
        other => Err(CliError::invalid_input(format!(
            "--repro expects one of strict, balanced, fast; got '{other}'"
        ))),
    }
}

fn print_version() {
    println!("rrd {}", env!("CARGO_PKG_VERSION"));
}

fn print_root_help() {
    println!(
        "rrd {}\n\nUSAGE:\n  rrd <COMMAND> [OPTIONS]\n\nCOMMANDS:\n  decode   Decode a JSON report batch into a probability table\n  range    Show the bin layout and Bloom indices for a configuration\n\nGLOBAL OPTIONS:\n  -h, --help      Show help\n  -V, --version   Show version\n  -v, --verbose   Debug logging on stderr (RUST_LOG overrides)\n\nRun 'rrd <COMMAND> --help' for subcommand options.",
        env!("CARGO_PKG_VERSION")
    );
}

const PARAM_OPTIONS_HELP: &str = "  --params <path>                 Versioned parameter-set JSON\n  --bit-size <usize>              Default: 32\n  --hash-count <usize>            Default: 2\n  --f <float>                     Permanent randomization, default: 0.5\n  --p <float>                     P(report 1 | true 0), default: 0.5\n  --q <float>                     P(report 1 | true 1), default: 0.75\n  --config <path>                 Versioned decode-config JSON\n  --bin-width <u64>               Default: 100\n  --bin-start <u64>               Default: 0\n  --upper-bound <u64>             Exclusive; default sized from the largest value";

fn print_command_help(command: &str) -> Result<(), CliError> {
    match command {
        "decode" => {
            println!(
                "USAGE:\n  rrd decode --input <reports.json> [OPTIONS]\n\nOPTIONS:\n  --input <path>                  Required report batch (array or submission envelopes)\n{PARAM_OPTIONS_HELP}\n  --lambdas <f64,f64,...>         Default: 0.01,0.05,0.1,0.2,0.4\n  --refine                        Append the ridge refinement stage\n  --repro <strict|balanced|fast>  Default: balanced\n  --strict                        Same as --repro strict\n  --time-budget-ms <u64>\n  --max-design-cells <usize>\n  --soft-budget                   Warn instead of failing when a budget is exceeded\n  --diagnostics                   Include decode diagnostics in the output\n  --output <path>                 Write JSON output to file"
            );
            Ok(())
        }
        "range" => {
            println!(
                "USAGE:\n  rrd range [OPTIONS]\n\nOPTIONS:\n  --input <path>                  Report batch used to size the upper bound\n{PARAM_OPTIONS_HELP}\n  --output <path>                 Write JSON output to file"
            );
            Ok(())
        }
        _ => Err(CliError::invalid_input(format!(
            "unknown command '{command}'; expected one of: decode, range"
        ))),
    }
}

fn handle_decode(args: DecodeArgs) -> Result<(), CliError> {
    let params = resolve_params(&args.params)?;
    let mut config = resolve_config(&args.range)?;
    if let Some(lambdas) = args.lambdas {
        config.lambdas = lambdas;
    }
    let reports = load_reports(args.input.as_path())?;
    tracing::debug!(reports = reports.len(), path = %args.input.display(), "loaded report batch");

    let constraints = Constraints {
        time_budget_ms: args.time_budget_ms,
        max_design_cells: args.max_design_cells,
    };
    let budget_mode = if args.soft_budget {
        BudgetMode::SoftDegrade
    } else {
        BudgetMode::HardFail
    };
    let exec = ExecutionContext::new(&constraints)
        .with_budget_mode(budget_mode)
        .with_repro_mode(args.repro_mode);
    let options = DecodeOptions {
        refine: args.refine,
        include_diagnostics: args.diagnostics,
    };

    let output = run_decode(&reports, params, &config, options, &exec)?;
    write_json_output(&output, args.output.as_deref())
}

fn handle_range(args: RangeArgs) -> Result<(), CliError> {
    let params = resolve_params(&args.params)?;
    params.validate()?;
    let config = resolve_config(&args.range)?;
    let upper_bound = match (config.bin_upper_bound, args.input.as_deref()) {
        (Some(bound), _) => bound,
        (None, Some(path)) => {
            let reports = load_reports(path)?;
            compute_auto_range_upper_bound(&reports, config.bin_width)?
        }
        (None, None) => {
            return Err(CliError::invalid_input(
                "range requires --upper-bound or --input to size the range",
            ));
        }
    };
    let range = BinRange::new(config.bin_start, config.bin_width, upper_bound)?;

    let constraints = Constraints::default();
    let exec = ExecutionContext::new(&constraints);
    let bins = build_bins(
        &range,
        params.bit_size,
        params.hash_count,
        &Sha256Encoder,
        &exec,
    )?;

    write_json_output(
        &RangeOutput {
            range,
            bin_count: bins.len(),
            bit_size: params.bit_size,
            hash_count: params.hash_count,
            bins: bins
                .into_iter()
                .map(|bin| RangeBinOutput {
                    label: bin.label,
                    indices: bin.indices,
                })
                .collect(),
        },
        args.output.as_deref(),
    )
}

fn resolve_params(overrides: &ParamOverrides) -> Result<ParameterSet, CliError> {
    let mut params = match overrides.params_path.as_deref() {
        Some(path) => read_json::<ParameterSetWire>(path)?.to_runtime()?,
        None => ParameterSet::default(),
    };
    if let Some(bit_size) = overrides.bit_size {
        params.bit_size = bit_size;
    }
    if let Some(hash_count) = overrides.hash_count {
        params.hash_count = hash_count;
    }
    if let Some(f) = overrides.f {
        params.permanent_probability = f;
    }
    if let Some(p) = overrides.p {
        params.instantaneous_probability_for_zero = p;
    }
    if let Some(q) = overrides.q {
        params.instantaneous_probability_for_one = q;
    }
    Ok(params)
}

fn resolve_config(overrides: &RangeOverrides) -> Result<DecodeConfig, CliError> {
    let mut config = match overrides.config_path.as_deref() {
        Some(path) => read_json::<DecodeConfigWire>(path)?.to_runtime()?,
        None => DecodeConfig::default(),
    };
    if let Some(width) = overrides.bin_width {
        config.bin_width = width;
    }
    if let Some(start) = overrides.bin_start {
        config.bin_start = start;
    }
    if overrides.upper_bound.is_some() {
        config.bin_upper_bound = overrides.upper_bound;
    }
    Ok(config)
}

fn load_reports(path: &Path) -> Result<Vec<rrd_core::Report>, CliError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| CliError::io(format!("failed to read '{}'", path.display()), source))?;
    parse_report_batch(raw.as_str())
}

fn read_json<T: DeserializeOwned>(path: &Path) -> Result<T, CliError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| CliError::io(format!("failed to read '{}'", path.display()), source))?;
    serde_json::from_str(raw.as_str())
        .map_err(|source| CliError::json(format!("invalid JSON in '{}'", path.display()), source))
}

fn write_json_output<T: Serialize>(
    payload: &T,
    output_path: Option<&Path>,
) -> Result<(), CliError> {
    let encoded = serde_json::to_string_pretty(payload)
        .map_err(|source| CliError::json("failed to serialize JSON output", source))?;

    if let Some(path) = output_path {
        fs::write(path, format!("{encoded}\n"))
            .map_err(|source| CliError::io(format!("failed to write '{}'", path.display()), source))
    } else {
        println!("{encoded}");
        Ok(())
    }
}

fn emit_structured_error(err: &CliError) {
    let envelope = ErrorEnvelope {
        error: ErrorPayload {
            code: err.code().to_string(),
            message: err.to_string(),
        },
    };

    match serde_json::to_string_pretty(&envelope) {
        Ok(json) => eprintln!("{json}"),
        Err(_) => eprintln!(
            "{{\"error\":{{\"code\":\"{}\",\"message\":\"{}\"}}}}",
            err.code(),
            err
        ),
    }
}
