use std::fs;
use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use deepshark_core::dispatch::DissectorKey;
use deepshark_core::engine::{Engine, EngineBuilder};
use deepshark_core::{AnalysisOptions, Report};
use glob::glob;

#[derive(Parser, Debug)]
#[command(name = "deepshark")]
#[command(version)]
#[command(
    about = "Offline protocol dissector: decodes every frame of a capture into an annotated JSON tree.",
    long_about = None,
    after_help = "Examples:\n  deepshark pcap dissect capture.pcapng -o report.json\n  deepshark pcap dissect i2c.pcap --stdout --decode-as wtap_encap==147,hdcp -2\n  deepshark fields --prefix pwsatop"
)]
struct Cli {
    /// Log to stderr (-v info, -vv debug, -vvv trace)
    #[arg(short = 'v', long = "verbose", action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Operations on PCAP/PCAPNG inputs.
    Pcap {
        #[command(subcommand)]
        command: PcapCommands,
    },
    /// List registered fields as filter, name and type.
    Fields {
        /// Only fields whose filter name starts with this prefix
        #[arg(long)]
        prefix: Option<String>,
    },
}

#[derive(Subcommand, Debug)]
enum PcapCommands {
    /// Dissect a capture file and write a versioned JSON report.
    #[command(alias = "decode")]
    #[command(
        after_help = "Examples:\n  deepshark pcap dissect capture.pcapng -o report.json\n  deepshark pcap dissect 'captures/*.pcap' --stdout --pretty\n  deepshark pcap dissect tdm.pcap -o out.json --decode-as udp.port==5000,pw_satop_udp"
    )]
    Dissect(DissectArgs),
}

#[derive(clap::Args, Debug)]
struct DissectArgs {
    /// Path to a .pcap or .pcapng file (or a glob matching exactly one)
    input: PathBuf,

    /// Output report path (JSON)
    #[arg(short = 'o', long, required_unless_present = "stdout")]
    report: Option<PathBuf>,

    /// Write JSON report to stdout
    #[arg(long, conflicts_with = "report")]
    stdout: bool,

    /// Pretty-print JSON output
    #[arg(long, conflicts_with = "compact")]
    pretty: bool,

    /// Compact JSON output (default)
    #[arg(long)]
    compact: bool,

    /// Suppress non-error output
    #[arg(long)]
    quiet: bool,

    /// Exit with a non-zero code if any frame is malformed
    #[arg(long)]
    strict: bool,

    /// List malformed frames after dissection
    #[arg(long)]
    list_malformed: bool,

    /// Dissect twice so requests can point at later responses
    #[arg(short = '2', long)]
    two_pass: bool,

    /// Set a preference (NAME=VALUE), e.g. pwsatopcw.rtp_header=true
    #[arg(long = "pref", value_name = "NAME=VALUE")]
    prefs: Vec<String>,

    /// Decode-As rule TABLE==KEY,DISSECTOR, e.g. udp.port==5000,pw_satop_udp
    #[arg(long = "decode-as", value_name = "TABLE==KEY,DISSECTOR")]
    decode_as: Vec<String>,

    /// Maximum number of nested protocol layers
    #[arg(long)]
    max_depth: Option<usize>,
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    let result = match cli.command {
        Commands::Pcap { command } => match command {
            PcapCommands::Dissect(args) => cmd_pcap_dissect(args),
        },
        Commands::Fields { prefix } => cmd_fields(prefix.as_deref()),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            eprintln!("error: {}", err.message);
            if let Some(hint) = err.hint {
                eprintln!("hint: {}", hint);
            }
            ExitCode::from(2)
        }
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_max_level(level)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[derive(Debug)]
struct CliError {
    message: String,
    hint: Option<String>,
}

impl CliError {
    fn new(message: impl Into<String>, hint: Option<String>) -> Self {
        Self {
            message: message.into(),
            hint,
        }
    }
}

impl std::fmt::Display for CliError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

impl From<anyhow::Error> for CliError {
    fn from(err: anyhow::Error) -> Self {
        CliError::new(format!("{err:#}"), None)
    }
}

/// One parsed `--decode-as` rule.
#[derive(Debug, Clone, PartialEq, Eq)]
struct DecodeAsRule {
    table: String,
    key: DissectorKey,
    dissector: String,
}

fn parse_decode_as(rule: &str) -> Result<DecodeAsRule, CliError> {
    let invalid = || {
        CliError::new(
            format!("invalid decode-as rule '{rule}'"),
            Some("expected TABLE==KEY,DISSECTOR, e.g. udp.port==5000,pw_satop_udp".to_string()),
        )
    };
    let (table, rest) = rule.split_once("==").ok_or_else(invalid)?;
    let (key, dissector) = rest.split_once(',').ok_or_else(invalid)?;
    let (table, key, dissector) = (table.trim(), key.trim(), dissector.trim());
    if table.is_empty() || key.is_empty() || dissector.is_empty() {
        return Err(invalid());
    }
    Ok(DecodeAsRule {
        table: table.to_string(),
        key: parse_key(key),
        dissector: dissector.to_string(),
    })
}

/// Decimal or `0x` hex keys are numeric; anything else is a string key.
fn parse_key(key: &str) -> DissectorKey {
    let numeric = match key.strip_prefix("0x").or_else(|| key.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16).ok(),
        None => key.parse::<u64>().ok(),
    };
    match numeric {
        Some(value) => DissectorKey::UInt(value),
        None => DissectorKey::Str(key.to_string()),
    }
}

fn build_engine(args: &DissectArgs) -> Result<Engine, CliError> {
    let mut builder = EngineBuilder::with_builtin_dissectors();
    for pref in &args.prefs {
        let (name, value) = pref.split_once('=').ok_or_else(|| {
            CliError::new(
                format!("invalid preference '{pref}'"),
                Some("expected NAME=VALUE, e.g. udp.try_heuristic_first=true".to_string()),
            )
        })?;
        builder = builder.pref(name.trim(), value.trim());
    }
    if let Some(max_depth) = args.max_depth {
        builder = builder.max_depth(max_depth);
    }
    let engine = builder.build().map_err(|err| {
        CliError::new(
            format!("engine setup failed: {err}"),
            Some("run `deepshark fields` to list protocols; check --pref names and values".to_string()),
        )
    })?;

    for raw in &args.decode_as {
        let rule = parse_decode_as(raw)?;
        engine
            .set_override(&rule.table, rule.key.clone(), &rule.dissector)
            .map_err(|err| {
                CliError::new(
                    format!("cannot apply decode-as rule '{raw}': {err}"),
                    Some("check the table name and dissector name".to_string()),
                )
            })?;
    }
    Ok(engine)
}

fn cmd_pcap_dissect(args: DissectArgs) -> Result<(), CliError> {
    let resolved_input = resolve_input_path(&args.input)?;
    validate_input_file(&resolved_input)?;
    let input_abs = fs::canonicalize(&resolved_input)
        .with_context(|| format!("Failed to resolve input path: {}", resolved_input.display()))?;
    let report = if args.stdout {
        None
    } else {
        Some(args.report.clone().ok_or_else(|| {
            CliError::new(
                "missing output path",
                Some("use -o/--report or --stdout".to_string()),
            )
        })?)
    };

    if let Some(report_path) = report.as_ref() {
        ensure_distinct_output(report_path, &input_abs)?;
    }

    let meta = fs::metadata(&resolved_input)
        .with_context(|| format!("Failed to read input file: {}", resolved_input.display()))?;
    if !meta.is_file() {
        return Err(CliError::new(
            format!("input is not a file: {}", args.input.display()),
            Some("use a .pcap or .pcapng file".to_string()),
        ));
    }

    let engine = build_engine(&args)?;
    let options = AnalysisOptions {
        two_pass: args.two_pass,
    };
    let rep = deepshark_core::dissect_pcap_file(&resolved_input, &engine, options)
        .context("PCAP/PCAPNG dissection failed")?;
    let json = serialize_report(&rep, args.pretty, args.compact)?;

    match report {
        None => print!("{}", json),
        Some(report) => {
            if let Some(parent) = report.parent() {
                if !parent.as_os_str().is_empty() {
                    fs::create_dir_all(parent).with_context(|| {
                        format!("Failed to create output directory: {}", parent.display())
                    })?;
                }
            }
            fs::write(&report, json)
                .with_context(|| format!("Failed to write report: {}", report.display()))?;
            if !args.quiet {
                eprintln!("OK: report written -> {}", report.display());
            }
        }
    }

    if args.list_malformed && !args.quiet {
        print_malformed(&rep);
    }
    if args.strict && malformed_count(&rep) > 0 {
        return Err(CliError::new(
            format!("{} malformed frame(s) detected", malformed_count(&rep)),
            Some("use --list-malformed to inspect".to_string()),
        ));
    }
    Ok(())
}

fn ensure_distinct_output(report_path: &Path, input_abs: &Path) -> Result<(), CliError> {
    let report_abs = report_path
        .parent()
        .map(|parent| {
            if parent.as_os_str().is_empty() {
                fs::canonicalize(".")
            } else {
                fs::canonicalize(parent)
            }
        })
        .transpose()
        .with_context(|| format!("Failed to resolve output path: {}", report_path.display()))?;
    if let Some(report_dir) = report_abs {
        let report_target = report_dir.join(
            report_path
                .file_name()
                .ok_or_else(|| anyhow::anyhow!("Invalid report path"))?,
        );
        if report_target == input_abs {
            return Err(CliError::new(
                format!(
                    "report path must differ from input: {}",
                    report_path.display()
                ),
                Some("choose a different output path".to_string()),
            ));
        }
    }
    Ok(())
}

fn cmd_fields(prefix: Option<&str>) -> Result<(), CliError> {
    let engine = EngineBuilder::with_builtin_dissectors()
        .build()
        .map_err(|err| CliError::new(format!("engine setup failed: {err}"), None))?;
    let mut fields: Vec<_> = engine
        .catalog()
        .fields()
        .filter(|field| prefix.is_none_or(|p| field.filter.starts_with(p)))
        .collect();
    fields.sort_by(|a, b| a.filter.cmp(&b.filter));
    for field in fields {
        println!("{}\t{}\t{}", field.filter, field.name, field.ftype.as_str());
    }
    Ok(())
}

fn serialize_report(rep: &Report, pretty: bool, compact: bool) -> Result<String, CliError> {
    if pretty && compact {
        return Err(CliError::new(
            "cannot use --pretty and --compact together",
            Some("choose one output format".to_string()),
        ));
    }
    if pretty {
        serde_json::to_string_pretty(rep)
            .context("JSON serialization failed")
            .map_err(Into::into)
    } else {
        serde_json::to_string(rep)
            .context("JSON serialization failed")
            .map_err(Into::into)
    }
}

fn malformed_count(rep: &Report) -> usize {
    rep.frames.iter().filter(|frame| frame.malformed).count()
}

fn print_malformed(rep: &Report) {
    eprintln!("Malformed frames:");
    for frame in rep.frames.iter().filter(|frame| frame.malformed) {
        eprintln!("  {} {} {}", frame.number, frame.protocol, frame.info);
    }
}

fn validate_input_file(input: &Path) -> Result<(), CliError> {
    if !input.exists() {
        return Err(CliError::new(
            format!("input file not found: {}", input.display()),
            Some("use a .pcap or .pcapng file".to_string()),
        ));
    }
    let ext = input
        .extension()
        .and_then(|ext| ext.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();
    if ext != "pcap" && ext != "pcapng" {
        return Err(CliError::new(
            format!("unsupported input format '{}'", input.display()),
            Some("expected a .pcap or .pcapng file".to_string()),
        ));
    }
    Ok(())
}

fn resolve_input_path(input: &Path) -> Result<PathBuf, CliError> {
    let pattern = input.to_string_lossy();
    if !is_glob_pattern(&pattern) {
        return Ok(input.to_path_buf());
    }

    let paths = glob(&pattern).map_err(|err| {
        CliError::new(
            format!("invalid input pattern '{}'", pattern),
            Some(format!("pattern error: {}", err.msg)),
        )
    })?;
    let mut matches = Vec::new();
    for entry in paths {
        let path = entry.map_err(|err| {
            CliError::new(
                format!("invalid input pattern '{}'", pattern),
                Some(format!("pattern error: {}", err)),
            )
        })?;
        if path.is_file() {
            matches.push(path);
        }
    }

    match matches.len() {
        0 => Err(CliError::new(
            format!("no files match pattern '{}'", pattern),
            Some("check the path or quote the pattern; expected .pcap or .pcapng".to_string()),
        )),
        1 => Ok(matches.remove(0)),
        n => {
            let mut listed = matches
                .iter()
                .take(3)
                .map(|p| p.display().to_string())
                .collect::<Vec<_>>()
                .join(", ");
            if n > 3 {
                listed.push_str(", ...");
            }
            Err(CliError::new(
                format!("multiple files match pattern '{pattern}' ({n} matches); matches: {listed}"),
                Some("pass a single capture file, or run once per file".to_string()),
            ))
        }
    }
}

fn is_glob_pattern(input: &str) -> bool {
    input.contains('*') || input.contains('?') || input.contains('[')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_as_rule_parses_numeric_and_hex_keys() {
        let rule = parse_decode_as("udp.port==5000,pw_satop_udp").expect("rule");
        assert_eq!(rule.table, "udp.port");
        assert_eq!(rule.key, DissectorKey::UInt(5000));
        assert_eq!(rule.dissector, "pw_satop_udp");

        let rule = parse_decode_as("ethertype==0x8847, mpls").expect("rule");
        assert_eq!(rule.key, DissectorKey::UInt(0x8847));
        assert_eq!(rule.dissector, "mpls");
    }

    #[test]
    fn decode_as_rule_keeps_string_keys() {
        let rule = parse_decode_as("media_type==application/x-demo,data").expect("rule");
        assert_eq!(rule.key, DissectorKey::Str("application/x-demo".to_string()));
    }

    #[test]
    fn decode_as_rule_rejects_missing_parts() {
        assert!(parse_decode_as("udp.port=5000,pw_satop_udp").is_err());
        assert!(parse_decode_as("udp.port==5000").is_err());
        assert!(parse_decode_as("==5000,hdcp").is_err());
    }

    #[test]
    fn glob_detection() {
        assert!(is_glob_pattern("caps/*.pcap"));
        assert!(!is_glob_pattern("caps/one.pcap"));
    }
}
