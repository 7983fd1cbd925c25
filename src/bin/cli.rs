use std::path::{Path, PathBuf};

use anyhow::{anyhow, bail, Context, Result};
use bpa::prelude::*;
use bpa::reader::{detect_delimiter, read_headers, read_input_file};
use clap::{ArgAction, Args, Parser, Subcommand, ValueEnum};
use tracing::warn;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "bpacli", version)]
#[command(about = "BPA CLI - Turn procedure sheets into BPA-C and BPA-I export files", long_about = None)]
struct Cli {
    /// Raise the log level (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Map a sheet and write the BPA file
    Generate(GenerateArgs),
    /// Show how a sheet would be read
    Inspect(InspectArgs),
    /// Create or print the configuration file
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Args)]
struct GenerateArgs {
    /// Delimited text file with one procedure per line
    #[arg(short, long)]
    input: PathBuf,
    /// Output layout
    #[arg(short, long, value_enum)]
    mode: Option<ModeOpt>,
    /// Output file (default: BPA_{competency}_{acronym}.txt in the output dir)
    #[arg(short, long)]
    output: Option<PathBuf>,
    /// Configuration file (default: the user config file, if any)
    #[arg(short, long)]
    config: Option<PathBuf>,
    /// Competency of the file, AAAAMM
    #[arg(long)]
    competency: Option<String>,
    /// The first line is data, not column names
    #[arg(long)]
    no_header_row: bool,
    /// Keep duplicate consolidated rows apart
    #[arg(long)]
    no_consolidate: bool,
    /// Professional name to CNS sheet
    #[arg(long)]
    professionals: Option<PathBuf>,
    /// Patient name to address sheet
    #[arg(long)]
    patients: Option<PathBuf>,
    /// Point a field at a column, e.g. --map procedure=3 (repeatable).
    /// Other fields keep their configured or detected columns.
    #[arg(long = "map", value_name = "FIELD=INDEX", value_parser = parse_assignment)]
    map: Vec<(Field, usize)>,
    /// Refuse to write when the header has problems
    #[arg(long)]
    strict: bool,
    /// Print the generation summary as JSON
    #[arg(long)]
    json: bool,
}

#[derive(Args)]
struct InspectArgs {
    /// Delimited text file to inspect
    #[arg(short, long)]
    input: PathBuf,
    /// Number of mapped records to show
    #[arg(long, default_value_t = 5)]
    rows: usize,
    /// Layout the records are mapped for
    #[arg(short, long, value_enum)]
    mode: Option<ModeOpt>,
    /// The first line is data, not column names
    #[arg(long)]
    no_header_row: bool,
    /// Configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Write a configuration file with the default values
    Init {
        /// Where to write it (default: the user config file)
        #[arg(long)]
        path: Option<PathBuf>,
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
    /// Print the effective configuration
    Show {
        #[arg(long)]
        path: Option<PathBuf>,
    },
}

#[derive(Copy, Clone, PartialEq, Eq, ValueEnum)]
enum ModeOpt {
    /// BPA-C, consolidated
    C,
    /// BPA-I, individualized
    I,
}

impl From<ModeOpt> for BpaMode {
    fn from(mode: ModeOpt) -> Self {
        match mode {
            ModeOpt::C => BpaMode::Consolidated,
            ModeOpt::I => BpaMode::Individualized,
        }
    }
}

fn parse_assignment(value: &str) -> std::result::Result<(Field, usize), String> {
    let (field, index) = value
        .split_once('=')
        .ok_or_else(|| format!("expected FIELD=INDEX, got '{}'", value))?;
    let field: Field = field.parse().map_err(|e: BpaError| e.to_string())?;
    let index: usize = index
        .trim()
        .parse()
        .map_err(|_| format!("'{}' is not a column index", index.trim()))?;
    Ok((field, index))
}

fn init_tracing(verbose: u8) {
    let filter = match verbose {
        0 => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")),
        1 => EnvFilter::new("warn,bpa=info,bpacli=info"),
        2 => EnvFilter::new("warn,bpa=debug,bpacli=debug"),
        _ => EnvFilter::new("trace"),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let result = match cli.command {
        Commands::Generate(args) => cmd_generate(args),
        Commands::Inspect(args) => cmd_inspect(args),
        Commands::Config(command) => cmd_config(command),
    };

    if let Err(e) = result {
        eprintln!("Error: {:#}", e);
        std::process::exit(1);
    }
}

/// Library errors carry their own suggestions
fn report(err: BpaError) -> anyhow::Error {
    anyhow!(err.user_message())
}

fn load_config(path: Option<&Path>, mode: Option<ModeOpt>, no_header_row: bool) -> Result<BpaConfig> {
    let mut config = BpaConfig::load(path).map_err(report)?;
    if let Some(mode) = mode {
        config.mode = mode.into();
    }
    if no_header_row {
        config.has_header_row = false;
    }
    Ok(config)
}

fn cmd_generate(args: GenerateArgs) -> Result<()> {
    let mut config = load_config(args.config.as_deref(), args.mode, args.no_header_row)?;
    if let Some(competency) = args.competency {
        config.header.competency = competency;
    }
    if args.no_consolidate {
        config.consolidate = false;
    }

    if let Err(e) = config.header.validate() {
        if args.strict {
            return Err(report(e));
        }
        warn!("{}", e.user_message());
    }

    let mut builder = BpaBatchBuilder::from_config(&config).input_file(&args.input);
    for (field, index) in &args.map {
        builder = builder.override_column(*field, *index);
    }
    if let Some(path) = &args.professionals {
        builder = builder.professionals_file(path);
    }
    if let Some(path) = &args.patients {
        builder = builder.patients_file(path);
    }
    #[cfg(feature = "progress")]
    {
        builder = builder.show_progress(true);
    }

    let batch = builder.build().map_err(report)?;
    let document = batch.generate();

    let output = match args.output {
        Some(path) => path,
        None => config
            .output_dir
            .clone()
            .unwrap_or_else(|| PathBuf::from("."))
            .join(document.default_file_name()),
    };
    document.write_to(&output).map_err(report)?;

    if args.json {
        println!("{}", document.summary_json().map_err(report)?);
        return Ok(());
    }

    let mapped = batch.report();
    println!("Wrote {}", output.display());
    println!("  Layout: {}", document.mode);
    println!("  Competency: {}", document.competency);
    println!("  Lines read: {} ({} dropped)", mapped.lines_read, mapped.dropped());
    println!("  Detail records: {}", document.detail_count);
    println!("  Sheets: {}", document.total_sheets);
    println!("  Control field: {}", document.checksum);
    if document.excluded.total() > 0 {
        println!(
            "  Excluded at generation: {} other competency, {} forbidden procedure, {} incomplete",
            document.excluded.other_competency, document.excluded.forbidden_procedure, document.excluded.invalid
        );
    }
    Ok(())
}

fn cmd_inspect(args: InspectArgs) -> Result<()> {
    let config = load_config(args.config.as_deref(), args.mode, args.no_header_row)?;
    let text = read_input_file(&args.input).map_err(report)?;

    let first_line = text.lines().find(|line| !line.trim().is_empty()).unwrap_or("");
    let delimiter = match detect_delimiter(first_line) {
        b'\t' => "tab",
        b';' => "semicolon",
        _ => "comma",
    };
    println!("Delimiter: {}", delimiter);

    let headers = read_headers(&text, config.has_header_row);
    println!("Columns:");
    for (index, header) in headers.iter().enumerate() {
        println!("  {:>3}  {}", index, header);
    }

    let mapping = config.column_mapping(&headers);
    println!("Mapping:");
    for (field, index) in mapping.columns() {
        let label = headers.get(index).map(String::as_str).unwrap_or("?");
        println!("  {:<18} <- {} ({})", field.key(), index, label);
    }

    let rows = RowMapper::new(config.mode, mapping)
        .with_header_row(config.has_header_row)
        .map(&text);
    let shown = rows.records.len().min(args.rows);
    println!("Records ({} of {}):", shown, rows.records.len());
    println!(
        "{}",
        serde_json::to_string_pretty(&rows.records[..shown]).context("cannot render records")?
    );
    println!("Report:");
    println!("{}", serde_json::to_string_pretty(&rows.report).context("cannot render report")?);
    Ok(())
}

fn cmd_config(command: ConfigCommand) -> Result<()> {
    match command {
        ConfigCommand::Init { path, force } => {
            let path = match path {
                Some(path) => path,
                None => BpaConfig::default_config_path().context("no home directory to keep the config in")?,
            };
            if path.exists() && !force {
                bail!("{} already exists, pass --force to overwrite it", path.display());
            }
            BpaConfig::default().save(&path).map_err(report)?;
            println!("Wrote {}", path.display());
        }
        ConfigCommand::Show { path } => {
            let config = BpaConfig::load(path.as_deref()).map_err(report)?;
            let source = path.or_else(BpaConfig::default_config_path);
            if let Some(source) = source {
                println!("# {}", source.display());
            }
            print!("{}", config.to_toml().map_err(report)?);
        }
    }
    Ok(())
}
