use anyhow::{Context, Result};
use clap::{Parser, Subcommand, ValueEnum};
use colored::*;
use sheetreport::{BandSpec, BandTree, FormatterConfig, OutputType, ReportFormatter, ReportTemplate};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{Level, debug};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "sheetreport")]
#[command(about = "Render band data into XLSX report templates", long_about = None)]
#[command(version)]
struct Cli {
    /// Increase log verbosity (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Render a template with band data read from JSON
    Render {
        /// Path to the XLSX template
        #[arg(value_name = "TEMPLATE")]
        template: PathBuf,

        /// Band tree as JSON: {"data": {...}, "bands": [{"name": ..., "data": ..., "bands": [...]}]}
        #[arg(short, long, value_name = "JSON")]
        data: PathBuf,

        /// Output file
        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,

        /// Output format; guessed from the output extension when omitted
        #[arg(short, long, value_enum)]
        format: Option<Format>,

        /// Path to configuration file (TOML)
        #[arg(short, long, value_name = "CONFIG")]
        config: Option<PathBuf>,

        /// Document name reported in errors (defaults to the template file name)
        #[arg(long, value_name = "DOC")]
        name: Option<String>,
    },
}

#[derive(Clone, Copy, ValueEnum)]
enum Format {
    Xlsx,
    Csv,
}

impl From<Format> for OutputType {
    fn from(format: Format) -> Self {
        match format {
            Format::Xlsx => OutputType::Xlsx,
            Format::Csv => OutputType::Csv,
        }
    }
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match cli.command {
        Command::Render {
            template,
            data,
            output,
            format,
            config,
            name,
        } => render(&template, &data, &output, format, config.as_deref(), name),
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => Level::WARN,
        1 => Level::DEBUG,
        _ => Level::TRACE,
    };
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive(level.into()))
        .with_writer(std::io::stderr)
        .init();
}

fn render(
    template_path: &Path,
    data_path: &Path,
    output_path: &Path,
    format: Option<Format>,
    config_path: Option<&Path>,
    name: Option<String>,
) -> Result<()> {
    let config = match config_path {
        Some(path) => FormatterConfig::from_file(path)
            .with_context(|| format!("Failed to load config from {}", path.display()))?,
        None => {
            // Try to load default config from current directory if it exists
            let default_config_path = PathBuf::from("sheetreport.toml");
            if default_config_path.exists() {
                FormatterConfig::from_file(&default_config_path).with_context(|| {
                    format!("Failed to load config from {}", default_config_path.display())
                })?
            } else {
                FormatterConfig::default()
            }
        }
    };

    let json = fs::read_to_string(data_path)
        .with_context(|| format!("Failed to read band data: {}", data_path.display()))?;
    let spec: BandSpec = serde_json::from_str(&json)
        .with_context(|| format!("Invalid band data in {}", data_path.display()))?;
    let tree = BandTree::from_spec(&spec);
    debug!(bands = tree.len(), "loaded band tree");

    let content = fs::read(template_path)
        .with_context(|| format!("Failed to read template: {}", template_path.display()))?;
    let document_name = name.unwrap_or_else(|| {
        template_path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| template_path.display().to_string())
    });
    let output = match format {
        Some(format) => format.into(),
        None => output_path
            .extension()
            .and_then(|e| e.to_str())
            .and_then(|e| e.parse().ok())
            .unwrap_or_default(),
    };

    println!("Rendering '{}'...", document_name);
    let formatter = ReportFormatter::with_config(config);
    let template = ReportTemplate::new(document_name.as_str(), output, content);
    let bytes = match formatter.render(&template, &tree) {
        Ok(bytes) => bytes,
        Err(err) => {
            eprintln!("{} {}", "Error:".red().bold(), err);
            return Err(err).context("Failed to render report");
        }
    };

    fs::write(output_path, &bytes)
        .with_context(|| format!("Failed to write output: {}", output_path.display()))?;
    println!("{}", "✓ Report rendered".green().bold());
    println!("Output: {} ({} bytes)", output_path.display(), bytes.len());
    Ok(())
}
