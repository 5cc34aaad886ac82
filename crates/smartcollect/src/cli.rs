use std::ffi::OsStr;
use std::path::PathBuf;

use clap::Parser;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogFormat {
    Human,
    Json,
}

impl LogFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Human => "human",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for LogFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "human" => Ok(Self::Human),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid log format '{other}', expected one of: human, json"
            )),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Table,
    Json,
}

impl OutputFormat {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Table => "table",
            Self::Json => "json",
        }
    }
}

impl std::str::FromStr for OutputFormat {
    type Err = String;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "table" => Ok(Self::Table),
            "json" => Ok(Self::Json),
            other => Err(format!(
                "invalid output format '{other}', expected one of: table, json"
            )),
        }
    }
}

#[derive(Debug, Parser)]
#[command(
    author,
    version,
    about = "Select the pytest tests affected by recent changes"
)]
pub struct Cli {
    #[arg(long, default_value = ".", help = "Project root inside a git repository")]
    pub workspace: PathBuf,

    #[arg(
        long,
        value_parser = parse_commit_range,
        conflicts_with = "branch",
        help = "Compare HEAD against HEAD~N"
    )]
    pub commit_range: Option<u32>,

    #[arg(long, help = "Compare HEAD against its merge base with this branch")]
    pub branch: Option<String>,

    #[arg(
        long = "ignore-source",
        value_name = "PATTERN",
        help = "Path prefix or glob whose changes are ignored; repeatable"
    )]
    pub ignore_sources: Vec<String>,

    #[arg(long, help = "Downgrade unresolvable imports to warnings")]
    pub warn_unresolved_imports: bool,

    #[arg(long, help = "Downgrade imports of removed modules to warnings")]
    pub warn_dangling_references: bool,

    #[arg(long, help = "Treat every project file as newly added")]
    pub all_files: bool,

    #[arg(long, value_name = "FILE", help = "Write the decision log as delimited text")]
    pub report: Option<PathBuf>,

    #[arg(
        long,
        default_value = "table",
        value_parser = parse_output_format,
        help = "Output format: table or json"
    )]
    pub output: OutputFormat,

    #[arg(
        long,
        default_value = "human",
        value_parser = parse_log_format,
        help = "Log format: human or json"
    )]
    pub log_format: LogFormat,
}

pub fn parse_cli() -> Cli {
    let mut args: Vec<_> = std::env::args_os().collect();
    if args.get(1).is_some_and(|arg| arg == OsStr::new("--")) {
        args.remove(1);
    }

    Cli::parse_from(args)
}

fn parse_commit_range(value: &str) -> Result<u32, String> {
    match value.trim().parse::<u32>() {
        Ok(0) => Err("commit range must be at least 1".to_owned()),
        Ok(count) => Ok(count),
        Err(err) => Err(format!("invalid commit range '{value}': {err}")),
    }
}

fn parse_output_format(value: &str) -> Result<OutputFormat, String> {
    value.parse()
}

fn parse_log_format(value: &str) -> Result<LogFormat, String> {
    value.parse()
}
