use std::process::ExitCode;

use smartcollect::cli::{LogFormat, parse_cli};
use smartcollect::run::run;
use tracing_subscriber::EnvFilter;

fn main() -> ExitCode {
    let cli = parse_cli();
    init_tracing(cli.log_format);

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => {
            tracing::error!(error = %format!("{err:#}"), "selection failed");
            eprintln!("smartcollect: {err:#}");
            ExitCode::FAILURE
        }
    }
}

fn init_tracing(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_target(false);

    let result = match format {
        LogFormat::Human => builder.compact().try_init(),
        LogFormat::Json => builder.json().try_init(),
    };
    if let Err(err) = result {
        eprintln!("smartcollect: failed to install log subscriber: {err}");
    }
}
