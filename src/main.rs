use clap::Parser;
use std::io::{self, Write};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use cmd_supervisor::{
    CommandSpec, FanoutSink, FileSink, NullSink, ProcessSupervisor, SupervisorConfig, TracingSink,
    TranscriptSink,
};

/// Run a build command under an inactivity watchdog.
///
/// Example usage:
///
///     cmd-supervisor -c "./configure && make" -d /tmp/zlib-1.3 -f config.toml
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Shell command to execute (e.g., "make install").
    /// If not provided, you will be prompted.
    #[arg(short = 'c', long)]
    command: Option<String>,

    /// Working directory for the command.
    #[arg(short = 'd', long = "dir", default_value = ".")]
    dir: PathBuf,

    /// Path to the configuration file (TOML) with timeout and log settings.
    #[arg(short = 'f', long = "conf")]
    config: Option<PathBuf>,

    /// Override the inactivity timeout from the config, in seconds.
    #[arg(long)]
    timeout_secs: Option<u64>,

    /// Label used to namespace log output.
    #[arg(long, default_value = "command")]
    label: String,

    /// Extra environment variable for the command, as KEY=VALUE. Repeatable.
    #[arg(short = 'e', long = "env", value_parser = parse_env_pair)]
    env: Vec<(String, String)>,

    /// Log every captured line while the command runs.
    #[arg(long)]
    follow: bool,
}

fn parse_env_pair(raw: &str) -> Result<(String, String), String> {
    match raw.split_once('=') {
        Some((key, value)) if !key.is_empty() => Ok((key.to_string(), value.to_string())),
        _ => Err(format!("expected KEY=VALUE, got `{raw}`")),
    }
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();
}

fn prompt_for_input(prompt: &str) -> io::Result<String> {
    print!("{}", prompt);
    io::stdout().flush()?;
    let mut input = String::new();
    io::stdin().read_line(&mut input)?;
    Ok(input.trim().to_string())
}

/// Maps a return code onto a shell exit status.
///
/// `-1` means the status could not be obtained and becomes a plain failure;
/// other negative codes are `-signal` and follow the shell's `128 + signal`.
fn exit_code(return_code: i32) -> i32 {
    match return_code {
        -1 => 1,
        code if code < 0 => 128 - code,
        code => code,
    }
}

#[tokio::main]
async fn main() {
    let args = Args::parse();

    init_logging();
    info!("Starting CLI");

    let command = if let Some(cmd) = args.command {
        cmd
    } else {
        match prompt_for_input("Enter your Command - ") {
            Ok(cmd) if !cmd.is_empty() => cmd,
            _ => {
                eprintln!("No command provided; exiting.");
                std::process::exit(1);
            }
        }
    };

    let config = match &args.config {
        Some(path) => match SupervisorConfig::load(path) {
            Ok(cfg) => cfg,
            Err(e) => {
                error!(error = %e, "Error reading config file");
                std::process::exit(1);
            }
        },
        None => SupervisorConfig::default(),
    };
    debug!("Loaded config: {:#?}", config);

    let mut spec = config.apply(CommandSpec::new(command, &args.dir).with_job_label(&args.label));
    if let Some(secs) = args.timeout_secs {
        spec = spec.with_no_output_timeout(Duration::from_secs(secs));
    }
    for (key, value) in args.env {
        spec = spec.with_env(key, value);
    }

    let mut sinks = FanoutSink::default();
    if let Some(path) = &config.transcript_path {
        match FileSink::open(path) {
            Ok(sink) => sinks.push(Arc::new(sink)),
            Err(e) => {
                error!(path = %path.display(), error = %e, "Cannot open transcript file");
                std::process::exit(1);
            }
        }
    }
    if args.follow {
        sinks.push(Arc::new(TracingSink));
    }
    let sink: Arc<dyn TranscriptSink> = if sinks.is_empty() {
        Arc::new(NullSink)
    } else {
        Arc::new(sinks)
    };

    println!("Running `{}` in {}", spec.command, spec.working_dir.display());
    println!("  No-output timeout: {:?}", spec.no_output_timeout);

    let supervisor = ProcessSupervisor::new(spec)
        .with_sink(sink)
        .with_poll_interval(config.poll_interval());

    match supervisor.run().await {
        Ok(result) => {
            println!("\n--- Command Output ---");
            println!("Result: {}", result.summary());
            println!("Stdout:\n{}", result.stdout);
            println!("Stderr:\n{}", result.stderr);
            std::process::exit(exit_code(result.return_code));
        }
        Err(e) => {
            error!(error = ?e, "Error running command");
            std::process::exit(1);
        }
    }
}
