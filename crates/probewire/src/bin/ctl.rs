use std::process::{self, ExitCode};
use std::time::Duration;

use anyhow::Context;
use probewire::{ConnectOptions, Descriptor, ReapPolicy, StderrMode, ValueReader};
use sexp::Sexp;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, PartialEq)]
struct Args {
    uri: String,
    messages: Vec<String>,
    grace: Option<Duration>,
    timeout: Duration,
    keep_stderr: bool,
}

fn main() -> ExitCode {
    let argv: Vec<String> = std::env::args().collect();

    let args = match parse_args(&argv) {
        Ok(v) => v,
        Err(msg) => {
            if !msg.is_empty() {
                eprintln!("error: {msg}");
                eprintln!();
            }
            eprintln!(
                "Usage: probewire-ctl [--grace <ms>] [--timeout <s>] [--keep-stderr] <uri> [<arg>...]"
            );
            eprintln!();
            eprintln!("Arguments:");
            eprintln!("  <uri>              Worker to start, e.g. pipe://probewire-echo");
            eprintln!("  <arg>...           Sent one at a time as a one-element list");
            eprintln!();
            eprintln!("Options:");
            eprintln!("  --grace <ms>       Wait this long for the worker to exit, then kill it");
            eprintln!("  --timeout <s>      Per-reply timeout in seconds, above 0 [default: 30]");
            eprintln!("  --keep-stderr      Let the worker write to this terminal's stderr");
            process::exit(2);
        }
    };

    probewire::logging::init_tracing();

    match run(&args) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn parse_args(argv: &[String]) -> Result<Args, String> {
    let mut uri: Option<String> = None;
    let mut messages = Vec::new();
    let mut grace = None;
    let mut timeout = DEFAULT_TIMEOUT;
    let mut keep_stderr = false;

    let mut i = 1; // skip argv[0]
    while i < argv.len() {
        match argv[i].as_str() {
            "--grace" if uri.is_none() => {
                i += 1;
                let ms = argv.get(i).ok_or("--grace requires a value")?;
                let ms: u64 = ms
                    .parse()
                    .map_err(|_| format!("invalid --grace value: {ms}"))?;
                grace = Some(Duration::from_millis(ms));
            }
            "--timeout" if uri.is_none() => {
                i += 1;
                let secs = argv.get(i).ok_or("--timeout requires a value")?;
                timeout = secs
                    .parse::<f64>()
                    .ok()
                    .and_then(|s| Duration::try_from_secs_f64(s).ok())
                    // Zero would mean no deadline at all
                    .filter(|t| !t.is_zero())
                    .ok_or_else(|| format!("invalid --timeout value: {secs}"))?;
            }
            "--keep-stderr" if uri.is_none() => keep_stderr = true,
            "--help" | "-h" if uri.is_none() => return Err(String::new()),
            arg if uri.is_none() && arg.starts_with('-') => {
                return Err(format!("unknown flag: {arg}"));
            }
            arg if uri.is_none() => uri = Some(arg.to_string()),
            arg => messages.push(arg.to_string()),
        }
        i += 1;
    }

    let uri = uri.ok_or("missing required argument: <uri>")?;
    Ok(Args {
        uri,
        messages,
        grace,
        timeout,
        keep_stderr,
    })
}

fn run(args: &Args) -> anyhow::Result<ExitCode> {
    let stderr = if args.keep_stderr {
        StderrMode::Inherit
    } else {
        StderrMode::Discard
    };
    let reap_policy = args.grace.map_or(ReapPolicy::NonBlocking, ReapPolicy::Grace);
    let opts = ConnectOptions::new()
        .with_stderr(stderr)
        .with_reap_policy(reap_policy)
        .with_verify_exec(true);

    let mut desc = Descriptor::connect_uri(&args.uri, &opts)
        .with_context(|| format!("connecting to {}", args.uri))?;
    let mut reader = ValueReader::new();

    for message in &args.messages {
        let request = Sexp::list([Sexp::from(message.as_str())]);
        desc.send_value(&request)
            .with_context(|| format!("sending {request}"))?;
        let reply = reader
            .read_value(&mut desc, Some(args.timeout))
            .with_context(|| format!("waiting for reply to {request}"))?;
        println!("{reply}");
    }

    let exit = desc.close().context("closing worker")?;
    eprintln!("worker {exit}");
    Ok(if exit.success() {
        ExitCode::SUCCESS
    } else {
        ExitCode::FAILURE
    })
}
