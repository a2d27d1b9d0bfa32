//! Minimal worker: writes every value it reads back unchanged.
//!
//! Exit status: 0 on EOF or `(exit)`, 2 on malformed input, 1 on I/O failure.

use std::io::{self, Read, Write};
use std::process::ExitCode;

use anyhow::Context;
use sexp::{Decoder, Sexp};

const EXIT_MALFORMED: u8 = 2;

fn main() -> ExitCode {
    probewire::logging::init_tracing();

    match run() {
        Ok(code) => code,
        Err(e) => {
            tracing::error!(error = ?e, "Echo worker failed");
            ExitCode::FAILURE
        }
    }
}

fn is_exit(value: &Sexp) -> bool {
    matches!(value.as_list(), Some([only]) if only.as_bytes() == Some(&b"exit"[..]))
}

fn run() -> anyhow::Result<ExitCode> {
    let decoder = Decoder::new();
    let mut stdin = io::stdin().lock();
    let mut stdout = io::stdout().lock();
    let mut buf = Vec::new();
    let mut chunk = [0u8; 4096];

    loop {
        loop {
            let (value, used) = match decoder.decode(&buf) {
                Ok(Some(decoded)) => decoded,
                Ok(None) => break,
                Err(e) => {
                    tracing::error!(error = %e, "Malformed input");
                    return Ok(ExitCode::from(EXIT_MALFORMED));
                }
            };
            buf.drain(..used);

            if is_exit(&value) {
                tracing::debug!("Exit requested");
                return Ok(ExitCode::SUCCESS);
            }
            tracing::debug!(%value, "Echoing value");
            stdout
                .write_all(&value.to_canonical()?)
                .and_then(|()| stdout.flush())
                .context("writing to stdout")?;
        }

        let n = stdin.read(&mut chunk).context("reading stdin")?;
        if n == 0 {
            if !buf.is_empty() {
                tracing::error!(buffered = buf.len(), "Input ended mid-value");
                return Ok(ExitCode::from(EXIT_MALFORMED));
            }
            return Ok(ExitCode::SUCCESS);
        }
        buf.extend_from_slice(&chunk[..n]);
    }
}
