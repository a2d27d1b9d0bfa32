//! probewire: process-isolated transport for probe workers.
//!
//! Data collection runs in separate, untrusted worker processes. A
//! [`Descriptor`] names one worker and hides how it is reached behind a
//! [`Scheme`]. The only scheme today is `pipe`: spawn the worker and talk to
//! it over a socket pair on its stdin/stdout.
//!
//! ```no_run
//! use probewire::{ConnectOptions, Descriptor, ValueReader};
//! use sexp::Sexp;
//!
//! let mut desc = Descriptor::connect_uri("pipe://probe_file", &ConnectOptions::new())?;
//! desc.send_value(&Sexp::list([Sexp::from("probe"), Sexp::from("/etc/passwd")]))?;
//! let reply = ValueReader::new().read_value(&mut desc, None)?;
//! println!("{reply}");
//! desc.close()?;
//! # Ok::<(), probewire::Error>(())
//! ```

mod config;
mod descriptor;
mod error;
pub mod logging;
pub mod pipe;
mod readiness;
mod reader;
pub mod resolve;
mod scheme;
pub mod writer;

pub use config::{ConnectOptions, ReapPolicy, StderrMode};
pub use descriptor::{Descriptor, DescriptorId};
pub use error::{Error, Result};
pub use pipe::{ForkExec, PipeScheme, WorkerLauncher, WorkerSpec};
pub use reader::ValueReader;
pub use resolve::{ResolveError, ResolvedPath, Resolver};
pub use scheme::{Direction, Readiness, Scheme, SchemeId, WorkerExit, parse_uri};
pub use writer::{Encode, Json};
