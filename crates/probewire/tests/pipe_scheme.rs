//! End-to-end tests against real worker processes.

use std::fs;
use std::os::unix::fs::PermissionsExt;
use std::path::{Path, PathBuf};
use std::sync::{PoisonError, RwLock};
use std::time::{Duration, Instant};

use nix::errno::Errno;
use nix::sys::signal::{Signal, kill};
use nix::sys::wait::{Id, WaitPidFlag, waitid, waitpid};
use probewire::{
    ConnectOptions, Descriptor, Direction, Error, Json, PipeScheme, Readiness, ReapPolicy, Scheme,
    SchemeId, StderrMode, ValueReader, WorkerExit,
};
use sexp::Sexp;
use tempfile::TempDir;

const ECHO: &str = env!("CARGO_BIN_EXE_probewire-echo");
const TIMEOUT: Option<Duration> = Some(Duration::from_secs(10));

fn opts() -> ConnectOptions {
    ConnectOptions::new()
        .with_stderr(StderrMode::Discard)
        .with_reap_policy(ReapPolicy::Grace(Duration::from_secs(10)))
}

fn echo() -> Descriptor {
    spawn(|| Descriptor::connect_uri(&format!("pipe://{ECHO}"), &opts())).unwrap()
}

/// Write lock while an executable is open for writing, read lock around
/// every fork. A child forked mid-write would hold the write descriptor
/// until its own exec and make ours fail with `ETXTBSY`.
static EXECUTABLES: RwLock<()> = RwLock::new(());

fn spawn<T>(connect: impl FnOnce() -> T) -> T {
    let _forking = EXECUTABLES.read().unwrap_or_else(PoisonError::into_inner);
    connect()
}

fn write_executable(path: &Path, contents: &[u8]) {
    let _writing = EXECUTABLES.write().unwrap_or_else(PoisonError::into_inner);
    fs::write(path, contents).unwrap();
    fs::set_permissions(path, fs::Permissions::from_mode(0o755)).unwrap();
}

fn script(dir: &Path, name: &str, body: &str) -> PathBuf {
    let path = dir.join(name);
    write_executable(&path, format!("#!/bin/sh\n{body}\n").as_bytes());
    path
}

#[test]
fn raw_bytes_through_cat() {
    let mut desc = Descriptor::new(SchemeId::Pipe);
    spawn(|| desc.connect("/bin/cat", &opts())).unwrap();

    assert_eq!(desc.send(b"ping").unwrap(), 4);
    assert_eq!(
        desc.poll_ready(Direction::Read, Some(Duration::from_secs(2)))
            .unwrap(),
        Readiness::Ready
    );
    let mut got = Vec::new();
    while got.len() < 4 {
        let mut buf = [0u8; 4];
        let n = desc.recv(&mut buf[..4 - got.len()]).unwrap();
        assert_ne!(n, 0, "cat closed early");
        got.extend_from_slice(&buf[..n]);
    }
    assert_eq!(got, b"ping");

    // Closing the channel is cat's signal to exit
    assert_eq!(desc.close().unwrap(), WorkerExit::Exited(0));
}

#[test]
fn read_poll_times_out_within_margin() {
    let dir = TempDir::new().unwrap();
    let silent = script(dir.path(), "probe_silent", "exec cat >/dev/null");
    let mut desc = spawn(|| {
        Descriptor::connect_uri(&format!("pipe://{}", silent.display()), &opts())
    })
    .unwrap();

    let started = Instant::now();
    let r = desc
        .poll_ready(Direction::Read, Some(Duration::from_secs(1)))
        .unwrap();
    let elapsed = started.elapsed();
    assert_eq!(r, Readiness::TimedOut);
    assert!(elapsed >= Duration::from_secs(1), "{elapsed:?}");
    assert!(elapsed < Duration::from_millis(1500), "{elapsed:?}");
    assert_eq!(desc.close().unwrap(), WorkerExit::Exited(0));
}

#[test]
fn echo_round_trip() {
    let mut desc = echo();
    assert!(desc.is_open());
    assert_eq!(desc.scheme(), SchemeId::Pipe);

    let ping = Sexp::list([Sexp::from("ping")]);
    let sent = desc.send_value(&ping).unwrap();
    assert_eq!(sent, b"(4:ping)".len());

    assert_eq!(
        desc.poll_ready(Direction::Read, TIMEOUT).unwrap(),
        Readiness::Ready
    );
    let mut reader = ValueReader::new();
    assert_eq!(reader.read_value(&mut desc, TIMEOUT).unwrap(), ping);

    assert_eq!(desc.close().unwrap(), WorkerExit::Exited(0));
    assert!(!desc.is_open());
    assert!(matches!(desc.close(), Err(Error::NotConnected)));
    assert!(matches!(desc.send(b"x"), Err(Error::NotConnected)));
}

#[test]
fn many_values_keep_order() {
    let mut desc = echo();
    let values: Vec<Sexp> = (0..50i64)
        .map(|i| Sexp::list([Sexp::from("seq"), Sexp::from(i), Sexp::from(i as f64 / 4.0)]))
        .collect();
    for v in &values {
        desc.send_value(v).unwrap();
    }
    let mut reader = ValueReader::new();
    for v in &values {
        assert_eq!(&reader.read_value(&mut desc, TIMEOUT).unwrap(), v);
    }
    assert_eq!(desc.close().unwrap(), WorkerExit::Exited(0));
}

#[test]
fn exit_message_stops_worker() {
    let mut desc = echo();
    desc.send_value(&Sexp::list([Sexp::from("exit")])).unwrap();
    let err = ValueReader::new().read_value(&mut desc, TIMEOUT).unwrap_err();
    assert!(matches!(err, Error::Closed));
    assert_eq!(desc.close().unwrap(), WorkerExit::Exited(0));
}

#[test]
fn malformed_input_exits_with_status_2() {
    let mut desc = echo();
    desc.send(b")").unwrap();
    let err = ValueReader::new().read_value(&mut desc, TIMEOUT).unwrap_err();
    assert!(matches!(err, Error::Closed));
    assert_eq!(desc.close().unwrap(), WorkerExit::Exited(2));
}

#[test]
fn encode_failure_sends_nothing() {
    let mut desc = echo();
    let bad = Sexp::list([Sexp::from("ratio"), Sexp::from(f64::NAN)]);
    assert!(matches!(desc.send_value(&bad), Err(Error::Encode(_))));

    // The worker would reject any stray prefix; it must see exactly this
    let ping = Sexp::list([Sexp::from("ping")]);
    desc.send_value(&ping).unwrap();
    assert_eq!(
        ValueReader::new().read_value(&mut desc, TIMEOUT).unwrap(),
        ping
    );
    assert_eq!(desc.close().unwrap(), WorkerExit::Exited(0));
}

#[test]
fn json_values_are_newline_framed() {
    let mut desc = spawn(|| Descriptor::connect_uri("pipe:///bin/cat", &opts())).unwrap();
    let msg = serde_json::json!({"probe": "file", "paths": ["/etc/passwd"]});
    let sent = desc.send_value(&Json(&msg)).unwrap();

    let mut got = Vec::new();
    let mut buf = [0u8; 256];
    while !got.ends_with(b"\n") {
        assert_eq!(desc.poll_ready(Direction::Read, TIMEOUT).unwrap(), Readiness::Ready);
        let n = desc.recv(&mut buf).unwrap();
        assert_ne!(n, 0, "cat closed early");
        got.extend_from_slice(&buf[..n]);
    }
    assert_eq!(got.len(), sent);
    let back: serde_json::Value = serde_json::from_slice(&got).unwrap();
    assert_eq!(back, msg);
    assert_eq!(desc.close().unwrap(), WorkerExit::Exited(0));
}

#[test]
fn read_times_out_when_worker_is_silent() {
    let dir = TempDir::new().unwrap();
    let silent = script(dir.path(), "probe_silent", "exec cat >/dev/null");
    let mut desc = spawn(|| {
        Descriptor::connect_uri(&format!("pipe://{}", silent.display()), &opts())
    })
    .unwrap();

    assert_eq!(
        desc.poll_ready(Direction::Read, Some(Duration::from_millis(50)))
            .unwrap(),
        Readiness::TimedOut
    );
    assert_eq!(
        desc.poll_ready(Direction::Write, TIMEOUT).unwrap(),
        Readiness::Ready
    );
    let err = ValueReader::new()
        .read_value(&mut desc, Some(Duration::from_millis(50)))
        .unwrap_err();
    assert!(err.is_timeout());
    assert_eq!(desc.close().unwrap(), WorkerExit::Exited(0));
}

#[test]
fn relative_identifier_uses_configured_search_path() {
    let dir = TempDir::new().unwrap();
    script(dir.path(), "probe_hello", "printf '5:hello'");
    let opts = opts().with_search_path(dir.path().as_os_str());

    let mut desc = Descriptor::new(SchemeId::Pipe);
    spawn(|| desc.connect("probe_hello", &opts)).unwrap();
    let reply = ValueReader::new().read_value(&mut desc, TIMEOUT).unwrap();
    assert_eq!(reply.as_str(), Some("hello"));
    assert_eq!(desc.close().unwrap(), WorkerExit::Exited(0));
}

#[test]
fn non_blocking_close_reports_exit_code() {
    let dir = TempDir::new().unwrap();
    let quitter = script(dir.path(), "probe_quitter", "exit 3");
    let opts = ConnectOptions::new().with_stderr(StderrMode::Discard);

    let mut scheme = PipeScheme::new();
    spawn(|| scheme.connect(quitter.to_str().unwrap(), &opts)).unwrap();
    let pid = scheme.pid().unwrap();

    // Block until it has exited, leaving it for close to reap
    waitid(Id::Pid(pid), WaitPidFlag::WEXITED | WaitPidFlag::WNOWAIT).unwrap();
    assert_eq!(scheme.close().unwrap(), WorkerExit::Exited(3));

    assert!(matches!(scheme.send(b"x"), Err(Error::NotConnected)));
    assert!(matches!(
        scheme.send_value(&Sexp::from(f64::NAN)),
        Err(Error::NotConnected)
    ));
    assert!(matches!(
        scheme.connect(quitter.to_str().unwrap(), &opts),
        Err(Error::NotConnected)
    ));
    assert!(matches!(scheme.recv(&mut [0; 1]), Err(Error::NotConnected)));
    assert!(matches!(
        scheme.poll_ready(Direction::Read, None),
        Err(Error::NotConnected)
    ));
    assert!(matches!(scheme.close(), Err(Error::NotConnected)));
}

#[test]
fn still_running_worker_is_reported() {
    let dir = TempDir::new().unwrap();
    let stubborn = script(dir.path(), "probe_stubborn", "exec sleep 30");
    let opts = ConnectOptions::new().with_stderr(StderrMode::Discard);

    let mut desc = spawn(|| {
        Descriptor::connect_uri(&format!("pipe://{}", stubborn.display()), &opts)
    })
    .unwrap();
    let exit = desc.close().unwrap();
    let WorkerExit::StillRunning { pid } = exit else {
        panic!("expected a running worker, got {exit:?}");
    };
    assert!(!desc.is_open());

    kill(pid, Signal::SIGKILL).unwrap();
    waitpid(pid, None).unwrap();
}

#[test]
fn grace_period_kills_stubborn_worker() {
    let dir = TempDir::new().unwrap();
    let stubborn = script(dir.path(), "probe_stubborn", "exec sleep 30");
    let opts = opts().with_reap_policy(ReapPolicy::Grace(Duration::from_millis(100)));

    let mut desc = spawn(|| {
        Descriptor::connect_uri(&format!("pipe://{}", stubborn.display()), &opts)
    })
    .unwrap();
    assert_eq!(desc.close().unwrap(), WorkerExit::Signaled(Signal::SIGKILL));
}

#[test]
fn exec_failure_is_reported() {
    let dir = TempDir::new().unwrap();
    let bogus = dir.path().join("probe_bogus");
    write_executable(&bogus, b"not a program\n");
    let uri = format!("pipe://{}", bogus.display());

    let err =
        spawn(|| Descriptor::connect_uri(&uri, &opts().with_verify_exec(true))).unwrap_err();
    assert!(matches!(err, Error::ChildExecFailed(Errno::ENOEXEC)), "{err:?}");

    // Unverified, the failure shows up as the exit status
    let mut desc = spawn(|| Descriptor::connect_uri(&uri, &opts())).unwrap();
    assert_eq!(
        desc.close().unwrap(),
        WorkerExit::Exited(Errno::ENOEXEC as i32)
    );
}

#[test]
fn missing_worker_is_not_found() {
    let opts = opts().with_search_path("/nonexistent-probe-dir");
    let err = Descriptor::connect_uri("pipe://probe_missing", &opts).unwrap_err();
    assert!(matches!(err, Error::NotFound(_)));
    let err = Descriptor::connect_uri("pipe://", &opts).unwrap_err();
    assert!(matches!(err, Error::InvalidIdentifier(_)));
}

#[test]
fn dropping_open_scheme_reaps_worker() {
    let mut scheme = PipeScheme::new();
    spawn(|| scheme.connect(ECHO, &opts())).unwrap();
    let pid = scheme.pid().unwrap();
    assert!(scheme.channel().is_some());
    drop(scheme);

    // Already reaped by drop
    assert_eq!(
        waitpid(pid, Some(WaitPidFlag::WNOHANG)),
        Err(Errno::ECHILD)
    );
}

#[test]
fn send_after_worker_exit_is_epipe() {
    let mut desc = echo();
    desc.send_value(&Sexp::list([Sexp::from("exit")])).unwrap();
    assert!(matches!(
        ValueReader::new().read_value(&mut desc, TIMEOUT),
        Err(Error::Closed)
    ));

    // No SIGPIPE: the error comes back as a value
    let err = (0..50)
        .find_map(|_| {
            let err = desc.send(b"(4:ping)").err();
            if err.is_none() {
                std::thread::sleep(Duration::from_millis(20));
            }
            err
        })
        .expect("send to an exited worker should fail");
    assert_eq!(err.raw_os_error(), Some(Errno::EPIPE as i32));
    assert_eq!(desc.close().unwrap(), WorkerExit::Exited(0));
}
