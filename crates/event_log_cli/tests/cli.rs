use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::process::{Command, Output, Stdio};

const LOG: &str = concat!(
    "PROTOCOL,\"a1\",0,\"Module\",null,\"0\",0,0,null,0.0,\"TFSPv2.1\"\n",
    "VERSION,\"a1v\",1,\"Module\",null,\"0\",0,0,null,0.0,\"2.1.0\"\n",
    "TEST,\"a2\",1,\"Module\",null,\"0\",0,0,null,0.0,\"/m\"\n",
    "TEST,\"b1\",0,\"Test\",null,\"0/1\",0,0,null,0.0,\"/m/a\"\n",
    "RESULT,\"b2\",1,\"Test\",null,\"0/1\",0,0,null,0.2,\"Fail\",\"boom\",null,\"/m/a\"\n",
    "TEST,\"c1\",0,\"Test\",null,\"0/2\",4,0,null,0.0,\"/m/b\"\n",
    "RESULT,\"c2\",1,\"Test\",null,\"0/2\",4,0,null,0.0,\"Skip\",null,null,\"/m/b\"\n",
    "RESULT,\"a3\",2,\"Module\",null,\"0\",0,0,null,1.5,\"Fail\",null,null,\"/m\"\n",
    "STOP,\"a4\",3,\"Module\",null,\"0\",0,0,null,1.5\n",
);

fn evlog() -> Command {
    let mut command = Command::new(PathBuf::from(env!("CARGO_BIN_EXE_evlog")));
    command.env_remove("EVLOG_SHOW_SKIPPED").env_remove("RUST_LOG");
    command
}

fn write_log(dir: &Path) -> PathBuf {
    let path = dir.join("run.log");
    fs::write(&path, LOG).expect("write log");
    path
}

fn stdout(output: &Output) -> String {
    assert!(
        output.status.success(),
        "evlog failed: {}",
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8(output.stdout.clone()).expect("utf8 stdout")
}

#[test]
fn short_transform_renders_tree_and_reports() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = write_log(dir.path());
    let output = evlog()
        .args(["transform", "short"])
        .arg(&log)
        .output()
        .expect("spawn evlog");
    let text = stdout(&output);
    assert!(
        text.starts_with("Module m\n  Test a\n  Fail a, boom\nFail m\n"),
        "{text}"
    );
    assert!(!text.contains("Test b"), "{text}");
    assert!(text.contains("\u{2718} [ Fail ] /m/a, boom\n"), "{text}");
    assert!(text.contains("1 test (1 Fail)\n"), "{text}");
    assert!(!text.contains("\nPassing\n"), "{text}");
    assert!(text.ends_with("\nTotal time 1s 500ms\n\nFramework v2.1.0\n"), "{text}");
}

#[test]
fn show_skipped_can_come_from_the_environment() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = write_log(dir.path());
    let output = evlog()
        .env("EVLOG_SHOW_SKIPPED", "1")
        .args(["transform", "short"])
        .arg(&log)
        .output()
        .expect("spawn evlog");
    let text = stdout(&output);
    assert!(text.contains("  Test b\n  Skip\n"), "{text}");
    assert!(text.contains("2 tests (1 Fail, 1 Skip)\n"), "{text}");
    assert!(text.contains("\nPassing\n\n\u{2714} [ Skip ] /m/b (0ms)\n"), "{text}");
}

#[test]
fn raw_transform_reads_stdin_and_writes_output_file() {
    let dir = tempfile::tempdir().expect("tempdir");
    let out = dir.path().join("copy.log");
    let mut child = evlog()
        .args(["transform", "raw", "-o"])
        .arg(&out)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .spawn()
        .expect("spawn evlog");
    child
        .stdin
        .take()
        .expect("stdin")
        .write_all(format!("{LOG}NOTE,\"a5\",4,\"Module\",null,\"0\",0,0,null,2.0,\"late\"\n").as_bytes())
        .expect("write stdin");
    let output = child.wait_with_output().expect("wait");
    assert!(stdout(&output).is_empty());
    assert_eq!(fs::read_to_string(&out).expect("read copy"), LOG);
}

#[test]
fn reports_print_only_their_section() {
    let dir = tempfile::tempdir().expect("tempdir");
    let log = write_log(dir.path());

    let totals = evlog()
        .args(["report", "totals"])
        .arg(&log)
        .output()
        .expect("spawn evlog");
    assert_eq!(
        stdout(&totals),
        "1 module (1 Fail)\n1 test (1 Fail)\n\nTotal time 1s 500ms\n"
    );

    let fails = evlog()
        .args(["report", "fails"])
        .arg(&log)
        .output()
        .expect("spawn evlog");
    assert_eq!(
        stdout(&fails),
        "Failing\n\n\u{2718} [ Fail ] /m/a, boom\n\u{2718} [ Fail ] /m\n"
    );

    let version = evlog()
        .args(["report", "version"])
        .arg(&log)
        .output()
        .expect("spawn evlog");
    assert_eq!(stdout(&version), "Framework v2.1.0\n");

    let passing = evlog()
        .args(["report", "passing"])
        .arg(&log)
        .output()
        .expect("spawn evlog");
    assert_eq!(stdout(&passing), "");
}

#[test]
fn missing_log_fails_with_message() {
    let dir = tempfile::tempdir().expect("tempdir");
    let output = evlog()
        .args(["report", "totals"])
        .arg(dir.path().join("absent.log"))
        .output()
        .expect("spawn evlog");
    assert_eq!(output.status.code(), Some(1));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.starts_with("error: failed to open"), "{stderr}");
}
