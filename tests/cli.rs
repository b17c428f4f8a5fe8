use assert_cmd::Command;
use once_cell::sync::Lazy;
use regex::Regex;

fn version_output() -> String {
    format!("hashi {}\n", env!("CARGO_PKG_VERSION"))
}

#[test]
fn version_flag_prints_package_version() {
    let expected = version_output();
    Command::cargo_bin("hashi")
        .expect("binary exists")
        .arg("--version")
        .assert()
        .success()
        .stdout(expected.clone())
        .stderr("");

    Command::cargo_bin("hashi")
        .expect("binary exists")
        .arg("-v")
        .assert()
        .success()
        .stdout(expected)
        .stderr("");
}

#[test]
fn help_flag_prints_usage() {
    let output = Command::cargo_bin("hashi")
        .expect("binary exists")
        .arg("--help")
        .output()
        .expect("help output");

    assert!(output.status.success());

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("Usage:"), "stdout was: {stdout}");
    assert!(
        stdout.contains("-v, --version"),
        "stdout was missing version flag: {stdout}"
    );
    assert!(stdout.contains("--allow-sorry"), "stdout was: {stdout}");
    assert!(output.stderr.is_empty(), "stderr was not empty");
}

#[test]
fn checks_the_library() {
    let output = Command::cargo_bin("hashi")
        .expect("binary exists")
        .env_remove("RUST_LOG")
        .assert()
        .success()
        .stderr("")
        .get_output()
        .clone();

    let stdout = String::from_utf8_lossy(&output.stdout);
    let re = Regex::new(r"^checked \d+ declarations\n$").expect("valid regex");
    assert!(re.is_match(&stdout), "stdout was: {stdout}");
}

#[test]
fn list_prints_declarations() {
    let output = Command::cargo_bin("hashi")
        .expect("binary exists")
        .env_remove("RUST_LOG")
        .arg("--list")
        .assert()
        .success()
        .get_output()
        .clone();

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(
        stdout.contains("and_swap : Π (a : Prop) (b : Prop), a ∧ b → b ∧ a\n"),
        "stdout was: {stdout}"
    );
    assert!(stdout.contains("pow_succ' : "), "stdout was: {stdout}");
}

#[test]
fn info_logs_name_each_declaration() {
    let mut cmd = Command::cargo_bin("hashi").expect("binary exists");
    cmd.env("RUST_LOG", "info");
    cmd.env("RUST_LOG_STYLE", "never");

    let output = cmd.assert().success().get_output().clone();
    let stderr = String::from_utf8_lossy(&output.stderr);
    let stderr = TIMESTAMP_RE.replace_all(stderr.as_ref(), "<timestamp>");

    for line in [
        "inductive Nat with 2 constructor(s)",
        "def List.append with 2 equation(s)",
        "instance instMulNat (priority 100)",
        "theorem and_swap",
        "theorem pow_succ'",
    ] {
        assert!(stderr.contains(line), "missing {line:?} in: {stderr}");
    }
    assert!(stderr.lines().all(|line| line.starts_with("[<timestamp> ")));
}

static TIMESTAMP_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"\d{4}-\d{2}-\d{2}T\d{2}:\d{2}:\d{2}(?:\.\d+)?(?:Z|[+-]\d{2}:\d{2})")
        .expect("valid timestamp regex")
});
