//! Exercises the compiled binary the way an operator would: invoke it as
//! a subprocess and check what it prints, rather than reaching into its
//! `mod cli`/`mod demo` internals (which a bin-only crate doesn't expose
//! to its own `tests/` directory).

use std::process::Command;

fn overlay_node() -> Command {
    Command::new(env!("CARGO_BIN_EXE_overlay-node"))
}

#[test]
fn submit_without_config_prints_an_admittance_outcome() {
    let output = overlay_node()
        .args(["submit", "--topic", "demo", "--outputs", "2"])
        .output()
        .expect("overlay-node binary must run");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.contains("outputs_admitted"), "stdout: {stdout}");
}

#[test]
fn sync_without_configured_topics_warns_and_exits_cleanly() {
    let output = overlay_node().arg("sync").output().expect("overlay-node binary must run");

    assert!(output.status.success(), "stderr: {}", String::from_utf8_lossy(&output.stderr));
    let stderr = String::from_utf8_lossy(&output.stderr);
    assert!(stderr.contains("no topics configured"), "stderr: {stderr}");
}

#[test]
fn rejects_config_file_that_does_not_exist() {
    let output = overlay_node()
        .args(["--config", "/nonexistent/overlay-config.json", "sync"])
        .output()
        .expect("overlay-node binary must run");

    assert!(!output.status.success());
}
