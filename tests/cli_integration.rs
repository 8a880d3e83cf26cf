//! Integration tests for hoptrace CLI functionality

#![allow(clippy::unwrap_used)]

use assert_cmd::Command;
use predicates::prelude::*;

fn hoptrace() -> Command {
    Command::cargo_bin("hoptrace").expect("Failed to find hoptrace binary")
}

#[test]
fn test_help_output() {
    hoptrace()
        .arg("--help")
        .assert()
        .success()
        .stdout(predicate::str::contains("TTL-stepping IPv4 traceroute"))
        .stdout(predicate::str::contains("--max-hops"))
        .stdout(predicate::str::contains("--queries"))
        .stdout(predicate::str::contains("--json"))
        .stdout(predicate::str::contains("--port"));
}

#[test]
fn test_version_output() {
    hoptrace()
        .arg("--version")
        .assert()
        .success()
        .stdout(predicate::str::starts_with("hoptrace "));
}

#[test]
fn test_missing_host_is_usage_error() {
    hoptrace()
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("<HOST>"));
}

#[test]
fn test_unknown_protocol_rejected() {
    hoptrace()
        .args(["--protocol", "tcp", "127.0.0.1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("invalid value"));
}

#[test]
fn test_inverted_hop_range_rejected() {
    hoptrace()
        .args(["-f", "9", "-m", "3", "127.0.0.1"])
        .assert()
        .failure()
        .code(2)
        .stderr(predicate::str::contains("Invalid configuration"))
        .stderr(predicate::str::contains("max_hops"));
}

#[test]
fn test_zero_queries_rejected() {
    hoptrace()
        .args(["-q", "0", "127.0.0.1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("retries must be at least 1"));
}

#[test]
fn test_tiny_packet_rejected() {
    hoptrace()
        .args(["--packet-size", "20", "127.0.0.1"])
        .assert()
        .failure()
        .stderr(predicate::str::contains("packet_size"));
}

#[test]
fn test_ipv6_target_rejected() {
    hoptrace()
        .arg("::1")
        .assert()
        .failure()
        .code(1)
        .stderr(predicate::str::contains("IPv6"));
}

#[test]
fn test_localhost_run_or_permission_error() {
    // Without CAP_NET_RAW the run fails cleanly; with it, the header is printed
    let output = hoptrace()
        .args(["-m", "2", "-q", "1", "-w", "200", "-n", "127.0.0.1"])
        .output()
        .unwrap();

    let stdout = String::from_utf8_lossy(&output.stdout);
    assert!(stdout.starts_with("traceroute to 127.0.0.1 (127.0.0.1), 2 hops max, 512 byte packets"));
    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        assert!(stderr.contains("Error"), "unexpected stderr: {stderr}");
    }
}
