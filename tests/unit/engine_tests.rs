//! Engine session supervision: handshake, launch retries, shutdown.

#![cfg(unix)]
#![allow(clippy::expect_used)]

use std::path::Path;

use dagger_provision::config::Config;
use dagger_provision::engine::{EngineSession, SessionCommand};
use dagger_provision::error::ProvisionError;
use dagger_provision::image::ImageRef;
use url::Url;

use crate::mocks::{FlakySpawner, ScriptSpawner};

const DIGEST: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";

fn image() -> ImageRef {
    ImageRef::parse(&format!("registry.dagger.io/engine@sha256:{DIGEST}"))
        .expect("valid reference")
}

fn config() -> Config {
    let url = format!("docker-image://registry.dagger.io/engine@sha256:{DIGEST}");
    Config::new(Url::parse(&url).expect("valid url"))
}

fn command(cfg: &Config) -> SessionCommand {
    // The spawner doubles ignore the binary path; any placeholder works.
    SessionCommand::new(Path::new("/bin/true"), &image(), cfg).expect("build command")
}

#[tokio::test]
async fn handshake_reads_port_and_stop_is_idempotent() {
    let cfg = config();
    let spawner = ScriptSpawner::new("echo 54321; sleep 5");

    let mut session = EngineSession::start(&command(&cfg), &spawner)
        .await
        .expect("handshake succeeds");

    assert_eq!(session.endpoint(), "http://localhost:54321");
    assert_eq!(session.port(), 54321);
    assert!(session.is_running());
    // Sessions show up in assertion failures and logs.
    assert!(format!("{session:?}").contains("54321"));

    session.stop().await;
    assert!(!session.is_running());
    // Second stop is a no-op, not a double cleanup.
    session.stop().await;
    assert!(!session.is_running());
}

#[tokio::test]
async fn exited_child_stderr_becomes_the_failure_reason() {
    let cfg = config();
    let spawner = ScriptSpawner::new("echo boom >&2; exit 1");

    let err = EngineSession::start(&command(&cfg), &spawner)
        .await
        .expect_err("handshake fails");

    match err {
        ProvisionError::EngineStartup(reason) => {
            assert!(reason.contains("boom"), "stderr surfaced: {reason}");
        }
        other => panic!("expected EngineStartup, got {other:?}"),
    }
}

#[tokio::test]
async fn silent_exit_gets_the_daemon_hint() {
    let cfg = config();
    let spawner = ScriptSpawner::new("exit 1");

    let err = EngineSession::start(&command(&cfg), &spawner)
        .await
        .expect_err("handshake fails");

    match err {
        ProvisionError::EngineStartup(reason) => {
            assert!(reason.contains("docker"), "generic hint: {reason}");
        }
        other => panic!("expected EngineStartup, got {other:?}"),
    }
}

#[tokio::test]
async fn garbage_line_from_live_child_keeps_the_parse_failure() {
    let cfg = config();
    let spawner = ScriptSpawner::new("echo notaport; sleep 5");

    let err = EngineSession::start(&command(&cfg), &spawner)
        .await
        .expect_err("handshake fails");

    match err {
        ProvisionError::EngineStartup(reason) => {
            assert!(
                reason.contains("notaport"),
                "original parse failure kept: {reason}"
            );
        }
        other => panic!("expected EngineStartup, got {other:?}"),
    }
}

#[tokio::test]
async fn busy_binary_is_retried_until_it_launches() {
    let cfg = config();
    let spawner = FlakySpawner::text_file_busy(3, "echo 4242; sleep 5");

    let mut session = EngineSession::start(&command(&cfg), &spawner)
        .await
        .expect("retries succeed below the budget");

    assert_eq!(spawner.attempts(), 4, "three failures plus one success");
    assert_eq!(session.endpoint(), "http://localhost:4242");
    session.stop().await;
}

#[tokio::test]
async fn busy_binary_exhausts_the_retry_budget() {
    let cfg = config();
    let spawner = FlakySpawner::text_file_busy(u32::MAX, "echo 4242");

    let err = EngineSession::start(&command(&cfg), &spawner)
        .await
        .expect_err("budget exhausted");

    assert_eq!(spawner.attempts(), 10, "exactly the budgeted attempts");
    match err {
        ProvisionError::Launch(reason) => {
            assert!(reason.contains("after retries"), "fatal: {reason}");
        }
        other => panic!("expected Launch, got {other:?}"),
    }
}

#[tokio::test]
async fn other_launch_errors_fail_immediately() {
    let cfg = config();
    let spawner = FlakySpawner::with_errno(u32::MAX, libc::ENOENT, "echo 4242");

    let err = EngineSession::start(&command(&cfg), &spawner)
        .await
        .expect_err("not retriable");

    assert_eq!(spawner.attempts(), 1, "no retry for non-busy errors");
    assert!(matches!(err, ProvisionError::Launch(_)));
}

#[tokio::test]
async fn session_args_carry_remote_and_resolved_paths() {
    let workdir = tempfile::tempdir().expect("tempdir");
    let mut cfg = config();
    cfg.workdir = Some(workdir.path().join("src"));
    cfg.config_path = Some("dagger.json".into());

    let cmd = command(&cfg);
    let args: Vec<String> = cmd
        .args()
        .iter()
        .map(|a| a.to_string_lossy().into_owned())
        .collect();

    assert_eq!(args[0], "--remote");
    assert_eq!(
        args[1],
        format!("docker-image://registry.dagger.io/engine@sha256:{DIGEST}")
    );
    assert_eq!(args[2], "--workdir");
    assert!(Path::new(&args[3]).is_absolute());
    assert_eq!(args[4], "--project");
    assert!(
        Path::new(&args[5]).is_absolute(),
        "relative config path resolved: {}",
        args[5]
    );
    assert!(args[5].ends_with("dagger.json"));
}
