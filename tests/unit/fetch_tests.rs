//! Docker CLI fetcher: command construction and failure mapping.

#![cfg(unix)]
#![allow(clippy::expect_used)]

use std::io::Read;

use dagger_provision::error::ProvisionError;
use dagger_provision::fetch::{DockerCli, Fetcher};
use dagger_provision::image::ImageRef;
use dagger_provision::platform::Platform;

fn image() -> ImageRef {
    let digest = "b".repeat(64);
    ImageRef::parse(&format!("registry.dagger.io/engine@sha256:{digest}"))
        .expect("valid reference")
}

#[tokio::test]
async fn missing_runtime_names_the_command() {
    let fetcher = DockerCli::with_command("definitely-not-a-container-runtime");
    let dest = tempfile::tempfile().expect("tempfile");

    let err = fetcher
        .fetch(&Platform::detect(), &image(), &dest)
        .await
        .expect_err("command is absent");

    match err {
        ProvisionError::RuntimeNotAvailable(command) => {
            assert_eq!(command, "definitely-not-a-container-runtime");
        }
        other => panic!("expected RuntimeNotAvailable, got {other:?}"),
    }
}

#[tokio::test]
async fn nonzero_exit_surfaces_captured_stderr() {
    // `sh run --rm …` exits non-zero complaining about the `run` file;
    // any runtime failure shape works, we only care about the mapping.
    let fetcher = DockerCli::with_command("sh");
    let dest = tempfile::tempfile().expect("tempfile");

    let err = fetcher
        .fetch(&Platform::detect(), &image(), &dest)
        .await
        .expect_err("sh cannot interpret the docker args");

    match err {
        ProvisionError::Fetch(stderr) => {
            assert!(!stderr.is_empty(), "captured stderr text is surfaced");
        }
        other => panic!("expected Fetch, got {other:?}"),
    }
}

#[tokio::test]
async fn runtime_stdout_streams_into_the_destination_file() {
    // `echo` prints its arguments, so the destination file receives the
    // exact CLI invocation — proving stdout is redirected, not captured.
    let fetcher = DockerCli::with_command("echo");
    let mut dest = tempfile::tempfile().expect("tempfile");

    fetcher
        .fetch(&Platform::detect(), &image(), &dest)
        .await
        .expect("echo exits zero");

    use std::io::Seek;
    dest.rewind().expect("rewind");
    let mut contents = String::new();
    dest.read_to_string(&mut contents).expect("read dest");

    assert!(contents.contains("run --rm --entrypoint /bin/cat"));
    assert!(contents.contains(image().reference()));
    let platform = Platform::detect();
    assert!(contents.contains(&format!("/usr/bin/{}", platform.asset_name())));
}
