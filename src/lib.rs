//! Local Dagger engine provisioning.
//!
//! Bridges "a digest-pinned engine image reference" to "a running local
//! engine session with a live HTTP endpoint":
//!
//! 1. resolve the host platform to the prebuilt binary naming scheme;
//! 2. derive a content id from the pinned reference;
//! 3. ensure the binary exists in the per-user cache, extracting it from
//!    the image with the docker CLI on a miss;
//! 4. launch it and read the one-line port handshake from its stdout;
//! 5. hand back `http://localhost:<port>`.
//!
//! The wire protocol spoken to that endpoint is out of scope — callers
//! plug the endpoint into their own HTTP/GraphQL transport.

#![cfg_attr(test, allow(clippy::expect_used))]

pub mod cache;
pub mod config;
pub mod connector;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod image;
pub mod platform;

pub use config::Config;
pub use connector::DockerConnector;
pub use error::ProvisionError;
