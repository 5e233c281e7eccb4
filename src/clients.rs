//! Clients for the external systems the synchronizer drives.
//!
//! - [`git`]: local git working copies (the nixpkgs mirror and the consumer checkout)
//! - [`github`]: GitHub pull requests and branches
//! - [`github_curl`]: Curl-based HTTP client for making GitHub API requests
//! - [`nix`]: flake relocking and metadata generation in the consumer checkout
//!
//! Each client sits behind a trait so the orchestration can be tested with mocks.

pub mod git;
pub mod github;
pub mod github_curl;
pub mod nix;
