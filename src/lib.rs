pub mod cli;
pub mod config;
pub mod exec;
pub mod github;
pub mod guestkey;
pub mod ip;
pub mod keys;
pub mod poll;
pub mod provision;
pub mod ssh;
pub mod teardown;
pub mod vbox;

/// Exit code for credential-store authentication failures, kept distinct
/// from the general failure code so wrappers can tell "run `gh auth login`
/// / export GITHUB_TOKEN" apart from everything else.
pub const EXIT_AUTH: i32 = 3;
