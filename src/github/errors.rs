use thiserror::Error;

#[derive(Debug, Error)]
pub enum GithubError {
    #[error("GitHub request failed: {0}")]
    Request(#[from] reqwest::Error),

    #[error("GitHub API error: {0}")]
    Api(String),

    #[error(
        "no authenticated GitHub session; export GITHUB_TOKEN (e.g. `export GITHUB_TOKEN=$(gh auth token)`) and retry"
    )]
    Unauthenticated,
}
