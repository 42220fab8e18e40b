pub mod graphql;
pub mod jobs;
pub mod summary;

use anyhow::{Context, Result};
use octocrab::Octocrab;

/// App id of the GitHub Actions app.
/// https://api.github.com/apps/github-actions
pub const GITHUB_ACTIONS_APP_ID: i64 = 15368;

pub fn create_client(token: String) -> Result<Octocrab> {
    Octocrab::builder()
        .personal_token(token)
        .build()
        .context("Failed to create GitHub client")
}
