use std::{fmt, str::FromStr};

use serde::{Deserialize, Serialize};

/// Page sizes for each level of the check suite query.
///
/// A page size of 0 disables fetching and paginating that level entirely.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Deserialize, Serialize)]
pub struct PageSizes {
    pub check_suites: u32,
    pub check_runs: u32,
    pub check_steps: u32,
}

impl Default for PageSizes {
    fn default() -> Self { Self { check_suites: 100, check_runs: 100, check_steps: 0 } }
}

/// Where to fetch the jobs of a workflow run from.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Serialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum JobsSource {
    /// Nested check runs from the GraphQL query.
    #[default]
    Graphql,
    /// The REST workflow jobs listing, which also carries runner labels and
    /// run attempt numbers.
    Rest,
}

impl JobsSource {
    pub const fn variants() -> &'static [Self] { &[Self::Graphql, Self::Rest] }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Graphql => "graphql",
            Self::Rest => "rest",
        }
    }
}

impl FromStr for JobsSource {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "graphql" => Ok(Self::Graphql),
            "rest" => Ok(Self::Rest),
            _ => Err(()),
        }
    }
}

impl fmt::Display for JobsSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(self.as_str()) }
}
