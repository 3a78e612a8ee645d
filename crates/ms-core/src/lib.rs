#![forbid(unsafe_code)]

//! Shared types for the MapServer regression harness.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Command template used when a `RUN_PARMS` directive names only an output file,
/// or when a mapfile carries no `RUN_PARMS` at all.
pub const DEFAULT_COMMAND: &str = "[SHP2IMG] -m [MAPFILE] -o [RESULT]";

/// Directory (relative to the test directory) that receives fresh artifacts.
pub const RESULT_DIR: &str = "result";

/// Directory (relative to the test directory) that holds accepted artifacts.
pub const EXPECTED_DIR: &str = "expected";

/// File holding directory-wide `REQUIRES:` directives.
pub const DIRECTORY_REQUIRES_FILE: &str = "all_require.txt";

#[derive(Debug, Error)]
pub enum HarnessError {
    #[error("I/O error on {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to decode image {}: {message}", path.display())]
    Image { path: PathBuf, message: String },
}

impl HarnessError {
    #[must_use]
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Self::Io {
            path: path.into(),
            source,
        }
    }
}

pub type HarnessResult<T> = Result<T, HarnessError>;

/// One invocation of the renderer: the artifact it should produce and the
/// command template that produces it.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RunParms {
    /// Artifact file name, resolved under `result/` and `expected/`.
    pub output: String,
    /// Command template with `[TOKEN]` placeholders.
    pub command: String,
}

impl RunParms {
    #[must_use]
    pub fn new(output: impl Into<String>, command: impl Into<String>) -> Self {
        Self {
            output: output.into(),
            command: command.into(),
        }
    }

    #[must_use]
    pub fn with_default_command(output: impl Into<String>) -> Self {
        Self::new(output, DEFAULT_COMMAND)
    }
}

/// Directives read from a mapfile (or from `all_require.txt`).
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestDirectives {
    pub run_parms: Vec<RunParms>,
    pub requires: Vec<String>,
}

/// Post-processing passes requested by the result token used in a template.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct PostProcess {
    /// `[RESULT_DEMIME]`: strip leading HTTP headers.
    pub demime: bool,
    /// `[RESULT_DEVERSION]`: strip the version banner and normalize numbers.
    pub deversion: bool,
}

/// Result of comparing a fresh artifact with its expected counterpart.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum CompareOutcome {
    Match,
    FilesDifferImageMatch,
    FilesDifferImageNearlyMatch,
    NoMatch,
    NoResult,
    NoExpected,
}

impl CompareOutcome {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Match => "match",
            Self::FilesDifferImageMatch => "files_differ_image_match",
            Self::FilesDifferImageNearlyMatch => "files_differ_image_nearly_match",
            Self::NoMatch => "nomatch",
            Self::NoResult => "noresult",
            Self::NoExpected => "noexpected",
        }
    }

    #[must_use]
    pub const fn is_success(self) -> bool {
        matches!(
            self,
            Self::Match | Self::FilesDifferImageMatch | Self::FilesDifferImageNearlyMatch
        )
    }

    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(self, Self::NoMatch | Self::NoResult)
    }

    /// Progress line printed by the runner after a comparison.
    #[must_use]
    pub const fn message(self) -> &'static str {
        match self {
            Self::Match => "     results match.",
            Self::FilesDifferImageMatch => "     result images match, though files differ.",
            Self::FilesDifferImageNearlyMatch => {
                "     result images perceptually match, though files differ."
            }
            Self::NoMatch => "*    results dont match, TEST FAILED.",
            Self::NoResult => "*    no result file generated, TEST FAILED.",
            Self::NoExpected => "     no expected file exists, accepting result as expected.",
        }
    }
}

#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct TestTally {
    pub skipped: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub initialized: usize,
}

impl TestTally {
    /// Record a comparison outcome. Skips are recorded separately.
    pub fn record(&mut self, outcome: CompareOutcome) {
        match outcome {
            CompareOutcome::Match
            | CompareOutcome::FilesDifferImageMatch
            | CompareOutcome::FilesDifferImageNearlyMatch => self.succeeded += 1,
            CompareOutcome::NoMatch | CompareOutcome::NoResult => self.failed += 1,
            CompareOutcome::NoExpected => self.initialized += 1,
        }
    }

    /// Percentage of succeeded runs among succeeded and failed ones.
    #[must_use]
    pub fn success_rate(&self) -> Option<f64> {
        let decided = self.succeeded + self.failed;
        if decided == 0 {
            return None;
        }
        Some(self.succeeded as f64 / decided as f64 * 100.0)
    }

    #[must_use]
    pub const fn has_failures(&self) -> bool {
        self.failed > 0
    }
}

/// Per-run record kept for the machine-readable report.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CaseReport {
    pub mapfile: String,
    pub output: String,
    /// `None` when the mapfile was skipped for missing requirements.
    pub outcome: Option<CompareOutcome>,
    pub command: Option<String>,
    pub missing_requires: Vec<String>,
    pub duration_ms: f64,
    /// SHA-256 of the offending artifact, recorded for failed comparisons.
    pub result_sha256: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunReport {
    pub started_at: String,
    pub version_info: String,
    pub cases: Vec<CaseReport>,
    pub tally: TestTally,
    pub success_rate: Option<f64>,
}

impl RunReport {
    pub fn to_json_pretty(&self) -> serde_json::Result<String> {
        serde_json::to_string_pretty(self)
    }
}
