//! Optional perceptual comparison through an external `perceptualdiff`.

use std::path::Path;
use std::process::{Command, Stdio};

use tracing::{debug, info, warn};

pub const DEFAULT_PDIFF: &str = "perceptualdiff";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PerceptualDiff {
    program: String,
}

impl PerceptualDiff {
    /// Probe for `program`; `None` when it cannot be spawned at all.
    #[must_use]
    pub fn detect(program: &str) -> Option<Self> {
        let probe = Command::new(program)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status();
        match probe {
            Ok(_) => {
                debug!("perceptual diff available: {program}");
                Some(Self {
                    program: program.to_string(),
                })
            }
            Err(err) => {
                info!("perceptual diff `{program}` unavailable: {err}");
                None
            }
        }
    }

    #[must_use]
    pub fn program(&self) -> &str {
        &self.program
    }

    /// True when the tool judges the two images perceptually identical.
    #[must_use]
    pub fn nearly_match(&self, expected: &Path, result: &Path) -> bool {
        let output = Command::new(&self.program)
            .arg(expected)
            .arg(result)
            .stdin(Stdio::null())
            .output();
        match output {
            Ok(output) => {
                let stdout = String::from_utf8_lossy(&output.stdout);
                output.status.success() || stdout.contains("PASS")
            }
            Err(err) => {
                warn!("failed to run {}: {err}", self.program);
                false
            }
        }
    }
}
