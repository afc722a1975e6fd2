//! # Build Error Codes
//!
//! Typed error codes the bulk loader returns to its caller. They travel
//! inside `eyre::Report` and are raised with `bail!`; callers that need to
//! branch on the code recover it with [`BuildError::of`].
//!
//! Programming-invariant violations are not errors: those are asserted and
//! abort the process.

use eyre::Report;

/// Error codes surfaced by the bulk loader.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildError {
    /// Extent reservation or page allocation exhausted the tablespace.
    OutOfFileSpace,
    /// A record cannot be stored even after external-field conversion, or a
    /// compressed page cannot accept it after a split.
    TooBigRecord,
    /// The owning transaction was interrupted between leaf pages.
    Interrupted,
}

impl BuildError {
    pub fn name(&self) -> &'static str {
        match self {
            BuildError::OutOfFileSpace => "out of file space",
            BuildError::TooBigRecord => "record too big",
            BuildError::Interrupted => "interrupted",
        }
    }

    /// Extracts the build error code from a report, if it carries one.
    pub fn of(report: &Report) -> Option<BuildError> {
        report.downcast_ref::<BuildError>().copied()
    }
}

impl std::fmt::Display for BuildError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

impl std::error::Error for BuildError {}

#[cfg(test)]
mod tests {
    use super::*;
    use eyre::bail;

    fn fails() -> eyre::Result<()> {
        bail!(BuildError::TooBigRecord);
    }

    #[test]
    fn code_survives_the_report() {
        let err = fails().unwrap_err();
        assert_eq!(BuildError::of(&err), Some(BuildError::TooBigRecord));
        assert_eq!(err.to_string(), "record too big");
    }

    #[test]
    fn foreign_reports_have_no_code() {
        let err = eyre::eyre!("page fetch failed");
        assert_eq!(BuildError::of(&err), None);
    }
}
