//! Converter backed by a headless office suite.
//!
//! Runs `<program> --headless -env:UserInstallation=<profile> --convert-to
//! <format> --outdir <scratch> <source>` (the LibreOffice command line). Each
//! call gets its own scratch directory next to the source, holding a private
//! user profile and the raw output, so concurrent conversions never share an
//! office instance. The result is moved beside the source as
//! `<stem>.<format>`, or `<stem>.converted.<format>` when that name is the
//! source itself.

use super::{ConvertError, Converter};
use std::path::{Path, PathBuf};
use std::process::Command;
use tracing::debug;

/// Default office suite executable.
pub const DEFAULT_PROGRAM: &str = "soffice";

/// Default target format for spreadsheets.
pub const DEFAULT_SPREADSHEET_FORMAT: &str = "csv";

#[derive(Debug, Clone)]
pub struct OfficeConverter {
    program: String,
    spreadsheet_format: String,
}

impl Default for OfficeConverter {
    fn default() -> Self {
        Self::new(DEFAULT_PROGRAM, DEFAULT_SPREADSHEET_FORMAT)
    }
}

impl OfficeConverter {
    pub fn new(program: impl Into<String>, spreadsheet_format: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            spreadsheet_format: spreadsheet_format.into(),
        }
    }

    fn run(&self, source: &Path, format: &str) -> Result<PathBuf, ConvertError> {
        let out_dir = match source.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent,
            _ => Path::new("."),
        };
        let stem = source
            .file_stem()
            .ok_or_else(|| ConvertError::Other(format!("{} has no file name", source.display())))?
            .to_string_lossy()
            .into_owned();

        // Removed on drop, profile included.
        let scratch = tempfile::Builder::new()
            .prefix(".convertd-")
            .tempdir_in(out_dir)
            .map_err(ConvertError::Workspace)?;
        let scratch_dir = std::fs::canonicalize(scratch.path()).map_err(ConvertError::Workspace)?;
        let profile = scratch_dir.join("profile");

        debug!(program = %self.program, format, source = %source.display(), "Running converter");
        let output = Command::new(&self.program)
            .arg("--headless")
            .arg(format!("-env:UserInstallation=file://{}", profile.display()))
            .arg("--convert-to")
            .arg(format)
            .arg("--outdir")
            .arg(&scratch_dir)
            .arg(source)
            .output()
            .map_err(|e| ConvertError::Launch {
                program: self.program.clone(),
                source: e,
            })?;

        if !output.status.success() {
            return Err(ConvertError::Exited {
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        let produced = scratch_dir.join(format!("{stem}.{format}"));
        if !produced.is_file() {
            return Err(ConvertError::MissingOutput(produced));
        }

        let mut target = out_dir.join(format!("{stem}.{format}"));
        if target == source {
            target = out_dir.join(format!("{stem}.converted.{format}"));
        }
        std::fs::rename(&produced, &target).map_err(ConvertError::Workspace)?;
        Ok(target)
    }
}

impl Converter for OfficeConverter {
    fn convert_word_to_pdf(&self, source: &Path) -> Result<PathBuf, ConvertError> {
        self.run(source, "pdf")
    }

    fn convert_excel_to_pdf(&self, source: &Path) -> Result<PathBuf, ConvertError> {
        self.run(source, &self.spreadsheet_format)
    }

    fn convert_ppt_to_pdf(&self, source: &Path) -> Result<PathBuf, ConvertError> {
        self.run(source, "pdf")
    }
}
