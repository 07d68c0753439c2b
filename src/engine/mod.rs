//! Access to the external container engine.
//!
//! Only two read-only primitives are used, both as subprocesses:
//!
//! - the listing primitive (`ps --all --format json [--size]`), decoded by
//!   [`parser`] into an ordered snapshot, and
//! - the live event feed (`events --format json`), one JSON event per line,
//!   decoded by [`event`].
//!
//! Every call first resolves the engine binary so that a missing engine is
//! reported as [`Error::EngineUnavailable`] instead of a generic spawn error.
use std::ffi::OsString;
use std::path::{Path, PathBuf};
use std::process::Stdio;

use tokio::process::Command;

use crate::container::{self, ContainerRecord};

mod error;
pub mod event;
pub mod parser;

pub use error::{CommandError, Error, Result};
pub use event::{LiveEvent, parse_event};

/// The binary used when no engine command is configured.
pub const DEFAULT_ENGINE_BINARY: &str = "podman";

const LIST_ARGS: &[&str] = &["ps", "--all", "--format", "json"];
const SIZE_FLAG: &str = "--size";
const EVENTS_ARGS: &[&str] = &["events", "--format", "json"];

/// Handle to the engine command line.
///
/// The engine is invoked as `<binary> <prefix args..> <primitive args..>`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Engine {
    binary: String,
    prefix_args: Vec<String>,
    include_size: bool,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(DEFAULT_ENGINE_BINARY)
    }
}

impl Engine {
    pub fn new(binary: impl Into<String>) -> Self {
        Self {
            binary: binary.into(),
            prefix_args: Vec::new(),
            include_size: true,
        }
    }

    /// Builds an engine from a whitespace separated command line such as
    /// `podman --remote`. Returns `None` for a blank command line.
    pub fn from_command_line(command_line: &str) -> Option<Self> {
        let mut words = command_line.split_whitespace();
        let binary = words.next()?;
        Some(Self::new(binary).with_prefix_args(words))
    }

    /// Sets arguments placed between the binary and every primitive's arguments.
    pub fn with_prefix_args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.prefix_args = args.into_iter().map(Into::into).collect();
        self
    }

    /// Whether the first listing attempt asks the engine for on-disk sizes.
    pub fn with_size(mut self, include_size: bool) -> Self {
        self.include_size = include_size;
        self
    }

    pub fn binary(&self) -> &str {
        &self.binary
    }

    /// Resolves the engine binary.
    ///
    /// A binary containing a path separator must point at an existing file,
    /// anything else is searched on `PATH`.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EngineUnavailable`] if the binary cannot be found.
    pub fn resolve(&self) -> Result<PathBuf> {
        let unavailable = || Error::EngineUnavailable {
            binary: self.binary.clone(),
        };

        let candidate = Path::new(&self.binary);
        if self.binary.is_empty() {
            return Err(unavailable());
        }
        if candidate.components().count() > 1 {
            return if candidate.is_file() {
                Ok(candidate.to_path_buf())
            } else {
                Err(unavailable())
            };
        }

        let path = std::env::var_os("PATH").unwrap_or_else(OsString::new);
        std::env::split_paths(&path)
            .map(|dir| dir.join(candidate))
            .find(|full| full.is_file())
            .ok_or_else(unavailable)
    }

    /// Takes an authoritative snapshot of all containers, including stopped ones.
    ///
    /// The size-reporting flag is not understood by every engine version, so a
    /// failed sized listing is retried once without it. The result is sorted
    /// into canonical order.
    ///
    /// # Errors
    ///
    /// - [`Error::EngineUnavailable`] if the binary cannot be resolved.
    /// - [`Error::ListFailed`] on spawn failure, non-zero exit or malformed output.
    pub async fn list(&self) -> Result<Vec<ContainerRecord>> {
        let program = self.resolve()?;

        let output = if self.include_size {
            match self.run_list(&program, true).await {
                Ok(output) => output,
                Err(err) => {
                    log::debug!("sized listing failed, retrying without `{SIZE_FLAG}`: {err}");
                    self.run_list(&program, false).await?
                }
            }
        } else {
            self.run_list(&program, false).await?
        };

        let mut containers = parser::parse_containers(&output).map_err(Error::ListFailed)?;
        container::sort_containers(&mut containers);
        log::trace!("listed {} containers", containers.len());

        Ok(containers)
    }

    async fn run_list(&self, program: &Path, include_size: bool) -> Result<Vec<u8>> {
        let mut args: Vec<&str> = LIST_ARGS.to_vec();
        if include_size {
            args.push(SIZE_FLAG);
        }
        let command_line = self.describe(&args);

        let mut command = self.command(program, &args);
        command.stdin(Stdio::null()).kill_on_drop(true);
        let output = command
            .output()
            .await
            .map_err(|source| {
                Error::ListFailed(CommandError::Spawn {
                    command: command_line.clone(),
                    source,
                })
            })?;

        if !output.status.success() {
            return Err(Error::ListFailed(CommandError::Exit {
                command: command_line,
                status: output.status,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_owned(),
            }));
        }

        Ok(output.stdout)
    }

    /// Prepares the live event feed subprocess: stdout piped, stderr
    /// discarded, killed when the handle is dropped.
    ///
    /// # Errors
    ///
    /// Returns [`Error::EngineUnavailable`] if the binary cannot be resolved.
    pub fn events_command(&self) -> Result<(Command, String)> {
        let program = self.resolve()?;
        let mut command = self.command(&program, EVENTS_ARGS);
        command
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);

        Ok((command, self.describe(EVENTS_ARGS)))
    }

    fn command(&self, program: &Path, args: &[&str]) -> Command {
        let mut command = Command::new(program);
        command.args(&self.prefix_args).args(args);
        command
    }

    fn describe(&self, args: &[&str]) -> String {
        std::iter::once(self.binary.as_str())
            .chain(self.prefix_args.iter().map(String::as_str))
            .chain(args.iter().copied())
            .collect::<Vec<_>>()
            .join(" ")
    }
}
