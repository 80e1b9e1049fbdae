use std::path::PathBuf;
use std::time::Duration;

use tokio::process::Command;

// ─────────────────────────────────────────────
// Engine configuration
// ─────────────────────────────────────────────

/// How to invoke the external verification engine.
///
/// One fresh process is started from this configuration for every request.
#[derive(Clone, Debug)]
pub struct EngineConfig {
    pub command: PathBuf,
    pub args: Vec<String>,
    /// Working directory of the engine process. `None` inherits ours.
    pub working_dir: Option<PathBuf>,
    /// Deadline for a single invocation. `None` waits indefinitely.
    pub timeout: Option<Duration>,
    /// Compile step run once at startup, before any request is served.
    pub build: Option<BuildStep>,
}

#[derive(Clone, Debug)]
pub struct BuildStep {
    pub command: PathBuf,
    pub args: Vec<String>,
    pub timeout: Duration,
}

impl EngineConfig {
    /// Engine config with no working directory, deadline or build step.
    pub fn new(
        command: impl Into<PathBuf>,
        args: impl IntoIterator<Item = impl Into<String>>,
    ) -> Self {
        Self {
            command: command.into(),
            args: args.into_iter().map(Into::into).collect(),
            working_dir: None,
            timeout: None,
            build: None,
        }
    }

    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    pub fn with_build(mut self, build: BuildStep) -> Self {
        self.build = Some(build);
        self
    }

    /// Build the engine command. Stdio wiring is left to the caller.
    pub fn command(&self) -> Command {
        let mut command = Command::new(&self.command);
        command.args(&self.args);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        command
    }

    /// Build the compile step command, run from the engine's working directory.
    pub fn build_command(&self) -> Option<Command> {
        let build = self.build.as_ref()?;
        let mut command = Command::new(&build.command);
        command.args(&build.args);
        if let Some(dir) = &self.working_dir {
            command.current_dir(dir);
        }
        Some(command)
    }

    /// Human-readable command line, for logs and the health endpoint.
    pub fn display_command(&self) -> String {
        std::iter::once(self.command.display().to_string())
            .chain(self.args.iter().cloned())
            .collect::<Vec<_>>()
            .join(" ")
    }
}

// ─────────────────────────────────────────────
// Server configuration from environment
// ─────────────────────────────────────────────

const DEFAULT_PORT: u16 = 4004;
const DEFAULT_MAX_BODY_BYTES: usize = 10 * 1024 * 1024;
const DEFAULT_TIMEOUT_SECS: u64 = 120;
const DEFAULT_BUILD_TIMEOUT_SECS: u64 = 600;

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub port: u16,
    pub max_body_bytes: usize,
    pub engine: EngineConfig,
}

impl ServerConfig {
    pub fn from_env() -> Self {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration through `lookup`; unparseable values fall back to defaults.
    pub fn from_lookup<F>(lookup: F) -> Self
    where
        F: Fn(&str) -> Option<String>,
    {
        let port = lookup("PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_PORT);

        let max_body_bytes = lookup("MAX_BODY_BYTES")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_MAX_BODY_BYTES);

        let command = lookup("VERIFIER_COMMAND")
            .filter(|v| !v.trim().is_empty())
            .unwrap_or_else(|| "cargo".to_string());

        let args = lookup("VERIFIER_ARGS")
            .map(|v| split_args(&v))
            .unwrap_or_else(|| split_args("run --quiet --release"));

        // An explicitly empty VERIFIER_WORKDIR means "inherit".
        let working_dir = match lookup("VERIFIER_WORKDIR") {
            Some(dir) if dir.trim().is_empty() => None,
            Some(dir) => Some(PathBuf::from(dir)),
            None => Some(PathBuf::from("./rust")),
        };

        let timeout_secs = lookup("VERIFIER_TIMEOUT_SECS")
            .and_then(|v| v.parse().ok())
            .unwrap_or(DEFAULT_TIMEOUT_SECS);
        let timeout = (timeout_secs > 0).then(|| Duration::from_secs(timeout_secs));

        let build = lookup("VERIFIER_BUILD_COMMAND")
            .filter(|v| !v.trim().is_empty())
            .map(|command| BuildStep {
                command: PathBuf::from(command),
                args: lookup("VERIFIER_BUILD_ARGS")
                    .map(|v| split_args(&v))
                    .unwrap_or_default(),
                timeout: Duration::from_secs(
                    lookup("VERIFIER_BUILD_TIMEOUT_SECS")
                        .and_then(|v| v.parse().ok())
                        .unwrap_or(DEFAULT_BUILD_TIMEOUT_SECS),
                ),
            });

        let mut engine = EngineConfig::new(command, args);
        if let Some(dir) = working_dir {
            engine = engine.with_working_dir(dir);
        }
        if let Some(timeout) = timeout {
            engine = engine.with_timeout(timeout);
        }
        if let Some(build) = build {
            engine = engine.with_build(build);
        }

        Self {
            port,
            max_body_bytes,
            engine,
        }
    }
}

fn split_args(raw: &str) -> Vec<String> {
    raw.split_whitespace().map(str::to_string).collect()
}
