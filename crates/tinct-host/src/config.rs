//! Configuration for spawning the external compiler process.

use std::path::PathBuf;

/// Default compiler command on Windows-family platforms.
#[cfg(windows)]
const DEFAULT_COMMAND: &str = "tinctc.bat";

/// Default compiler command on non-Windows platforms.
#[cfg(not(windows))]
const DEFAULT_COMMAND: &str = "tinctc";

/// Configuration for spawning the compiler subprocess.
#[derive(Debug, Clone)]
pub struct CompilerConfig {
    /// The executable path or command name.
    pub command: PathBuf,
    /// Arguments to pass to the compiler.
    pub args: Vec<String>,
    /// Working directory for the spawned process.
    pub working_dir: Option<PathBuf>,
}

impl CompilerConfig {
    /// Builds a configuration for a specific compiler executable.
    #[must_use]
    pub fn new(command: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            args: Vec::new(),
            working_dir: None,
        }
    }

    /// Default configuration resolving the platform command name.
    ///
    /// Expects `tinctc` (`tinctc.bat` on Windows) to be available in PATH.
    #[must_use]
    pub fn platform_default() -> Self {
        Self::new(DEFAULT_COMMAND)
    }

    /// Appends an argument.
    #[must_use]
    pub fn with_arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    /// Sets a custom working directory.
    #[must_use]
    pub fn with_working_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.working_dir = Some(dir.into());
        self
    }
}

impl Default for CompilerConfig {
    fn default() -> Self {
        Self::platform_default()
    }
}

#[cfg(test)]
mod tests {
    use rstest::rstest;

    use super::*;

    #[rstest]
    fn platform_default_resolves_command_name() {
        let config = CompilerConfig::platform_default();

        if cfg!(windows) {
            assert_eq!(config.command, PathBuf::from("tinctc.bat"));
        } else {
            assert_eq!(config.command, PathBuf::from("tinctc"));
        }
        assert!(config.args.is_empty());
        assert!(config.working_dir.is_none());
    }

    #[rstest]
    fn builder_methods_accumulate() {
        let config = CompilerConfig::new("/opt/tinct/tinctc")
            .with_arg("--quiet")
            .with_working_dir("/workspace");

        assert_eq!(config.command, PathBuf::from("/opt/tinct/tinctc"));
        assert_eq!(config.args, vec!["--quiet"]);
        assert_eq!(config.working_dir, Some(PathBuf::from("/workspace")));
    }
}
