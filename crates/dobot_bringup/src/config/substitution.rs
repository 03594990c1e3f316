//! Expansion of `$(arg name)`, `$(env NAME)` and `$(share package)` in bringup values

use regex::Regex;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::LazyLock;

/// `$(kind value)`; the value is optional so `$(arg)` is reported, not skipped
static SUBSTITUTION: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\$\((\w+)(?:\s+([^)]*))?\)").unwrap());

/// Values may expand to further substitutions, up to this depth
const MAX_DEPTH: usize = 10;

/// Search path for installed package share directories
pub const AMENT_PREFIX_PATH: &str = "AMENT_PREFIX_PATH";

/// Values available to substitutions
#[derive(Debug, Clone, Default)]
pub struct SubstitutionContext {
    /// Bringup arguments
    pub args: HashMap<String, String>,
    /// Environment overrides, looked up before the process environment
    pub env: HashMap<String, String>,
}

impl SubstitutionContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_arg(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.args.insert(name.into(), value.into());
        self
    }

    pub fn with_args(mut self, args: HashMap<String, String>) -> Self {
        self.args.extend(args);
        self
    }

    pub fn with_envs<I, K, V>(mut self, envs: I) -> Self
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: Into<String>,
    {
        self.env
            .extend(envs.into_iter().map(|(k, v)| (k.into(), v.into())));
        self
    }

    /// Expand every substitution in `input`, including ones produced by expansion
    pub fn substitute(&self, input: &str) -> Result<String, SubstitutionError> {
        let mut current = input.to_string();
        for _ in 0..MAX_DEPTH {
            if !SUBSTITUTION.is_match(&current) {
                return Ok(current);
            }
            current = self.expand(&current)?;
        }
        Err(SubstitutionError::MaxIterationsExceeded(input.to_string()))
    }

    pub fn substitute_all<'a, I>(&self, inputs: I) -> Result<Vec<String>, SubstitutionError>
    where
        I: IntoIterator<Item = &'a String>,
    {
        inputs.into_iter().map(|s| self.substitute(s)).collect()
    }

    /// One left-to-right pass over the input
    fn expand(&self, input: &str) -> Result<String, SubstitutionError> {
        let mut expanded = String::with_capacity(input.len());
        let mut copied_to = 0;

        for caps in SUBSTITUTION.captures_iter(input) {
            let Some(whole) = caps.get(0) else { continue };
            let value = caps.get(2).map_or("", |v| v.as_str().trim());

            expanded.push_str(&input[copied_to..whole.start()]);
            expanded.push_str(&self.resolve(&caps[1], value)?);
            copied_to = whole.end();
        }

        expanded.push_str(&input[copied_to..]);
        Ok(expanded)
    }

    fn resolve(&self, kind: &str, value: &str) -> Result<String, SubstitutionError> {
        match (kind, value) {
            ("arg" | "env" | "share", "") => {
                Err(SubstitutionError::InvalidPattern(format!("$({})", kind)))
            }
            ("arg", name) => self
                .args
                .get(name)
                .cloned()
                .ok_or_else(|| SubstitutionError::UndefinedArg(name.to_string())),
            ("env", name) => self
                .env_var(name)
                .ok_or_else(|| SubstitutionError::UndefinedEnv(name.to_string())),
            ("share", package) => self
                .package_share_directory(package)
                .map(|p| p.to_string_lossy().into_owned()),
            (other, _) => Err(SubstitutionError::UnknownType(other.to_string())),
        }
    }

    fn env_var(&self, name: &str) -> Option<String> {
        self.env
            .get(name)
            .cloned()
            .or_else(|| std::env::var(name).ok())
    }

    /// Find `<prefix>/share/<package>` over the prefixes of `AMENT_PREFIX_PATH`
    pub fn package_share_directory(&self, package: &str) -> Result<PathBuf, SubstitutionError> {
        let prefixes = self
            .env_var(AMENT_PREFIX_PATH)
            .ok_or_else(|| SubstitutionError::PackageNotFound(package.to_string()))?;

        std::env::split_paths(&prefixes)
            .map(|prefix| prefix.join("share").join(package))
            .find(|share| share.is_dir())
            .ok_or_else(|| SubstitutionError::PackageNotFound(package.to_string()))
    }
}

/// Errors that can occur during substitution
#[derive(Debug, thiserror::Error)]
pub enum SubstitutionError {
    #[error("Unknown substitution type: {0}")]
    UnknownType(String),

    #[error("Undefined argument: {0}")]
    UndefinedArg(String),

    #[error("Undefined environment variable: {0}")]
    UndefinedEnv(String),

    #[error("Package '{0}' not found in AMENT_PREFIX_PATH")]
    PackageNotFound(String),

    #[error("Invalid substitution pattern: {0}")]
    InvalidPattern(String),

    #[error("Maximum substitution iterations exceeded for: {0}")]
    MaxIterationsExceeded(String),
}
