//! Robot description resolution
//!
//! The description is produced by an external tool (xacro) or read from a
//! pre-resolved file. Its content is never parsed here; it is handed to
//! the description-publishing process as is.

use std::path::{Path, PathBuf};
use tokio::process::Command;

/// Resolved robot description document (opaque)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotDescription(String);

impl RobotDescription {
    pub fn new(content: impl Into<String>) -> Self {
        Self(content.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

/// Where the robot description comes from
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DescriptionSource {
    /// Run a xacro processor on a template and take its stdout
    Xacro { executable: String, file: PathBuf },
    /// Read an already resolved description
    File(PathBuf),
}

impl DescriptionSource {
    /// Produce the description document
    pub async fn resolve(&self) -> Result<RobotDescription, DescriptionError> {
        let (content, origin) = match self {
            DescriptionSource::Xacro { executable, file } => {
                (run_xacro(executable, file).await?, file)
            }
            DescriptionSource::File(path) => {
                let content = tokio::fs::read_to_string(path).await.map_err(|e| {
                    DescriptionError::Io {
                        path: path.display().to_string(),
                        source: e,
                    }
                })?;
                (content, path)
            }
        };

        if content.trim().is_empty() {
            return Err(DescriptionError::Empty(origin.display().to_string()));
        }

        log::info!(
            "Resolved robot description from {} ({} bytes)",
            origin.display(),
            content.len()
        );
        Ok(RobotDescription(content))
    }
}

async fn run_xacro(executable: &str, file: &Path) -> Result<String, DescriptionError> {
    log::debug!("Running {} {}", executable, file.display());

    let output = Command::new(executable)
        .arg(file)
        .output()
        .await
        .map_err(|e| DescriptionError::Spawn {
            executable: executable.to_string(),
            source: e,
        })?;

    if !output.status.success() {
        return Err(DescriptionError::ResolverFailed {
            file: file.display().to_string(),
            code: output.status.code(),
            stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    String::from_utf8(output.stdout).map_err(|_| DescriptionError::NotUtf8(file.display().to_string()))
}

/// Errors that can occur when resolving the robot description
#[derive(Debug, thiserror::Error)]
pub enum DescriptionError {
    #[error("Failed to read robot description '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to run description resolver '{executable}': {source}")]
    Spawn {
        executable: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Description resolver failed on '{file}' (exit code {code:?}): {stderr}")]
    ResolverFailed {
        file: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Robot description from '{0}' is not valid UTF-8")]
    NotUtf8(String),

    #[error("Robot description from '{0}' is empty")]
    Empty(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn urdf_file(content: &str) -> tempfile::NamedTempFile {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[tokio::test]
    async fn test_file_source() {
        let file = urdf_file("<robot name=\"cr3_robot\"/>");
        let description = DescriptionSource::File(file.path().to_path_buf())
            .resolve()
            .await
            .unwrap();
        assert_eq!(description.as_str(), "<robot name=\"cr3_robot\"/>");
    }

    #[tokio::test]
    async fn test_missing_file() {
        let result = DescriptionSource::File(PathBuf::from("/nonexistent/cr3_robot.urdf"))
            .resolve()
            .await;
        assert!(matches!(result, Err(DescriptionError::Io { .. })));
    }

    #[tokio::test]
    async fn test_empty_file() {
        let file = urdf_file("  \n");
        let result = DescriptionSource::File(file.path().to_path_buf()).resolve().await;
        assert!(matches!(result, Err(DescriptionError::Empty(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_xacro_source_takes_stdout() {
        let file = urdf_file("<robot name=\"cr5_robot\"/>\n");
        let source = DescriptionSource::Xacro {
            executable: "cat".to_string(),
            file: file.path().to_path_buf(),
        };
        let description = source.resolve().await.unwrap();
        assert_eq!(description.as_str(), "<robot name=\"cr5_robot\"/>\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_xacro_failure() {
        let source = DescriptionSource::Xacro {
            executable: "false".to_string(),
            file: PathBuf::from("cr3_robot.xacro"),
        };
        assert!(matches!(
            source.resolve().await,
            Err(DescriptionError::ResolverFailed { code: Some(1), .. })
        ));
    }

    #[tokio::test]
    async fn test_xacro_not_installed() {
        let source = DescriptionSource::Xacro {
            executable: "/nonexistent/xacro".to_string(),
            file: PathBuf::from("cr3_robot.xacro"),
        };
        assert!(matches!(
            source.resolve().await,
            Err(DescriptionError::Spawn { .. })
        ));
    }
}
