//! Bringup file YAML schema definitions

use crate::runtime::OutputMode;
use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::Path;

/// Bringup file compiled into the binary, used when no file is given
pub const DEFAULT_BRINGUP: &str = include_str!("../../bringup/gazebo_moveit.bringup.yaml");

/// Argument names provided by the sequencer; bringup files cannot redefine them
pub const BUILTIN_ARGS: &[&str] = &[
    "robot_type",
    "model_name",
    "entity_name",
    "description_file",
    "description_topic",
];

/// Root bringup file configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BringupFile {
    /// Bringup file format version
    #[serde(default = "default_version")]
    pub version: String,

    /// Argument definitions with defaults
    #[serde(default)]
    pub args: IndexMap<String, ArgDefinition>,

    /// Environment variables (applied to all stages)
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Where the robot description of each profile comes from
    pub description: DescriptionConfig,

    /// Command vocabulary of each stage
    pub stages: StageCommands,
}

fn default_version() -> String {
    "1.0".to_string()
}

/// Argument definition with default value
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArgDefinition {
    /// Default value for the argument
    pub default: ArgValue,
    /// Optional description
    #[serde(default)]
    pub description: Option<String>,
}

/// Argument values can be strings, booleans, or numbers
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ArgValue {
    Bool(bool),
    Int(i64),
    Float(f64),
    String(String),
}

impl ArgValue {
    /// Convert to string representation
    pub fn as_str(&self) -> String {
        match self {
            ArgValue::Bool(b) => b.to_string(),
            ArgValue::Int(i) => i.to_string(),
            ArgValue::Float(f) => f.to_string(),
            ArgValue::String(s) => s.clone(),
        }
    }
}

/// Description sources per profile
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptionConfig {
    /// Description fed to the simulator bringup
    pub gazebo: DescriptionSpec,
    /// Description fed to the MoveIt state publisher
    pub rsp: DescriptionSpec,
}

/// How to obtain one robot description
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptionSpec {
    /// Resolver kind
    #[serde(default)]
    pub resolver: ResolverKind,
    /// Path of the template (xacro) or of the resolved file; substituted
    pub path: String,
    /// Xacro executable
    #[serde(default = "default_xacro")]
    pub xacro: String,
}

fn default_xacro() -> String {
    "xacro".to_string()
}

/// How a description path is turned into a document
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ResolverKind {
    /// Process the path with xacro
    #[default]
    Xacro,
    /// Read the path as is
    File,
}

/// Commands for every stage of the bringup
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageCommands {
    /// Physics simulator with the world loaded
    pub simulator: CommandSpec,
    /// Robot description publisher (gazebo profile)
    pub state_publisher: CommandSpec,
    /// Robot description publisher (rsp profile)
    pub rsp_state_publisher: CommandSpec,
    /// Entity spawner; exits once the robot is in the simulator
    pub spawn_entity: CommandSpec,
    /// Controller loader; the controller name is appended as last argument
    pub controller_loader: CommandSpec,
}

/// One command line template
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CommandSpec {
    /// Executable name or path
    pub executable: String,

    /// Arguments passed in order
    #[serde(default)]
    pub raw_args: Vec<String>,

    /// ROS parameters, passed as `--ros-args -p name:=value`
    #[serde(default)]
    pub parameters: IndexMap<String, String>,

    /// Environment variables specific to this stage
    #[serde(default)]
    pub env: HashMap<String, String>,

    /// Output handling
    #[serde(default)]
    pub output: OutputMode,
}

impl BringupFile {
    /// Load bringup file from a YAML file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, BringupFileError> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path).map_err(|e| BringupFileError::Io {
            path: path.display().to_string(),
            source: e,
        })?;
        Self::from_yaml(&content)
    }

    /// Parse bringup file from YAML string
    pub fn from_yaml(content: &str) -> Result<Self, BringupFileError> {
        let bringup_file: BringupFile =
            serde_yaml::from_str(content).map_err(BringupFileError::Parse)?;
        bringup_file.validate()?;
        Ok(bringup_file)
    }

    /// The compiled-in bringup file
    pub fn builtin() -> Result<Self, BringupFileError> {
        Self::from_yaml(DEFAULT_BRINGUP)
    }

    /// Validate the bringup file configuration
    pub fn validate(&self) -> Result<(), BringupFileError> {
        for name in self.args.keys() {
            if BUILTIN_ARGS.contains(&name.as_str()) {
                return Err(BringupFileError::Validation(format!(
                    "Argument '{}' is provided by the sequencer and cannot be redefined",
                    name
                )));
            }
        }

        for (stage, spec) in self.stages.iter() {
            if spec.executable.trim().is_empty() {
                return Err(BringupFileError::Validation(format!(
                    "Stage '{}': 'executable' must not be empty",
                    stage
                )));
            }
        }

        for (profile, spec) in [("gazebo", &self.description.gazebo), ("rsp", &self.description.rsp)] {
            if spec.path.trim().is_empty() {
                return Err(BringupFileError::Validation(format!(
                    "Description '{}': 'path' must not be empty",
                    profile
                )));
            }
        }

        Ok(())
    }
}

impl StageCommands {
    /// All stages with their names
    pub fn iter(&self) -> impl Iterator<Item = (&'static str, &CommandSpec)> {
        [
            ("simulator", &self.simulator),
            ("state_publisher", &self.state_publisher),
            ("rsp_state_publisher", &self.rsp_state_publisher),
            ("spawn_entity", &self.spawn_entity),
            ("controller_loader", &self.controller_loader),
        ]
        .into_iter()
    }
}

/// Errors that can occur when loading a bringup file
#[derive(Debug, thiserror::Error)]
pub enum BringupFileError {
    #[error("Failed to read bringup file '{path}': {source}")]
    Io {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to parse bringup file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("Validation error: {0}")]
    Validation(String),
}
