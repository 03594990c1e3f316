//! Name derivation from the robot type identifier
//!
//! Every process identity, entity name and controller name used by the
//! bringup sequence comes out of [`RobotNames::derive`]. Nothing checks
//! that the derived controllers exist in the robot description; a wrong
//! robot type shows up later as a failed controller load.

use regex::Regex;
use std::sync::LazyLock;

/// Environment variable holding the robot type (e.g. `cr3`)
pub const ROBOT_TYPE_ENV: &str = "DOBOT_TYPE";

/// Topic the spawner reads the robot description from
pub const DESCRIPTION_TOPIC: &str = "robot_description";

/// First controller in the chain, independent of the robot type
pub const JOINT_STATE_BROADCASTER: &str = "joint_state_broadcaster";

const MODEL_SUFFIX: &str = "_robot";
const GROUP_CONTROLLER_SUFFIX: &str = "_group_controller";
const XACRO_EXTENSION: &str = ".xacro";

/// Valid ROS base name
static ROS_NAME: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^[A-Za-z][A-Za-z0-9_]*$").unwrap());

/// Names derived from a single robot type identifier
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RobotNames {
    /// Robot type as supplied by the operator
    pub robot_type: String,
    /// Model name in the description package (`<type>_robot`)
    pub model_name: String,
    /// Name of the simulated entity
    pub entity_name: String,
    /// Xacro file name of the model
    pub description_file: String,
    /// Controllers to activate, in activation order
    pub controllers: Vec<String>,
}

impl RobotNames {
    /// Derive all names from a robot type identifier
    pub fn derive(robot_type: &str) -> Result<Self, NamingError> {
        let robot_type = robot_type.trim();
        if robot_type.is_empty() {
            return Err(NamingError::Empty);
        }
        if !ROS_NAME.is_match(robot_type) {
            return Err(NamingError::InvalidRobotType(robot_type.to_string()));
        }

        let model_name = format!("{}{}", robot_type, MODEL_SUFFIX);
        let names = Self {
            robot_type: robot_type.to_string(),
            entity_name: model_name.clone(),
            description_file: format!("{}{}", model_name, XACRO_EXTENSION),
            controllers: vec![
                JOINT_STATE_BROADCASTER.to_string(),
                format!("{}{}", robot_type, GROUP_CONTROLLER_SUFFIX),
            ],
            model_name,
        };

        for name in std::iter::once(&names.model_name).chain(&names.controllers) {
            check_derived(name)?;
        }

        Ok(names)
    }

    /// Controller activated last (the type-specific group controller)
    pub fn group_controller(&self) -> &str {
        self.controllers.last().map(String::as_str).unwrap_or_default()
    }
}

/// Derived names follow the stricter ROS rules: no `__`, no trailing `_`
fn check_derived(name: &str) -> Result<(), NamingError> {
    if !ROS_NAME.is_match(name) || name.contains("__") || name.ends_with('_') {
        return Err(NamingError::MalformedName(name.to_string()));
    }
    Ok(())
}

/// Errors that can occur when deriving names
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum NamingError {
    #[error("Robot type is empty (set --robot-type or DOBOT_TYPE)")]
    Empty,

    #[error("Invalid robot type '{0}': expected letters, digits and '_' starting with a letter")]
    InvalidRobotType(String),

    #[error("Derived name '{0}' is not a valid ROS name")]
    MalformedName(String),
}
