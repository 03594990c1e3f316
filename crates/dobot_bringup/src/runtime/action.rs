//! External command invocations

use indexmap::IndexMap;
use serde::{Deserialize, Serialize};
use std::borrow::Borrow;
use std::fmt;

/// Identity of an action and of the process started from it
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ActionId(String);

impl ActionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl Borrow<str> for ActionId {
    fn borrow(&self) -> &str {
        &self.0
    }
}

impl From<&str> for ActionId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

impl From<String> for ActionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

impl From<&ActionId> for ActionId {
    fn from(id: &ActionId) -> Self {
        id.clone()
    }
}

/// Where a process's output goes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OutputMode {
    /// Operator-visible: stdout at info, stderr at warn
    #[default]
    Screen,
    /// Only visible at debug level
    Log,
}

/// One external command invocation
///
/// Built with the consuming setters below; there is no way to change an
/// action once it has been handed to a plan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Action {
    id: ActionId,
    executable: String,
    args: Vec<String>,
    env: IndexMap<String, String>,
    output: OutputMode,
}

impl Action {
    pub fn new(id: impl Into<ActionId>, executable: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            executable: executable.into(),
            args: Vec::new(),
            env: IndexMap::new(),
            output: OutputMode::default(),
        }
    }

    pub fn arg(mut self, arg: impl Into<String>) -> Self {
        self.args.push(arg.into());
        self
    }

    pub fn args<I, S>(mut self, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.args.extend(args.into_iter().map(Into::into));
        self
    }

    pub fn env(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.env.insert(key.into(), value.into());
        self
    }

    pub fn output(mut self, output: OutputMode) -> Self {
        self.output = output;
        self
    }

    pub fn id(&self) -> &ActionId {
        &self.id
    }

    pub fn executable(&self) -> &str {
        &self.executable
    }

    pub fn arguments(&self) -> &[String] {
        &self.args
    }

    pub fn environment(&self) -> &IndexMap<String, String> {
        &self.env
    }

    pub fn output_mode(&self) -> OutputMode {
        self.output
    }

    /// Command line for display, long arguments shortened
    pub fn command_line(&self) -> String {
        const MAX_ARG_LEN: usize = 60;

        let mut line = self.executable.clone();
        for arg in &self.args {
            line.push(' ');
            if arg.chars().count() > MAX_ARG_LEN {
                let head: String = arg.chars().take(MAX_ARG_LEN).collect();
                line.push_str(&format!("{}...({} bytes)", head, arg.len()));
            } else {
                line.push_str(arg);
            }
        }
        line
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let action = Action::new("load_jsb", "ros2")
            .args(["control", "load_controller"])
            .arg("joint_state_broadcaster")
            .env("ROS_DOMAIN_ID", "7")
            .output(OutputMode::Log);

        assert_eq!(action.id().as_str(), "load_jsb");
        assert_eq!(action.executable(), "ros2");
        assert_eq!(
            action.arguments(),
            ["control", "load_controller", "joint_state_broadcaster"]
        );
        assert_eq!(action.environment()["ROS_DOMAIN_ID"], "7");
        assert_eq!(action.output_mode(), OutputMode::Log);
    }

    #[test]
    fn test_command_line_shortens_long_arguments() {
        let urdf = format!("robot_description:={}", "<robot/>".repeat(50));
        let action = Action::new("rsp", "ros2").arg("-p").arg(urdf.clone());

        let line = action.command_line();
        assert!(line.starts_with("ros2 -p robot_description:="));
        assert!(line.ends_with(&format!("...({} bytes)", urdf.len())));
        assert!(line.len() < urdf.len());
    }
}
