//! Bringup sequencer - turns a robot type into an orchestration plan
//!
//! The gazebo profile launches the simulator, the description publisher
//! and the entity spawner together, then chains the controller loads:
//!
//! ```text
//! spawn_entity exits -> load_joint_state_broadcaster
//! load_joint_state_broadcaster exits -> load_<type>_group_controller
//! ```
//!
//! Each follow-on starts on any exit of its trigger, successful or not.

use crate::config::{
    BringupFile, CommandSpec, DescriptionSpec, ResolverKind, SubstitutionContext,
    SubstitutionError,
};
use crate::description::{DescriptionSource, RobotDescription};
use crate::naming::{NamingError, RobotNames, DESCRIPTION_TOPIC};
use crate::runtime::{Action, ConfigurationError, OrchestrationPlan};
use std::collections::HashMap;
use std::fmt;
use std::path::PathBuf;
use std::str::FromStr;

/// Action id of the simulator
pub const SIMULATOR: &str = "simulator";
/// Action id of the description publisher
pub const STATE_PUBLISHER: &str = "robot_state_publisher";
/// Action id of the entity spawner
pub const SPAWN_ENTITY: &str = "spawn_entity";

/// Parameter carrying the robot description
const ROBOT_DESCRIPTION_PARAM: &str = "robot_description";

/// Action id of the process loading `controller`
pub fn load_controller_id(controller: &str) -> String {
    format!("load_{}", controller)
}

/// Which bringup to run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Profile {
    /// Simulator, description publisher, spawn, controller chain
    #[default]
    Gazebo,
    /// Only the MoveIt robot state publisher
    Rsp,
}

impl FromStr for Profile {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "gazebo" => Ok(Profile::Gazebo),
            "rsp" => Ok(Profile::Rsp),
            _ => Err(format!("Unknown profile '{}'. Expected 'gazebo' or 'rsp'", s)),
        }
    }
}

impl fmt::Display for Profile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Profile::Gazebo => write!(f, "gazebo"),
            Profile::Rsp => write!(f, "rsp"),
        }
    }
}

/// Builds plans for one robot type
#[derive(Debug)]
pub struct BringupSequencer<'a> {
    file: &'a BringupFile,
    names: RobotNames,
    subst_ctx: SubstitutionContext,
}

impl<'a> BringupSequencer<'a> {
    /// Derive names and build the substitution context
    pub fn new(
        file: &'a BringupFile,
        robot_type: &str,
        arg_overrides: HashMap<String, String>,
    ) -> Result<Self, SequencerError> {
        let names = RobotNames::derive(robot_type)?;

        let mut args = HashMap::new();
        for (name, def) in &file.args {
            args.insert(name.clone(), def.default.as_str());
        }

        // Apply overrides
        for (name, value) in arg_overrides {
            if !file.args.contains_key(&name) {
                return Err(SequencerError::UnknownArgument(name));
            }
            args.insert(name, value);
        }

        let subst_ctx = SubstitutionContext::new()
            .with_args(args)
            .with_arg("robot_type", names.robot_type.as_str())
            .with_arg("model_name", names.model_name.as_str())
            .with_arg("entity_name", names.entity_name.as_str())
            .with_arg("description_file", names.description_file.as_str())
            .with_arg("description_topic", DESCRIPTION_TOPIC)
            .with_envs(file.env.clone());

        Ok(Self {
            file,
            names,
            subst_ctx,
        })
    }

    pub fn names(&self) -> &RobotNames {
        &self.names
    }

    /// Where the description for `profile` comes from
    pub fn description_source(&self, profile: Profile) -> Result<DescriptionSource, SequencerError> {
        let spec: &DescriptionSpec = match profile {
            Profile::Gazebo => &self.file.description.gazebo,
            Profile::Rsp => &self.file.description.rsp,
        };

        let path = PathBuf::from(self.substitute(&spec.path, "description path")?);
        Ok(match spec.resolver {
            ResolverKind::Xacro => DescriptionSource::Xacro {
                executable: spec.xacro.clone(),
                file: path,
            },
            ResolverKind::File => DescriptionSource::File(path),
        })
    }

    /// Build the plan for `profile`
    pub fn plan(
        &self,
        profile: Profile,
        description: &RobotDescription,
    ) -> Result<OrchestrationPlan, SequencerError> {
        let stages = &self.file.stages;

        let plan = match profile {
            Profile::Gazebo => {
                let simulator = self.action(SIMULATOR, &stages.simulator, None)?;
                let state_publisher =
                    self.action(STATE_PUBLISHER, &stages.state_publisher, Some(description))?;
                let spawn = self.action(SPAWN_ENTITY, &stages.spawn_entity, None)?;

                let mut builder = OrchestrationPlan::builder()
                    .launch(simulator)
                    .launch(state_publisher)
                    .launch(spawn);

                // Each controller load waits for the exit of the previous stage
                let mut trigger = SPAWN_ENTITY.to_string();
                for controller in &self.names.controllers {
                    let id = load_controller_id(controller);
                    let load = self
                        .action(&id, &stages.controller_loader, None)?
                        .arg(controller.as_str());
                    builder = builder.on_exit(trigger.as_str(), vec![load]);
                    trigger = id;
                }

                builder.build()?
            }
            Profile::Rsp => OrchestrationPlan::builder()
                .launch(self.action(
                    STATE_PUBLISHER,
                    &stages.rsp_state_publisher,
                    Some(description),
                )?)
                .build()?,
        };

        log::debug!(
            "Built {} plan for '{}' with {} chain(s)",
            profile,
            self.names.robot_type,
            plan.chains().len()
        );
        Ok(plan)
    }

    /// Build one action from a command template
    fn action(
        &self,
        id: &str,
        spec: &CommandSpec,
        description: Option<&RobotDescription>,
    ) -> Result<Action, SequencerError> {
        let context = format!("stage '{}'", id);

        let executable = self.substitute(&spec.executable, &context)?;
        let args = self
            .subst_ctx
            .substitute_all(&spec.raw_args)
            .map_err(|e| SequencerError::SubstitutionFailed {
                context: format!("{} args", context),
                source: e,
            })?;

        let mut action = Action::new(id, executable).args(args).output(spec.output);

        if !spec.parameters.is_empty() || description.is_some() {
            action = action.arg("--ros-args");
            for (name, value) in &spec.parameters {
                let value = self.substitute(value, &format!("{} parameter '{}'", context, name))?;
                action = action.arg("-p").arg(format!("{}:={}", name, value));
            }
            // Passed through untouched, never substituted
            if let Some(description) = description {
                action = action
                    .arg("-p")
                    .arg(format!("{}:={}", ROBOT_DESCRIPTION_PARAM, description.as_str()));
            }
        }

        let mut env: Vec<_> = spec.env.iter().collect();
        env.sort();
        for (key, value) in env {
            let value = self.substitute(value, &format!("{} env '{}'", context, key))?;
            action = action.env(key.as_str(), value);
        }

        Ok(action)
    }

    fn substitute(&self, input: &str, context: &str) -> Result<String, SequencerError> {
        self.subst_ctx
            .substitute(input)
            .map_err(|e| SequencerError::SubstitutionFailed {
                context: context.to_string(),
                source: e,
            })
    }
}

/// Errors that can occur while building a plan
#[derive(Debug, thiserror::Error)]
pub enum SequencerError {
    #[error("Naming error: {0}")]
    Naming(#[from] NamingError),

    #[error("Unknown argument: {0}")]
    UnknownArgument(String),

    #[error("Substitution failed in {context}: {source}")]
    SubstitutionFailed {
        context: String,
        #[source]
        source: SubstitutionError,
    },

    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigurationError),
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::ActionId;

    fn overrides() -> HashMap<String, String> {
        HashMap::from([
            ("world_file".to_string(), "/worlds/ur10.world".to_string()),
            ("description_dir".to_string(), "/descriptions/urdf".to_string()),
            ("moveit_config_dir".to_string(), "/moveit/config".to_string()),
        ])
    }

    fn description() -> RobotDescription {
        RobotDescription::new("<robot name=\"foo_robot\"/>")
    }

    #[test]
    fn test_gazebo_plan_for_foo() {
        let file = BringupFile::builtin().unwrap();
        let sequencer = BringupSequencer::new(&file, "foo", overrides()).unwrap();
        let plan = sequencer.plan(Profile::Gazebo, &description()).unwrap();

        let immediate: Vec<_> = plan.immediate().iter().map(|a| a.id().as_str()).collect();
        assert_eq!(immediate, vec![SIMULATOR, STATE_PUBLISHER, SPAWN_ENTITY]);

        let bindings: Vec<_> = plan
            .bindings()
            .iter()
            .map(|b| (b.trigger().as_str(), b.on_exit()[0].id().as_str()))
            .collect();
        assert_eq!(
            bindings,
            vec![
                (SPAWN_ENTITY, "load_joint_state_broadcaster"),
                ("load_joint_state_broadcaster", "load_foo_group_controller"),
            ]
        );

        let jsb = plan.action("load_joint_state_broadcaster").unwrap();
        assert_eq!(
            jsb.arguments(),
            ["control", "load_controller", "--set-state", "active", "joint_state_broadcaster"]
        );
        let group = plan.action("load_foo_group_controller").unwrap();
        assert_eq!(group.arguments().last().unwrap(), "foo_group_controller");
    }

    #[test]
    fn test_gazebo_stage_arguments() {
        let file = BringupFile::builtin().unwrap();
        let sequencer = BringupSequencer::new(&file, "cr3", overrides()).unwrap();
        let plan = sequencer.plan(Profile::Gazebo, &description()).unwrap();

        let simulator = plan.action(SIMULATOR).unwrap();
        assert_eq!(simulator.executable(), "ros2");
        assert_eq!(
            simulator.arguments().last().unwrap(),
            "gz_args:=/worlds/ur10.world"
        );

        let spawn = plan.action(SPAWN_ENTITY).unwrap();
        assert_eq!(
            &spawn.arguments()[3..],
            ["-topic", "robot_description", "-name", "cr3_robot"]
        );

        let publisher = plan.action(STATE_PUBLISHER).unwrap();
        assert_eq!(
            &publisher.arguments()[3..],
            ["--ros-args", "-p", "robot_description:=<robot name=\"foo_robot\"/>"]
        );
    }

    #[test]
    fn test_description_is_not_substituted() {
        let file = BringupFile::builtin().unwrap();
        let sequencer = BringupSequencer::new(&file, "cr3", overrides()).unwrap();
        let raw = RobotDescription::new("<robot name=\"$(arg robot_type)\"/>");
        let plan = sequencer.plan(Profile::Gazebo, &raw).unwrap();

        let publisher = plan.action(STATE_PUBLISHER).unwrap();
        assert_eq!(
            publisher.arguments().last().unwrap(),
            "robot_description:=<robot name=\"$(arg robot_type)\"/>"
        );
    }

    #[test]
    fn test_rsp_plan() {
        let file = BringupFile::builtin().unwrap();
        let sequencer = BringupSequencer::new(&file, "cr3", overrides()).unwrap();
        let plan = sequencer.plan(Profile::Rsp, &description()).unwrap();

        assert_eq!(plan.immediate().len(), 1);
        assert!(plan.bindings().is_empty());
        let publisher = &plan.immediate()[0];
        assert_eq!(publisher.id(), &ActionId::from(STATE_PUBLISHER));
        assert!(publisher
            .arguments()
            .contains(&"publish_frequency:=15.0".to_string()));
    }

    #[test]
    fn test_description_sources() {
        let file = BringupFile::builtin().unwrap();
        let sequencer = BringupSequencer::new(&file, "cr5", overrides()).unwrap();

        assert_eq!(
            sequencer.description_source(Profile::Gazebo).unwrap(),
            DescriptionSource::Xacro {
                executable: "xacro".to_string(),
                file: PathBuf::from("/descriptions/urdf/cr5_robot.xacro"),
            }
        );
        assert_eq!(
            sequencer.description_source(Profile::Rsp).unwrap(),
            DescriptionSource::Xacro {
                executable: "xacro".to_string(),
                file: PathBuf::from("/moveit/config/cr5_robot.urdf.xacro"),
            }
        );
    }

    #[test]
    fn test_unknown_override_is_rejected() {
        let file = BringupFile::builtin().unwrap();
        let overrides = HashMap::from([("no_such_arg".to_string(), "1".to_string())]);
        let result = BringupSequencer::new(&file, "cr3", overrides);
        assert!(matches!(result, Err(SequencerError::UnknownArgument(_))));
    }

    #[test]
    fn test_malformed_robot_type_fails_before_planning() {
        let file = BringupFile::builtin().unwrap();
        let result = BringupSequencer::new(&file, "cr 3", overrides());
        assert!(matches!(result, Err(SequencerError::Naming(_))));
    }

    #[test]
    fn test_profile_parsing() {
        assert_eq!("gazebo".parse::<Profile>(), Ok(Profile::Gazebo));
        assert_eq!("RSP".parse::<Profile>(), Ok(Profile::Rsp));
        assert!("moveit".parse::<Profile>().is_err());
    }
}
