//! Dobot Bringup
//!
//! Event-sequenced startup of a simulated Dobot arm.
//!
//! # Overview
//!
//! The bringup:
//! - launches the simulator, the robot description publisher and the
//!   entity spawner together
//! - loads `joint_state_broadcaster` once the spawner has exited
//! - loads `<robot_type>_group_controller` once that load has exited
//!
//! Each follow-on waits for the exit of its trigger process rather than a
//! fixed delay. Process identities and controller names are derived from a
//! single robot type (`DOBOT_TYPE`), see [`naming`].
//!
//! # Example Bringup File
//!
//! ```yaml
//! version: "1.0"
//!
//! args:
//!   world_file:
//!     default: "$(share dobot_gazebo)/worlds/ur10.world"
//!
//! description:
//!   gazebo:
//!     path: "$(share cra_description)/urdf/$(arg description_file)"
//!   rsp:
//!     path: "$(share cr3_moveit)/config/$(arg model_name).urdf.xacro"
//!
//! stages:
//!   simulator:
//!     executable: ros2
//!     raw_args: [launch, ros_gz_sim, gz_sim.launch.py, "gz_args:=$(arg world_file)"]
//!   # state_publisher, rsp_state_publisher, spawn_entity, controller_loader ...
//! ```

pub mod cli;
pub mod config;
pub mod description;
pub mod naming;
pub mod runtime;
pub mod sequencer;

pub use cli::BringupArgs;
pub use config::{BringupFile, BringupFileError, SubstitutionContext, SubstitutionError};
pub use description::{DescriptionError, DescriptionSource, RobotDescription};
pub use naming::{NamingError, RobotNames};
pub use runtime::{
    Action, ActionId, ChainState, ConfigurationError, EventBus, ExitEvent, LaunchFailure,
    OrchestrationPlan, PlanBuilder, ProcessHandle, ProcessStatus, Supervisor, SupervisorConfig,
    SupervisorError,
};
pub use sequencer::{BringupSequencer, Profile, SequencerError};
