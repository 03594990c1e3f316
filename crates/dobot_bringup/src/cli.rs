//! Command-line interface for dobot_bringup

use crate::naming::ROBOT_TYPE_ENV;
use crate::sequencer::Profile;
use argh::FromArgs;
use std::collections::HashMap;
use std::time::Duration;

/// Event-sequenced bringup of a simulated Dobot arm
#[derive(FromArgs, Debug)]
pub struct BringupArgs {
    /// robot type, e.g. cr3 (default: $DOBOT_TYPE)
    #[argh(option, short = 'r')]
    pub robot_type: Option<String>,

    /// path to a bringup file (default: built-in gazebo bringup)
    #[argh(option, short = 'f')]
    pub file: Option<String>,

    /// override bringup arguments (format: key:=value)
    #[argh(option, short = 'a', from_str_fn(parse_arg_override))]
    pub arg: Vec<(String, String)>,

    /// bringup profile: gazebo or rsp (default: gazebo)
    #[argh(option, short = 'p', default = "Profile::Gazebo")]
    pub profile: Profile,

    /// use an already resolved robot description instead of running xacro
    #[argh(option)]
    pub description_file: Option<String>,

    /// show the bringup plan without executing
    #[argh(switch)]
    pub dry_run: bool,

    /// validate the bringup file and exit
    #[argh(switch)]
    pub validate: bool,

    /// seconds to wait for processes to exit on shutdown (default: 5)
    #[argh(option, default = "5")]
    pub shutdown_timeout_secs: u64,

    /// log level (error, warn, info, debug, trace)
    #[argh(option, short = 'l', default = "String::from(\"info\")")]
    pub log_level: String,
}

/// Parse argument override in format "key:=value"
fn parse_arg_override(s: &str) -> Result<(String, String), String> {
    let parts: Vec<&str> = s.splitn(2, ":=").collect();
    if parts.len() != 2 {
        return Err(format!(
            "Invalid argument format '{}'. Expected 'key:=value'",
            s
        ));
    }
    Ok((parts[0].to_string(), parts[1].to_string()))
}

impl BringupArgs {
    /// Convert argument overrides to a HashMap
    pub fn arg_overrides(&self) -> HashMap<String, String> {
        self.arg.iter().cloned().collect()
    }

    /// Robot type from the command line, falling back to the environment
    pub fn robot_type(&self) -> Option<String> {
        self.robot_type
            .clone()
            .or_else(|| std::env::var(ROBOT_TYPE_ENV).ok())
            .filter(|t| !t.trim().is_empty())
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_secs(self.shutdown_timeout_secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_arg_override() {
        let result = parse_arg_override("world_file:=empty.world");
        assert_eq!(result, Ok(("world_file".to_string(), "empty.world".to_string())));
    }

    #[test]
    fn test_parse_arg_override_with_equals() {
        let result = parse_arg_override("world_file:=/worlds/a:=b.world");
        assert_eq!(
            result,
            Ok(("world_file".to_string(), "/worlds/a:=b.world".to_string()))
        );
    }

    #[test]
    fn test_parse_arg_override_invalid() {
        let result = parse_arg_override("invalid");
        assert!(result.is_err());
    }

    #[test]
    fn test_from_args() {
        let args = BringupArgs::from_args(
            &["dobot_bringup"],
            &[
                "--robot-type",
                "cr5",
                "-a",
                "world_file:=empty.world",
                "--profile",
                "rsp",
                "--dry-run",
            ],
        )
        .unwrap();

        assert_eq!(args.robot_type(), Some("cr5".to_string()));
        assert_eq!(args.profile, Profile::Rsp);
        assert!(args.dry_run);
        assert_eq!(args.arg_overrides()["world_file"], "empty.world");
        assert_eq!(args.shutdown_timeout(), Duration::from_secs(5));
        assert_eq!(args.log_level, "info");
    }
}
