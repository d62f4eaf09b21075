//! Script domain types
//!
//! A stage is driven by a [`Script`]: either one command, or an ordered list
//! of named task groups. Groups run one after another; the commands inside a
//! group run concurrently.
//!
//! Configuration shape:
//! - `"npm test"` is a single shell command
//! - `["rsync", "-a", "src/", "dst/"]` is a single argument-vector command
//! - `{ "install": ["cd api && npm ci", "cd web && npm ci"], "build": "make" }`
//!   is a list of task groups, kept in source order

use serde::de::{self, MapAccess, SeqAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;

/// A single command
///
/// Lines written by the operator are run through the platform shell.
/// Commands the system assembles from branch, commit or path values are
/// always [`Command::Exec`] so those values never reach a shell parser.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "CommandRepr", into = "CommandRepr")]
pub enum Command {
    /// Command line handed to `sh -c` (or `cmd /C` on Windows)
    Shell(String),

    /// Program and argument vector, executed directly
    Exec { program: String, args: Vec<String> },
}

impl Command {
    pub fn shell(line: impl Into<String>) -> Self {
        Self::Shell(line.into())
    }

    pub fn exec<I, S>(program: impl Into<String>, args: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self::Exec {
            program: program.into(),
            args: args.into_iter().map(Into::into).collect(),
        }
    }

    /// Returns a copy with extra arguments appended
    ///
    /// Shell lines are returned unchanged; appending to them would mean
    /// interpolating into a shell string.
    pub fn with_args<I, S>(&self, extra: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        match self {
            Self::Shell(_) => self.clone(),
            Self::Exec { program, args } => {
                let mut args = args.clone();
                args.extend(extra.into_iter().map(Into::into));
                Self::Exec {
                    program: program.clone(),
                    args,
                }
            }
        }
    }

    fn is_blank(&self) -> bool {
        match self {
            Self::Shell(line) => line.trim().is_empty(),
            Self::Exec { program, .. } => program.trim().is_empty(),
        }
    }
}

impl fmt::Display for Command {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Shell(line) => write!(f, "{}", line.trim()),
            Self::Exec { program, args } => {
                write!(f, "{}", program)?;
                for arg in args {
                    if arg.is_empty() || arg.contains(char::is_whitespace) {
                        write!(f, " {:?}", arg)?;
                    } else {
                        write!(f, " {}", arg)?;
                    }
                }
                Ok(())
            }
        }
    }
}

/// Serialized form of a command: a string or an argument vector
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum CommandRepr {
    Line(String),
    Argv(Vec<String>),
}

impl TryFrom<CommandRepr> for Command {
    type Error = String;

    fn try_from(repr: CommandRepr) -> Result<Self, Self::Error> {
        match repr {
            CommandRepr::Line(line) => Ok(Command::Shell(line)),
            CommandRepr::Argv(mut argv) => {
                if argv.is_empty() {
                    return Err("argument vector must contain a program".to_string());
                }
                let program = argv.remove(0);
                Ok(Command::Exec {
                    program,
                    args: argv,
                })
            }
        }
    }
}

impl From<Command> for CommandRepr {
    fn from(command: Command) -> Self {
        match command {
            Command::Shell(line) => CommandRepr::Line(line),
            Command::Exec { program, args } => {
                let mut argv = Vec::with_capacity(args.len() + 1);
                argv.push(program);
                argv.extend(args);
                CommandRepr::Argv(argv)
            }
        }
    }
}

/// A named set of commands dispatched concurrently
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TaskGroup {
    pub name: String,
    pub commands: Vec<Command>,
}

impl TaskGroup {
    pub fn new(name: impl Into<String>, commands: Vec<Command>) -> Self {
        Self {
            name: name.into(),
            commands,
        }
    }
}

/// What a stage executes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Script {
    /// One command, treated as a one-group, one-command script
    Single(Command),

    /// Named task groups in declared order
    Groups(Vec<TaskGroup>),
}

impl Script {
    /// Normalized view: every script as an ordered list of groups
    pub fn task_groups(&self) -> Vec<TaskGroup> {
        match self {
            Script::Single(command) => {
                vec![TaskGroup::new(command.to_string(), vec![command.clone()])]
            }
            Script::Groups(groups) => groups.clone(),
        }
    }

    /// Total number of commands across all groups
    pub fn command_count(&self) -> usize {
        match self {
            Script::Single(_) => 1,
            Script::Groups(groups) => groups.iter().map(|g| g.commands.len()).sum(),
        }
    }

    /// Checks that the script has something to run
    pub fn validate(&self) -> Result<(), String> {
        match self {
            Script::Single(command) if command.is_blank() => {
                Err("command cannot be empty".to_string())
            }
            Script::Single(_) => Ok(()),
            Script::Groups(groups) => {
                if groups.is_empty() {
                    return Err("script must declare at least one task group".to_string());
                }
                for group in groups {
                    if group.commands.is_empty() {
                        return Err(format!("task group '{}' has no commands", group.name));
                    }
                    if group.commands.iter().any(Command::is_blank) {
                        return Err(format!("task group '{}' has an empty command", group.name));
                    }
                }
                Ok(())
            }
        }
    }
}

impl From<Command> for Script {
    fn from(command: Command) -> Self {
        Script::Single(command)
    }
}

impl Serialize for Script {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Script::Single(command) => command.serialize(serializer),
            Script::Groups(groups) => {
                let mut map = serializer.serialize_map(Some(groups.len()))?;
                for group in groups {
                    map.serialize_entry(&group.name, &group.commands)?;
                }
                map.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for Script {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserializer.deserialize_any(ScriptVisitor)
    }
}

/// Commands of one group: a single command or a list of them
#[derive(Deserialize)]
#[serde(untagged)]
enum GroupCommands {
    Many(Vec<Command>),
    One(Command),
}

struct ScriptVisitor;

impl<'de> Visitor<'de> for ScriptVisitor {
    type Value = Script;

    fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("a command string, an argument vector, or a map of task groups")
    }

    fn visit_str<E: de::Error>(self, line: &str) -> Result<Script, E> {
        Ok(Script::Single(Command::shell(line)))
    }

    fn visit_string<E: de::Error>(self, line: String) -> Result<Script, E> {
        Ok(Script::Single(Command::Shell(line)))
    }

    fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Script, A::Error> {
        let mut argv = Vec::new();
        while let Some(arg) = seq.next_element::<String>()? {
            argv.push(arg);
        }
        Command::try_from(CommandRepr::Argv(argv))
            .map(Script::Single)
            .map_err(de::Error::custom)
    }

    fn visit_map<A: MapAccess<'de>>(self, mut map: A) -> Result<Script, A::Error> {
        let mut groups: Vec<TaskGroup> = Vec::new();
        while let Some((name, commands)) = map.next_entry::<String, GroupCommands>()? {
            if groups.iter().any(|g| g.name == name) {
                return Err(de::Error::custom(format!("duplicate task group '{}'", name)));
            }
            let commands = match commands {
                GroupCommands::Many(commands) => commands,
                GroupCommands::One(command) => vec![command],
            };
            groups.push(TaskGroup::new(name, commands));
        }
        Ok(Script::Groups(groups))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_string_is_single_shell_command() {
        let script: Script = serde_json::from_str(r#""npm install && npm test""#).unwrap();
        assert_eq!(
            script,
            Script::Single(Command::shell("npm install && npm test"))
        );
    }

    #[test]
    fn test_array_is_single_argv_command() {
        let script: Script = serde_json::from_str(r#"["pm2", "restart", "all"]"#).unwrap();
        assert_eq!(
            script,
            Script::Single(Command::exec("pm2", ["restart", "all"]))
        );
    }

    #[test]
    fn test_map_keeps_declared_group_order() {
        let script: Script = serde_json::from_str(
            r#"{
                "npm install": ["cd Backend && npm install", "cd Frontend && npm install"],
                "build": "make",
                "assets": [["npm", "run", "assets"]]
            }"#,
        )
        .unwrap();

        let Script::Groups(groups) = script else {
            panic!("expected task groups");
        };
        let names: Vec<_> = groups.iter().map(|g| g.name.as_str()).collect();
        assert_eq!(names, ["npm install", "build", "assets"]);
        assert_eq!(groups[0].commands.len(), 2);
        assert_eq!(groups[1].commands, vec![Command::shell("make")]);
        assert_eq!(
            groups[2].commands,
            vec![Command::exec("npm", ["run", "assets"])]
        );
    }

    #[test]
    fn test_duplicate_group_rejected() {
        let result: Result<Script, _> =
            serde_json::from_str(r#"{ "build": "a", "build": "b" }"#);
        assert!(result.is_err());
    }

    #[test]
    fn test_empty_argv_rejected() {
        let result: Result<Script, _> = serde_json::from_str("[]");
        assert!(result.is_err());
    }

    #[test]
    fn test_serialize_groups_as_map() {
        let script = Script::Groups(vec![
            TaskGroup::new("unit", vec![Command::shell("echo pass")]),
            TaskGroup::new("lint", vec![Command::exec("cargo", ["clippy"])]),
        ]);
        let json = serde_json::to_string(&script).unwrap();
        assert_eq!(json, r#"{"unit":["echo pass"],"lint":[["cargo","clippy"]]}"#);

        let back: Script = serde_json::from_str(&json).unwrap();
        assert_eq!(back, script);
    }

    #[test]
    fn test_single_script_as_task_groups() {
        let script = Script::Single(Command::shell("make all"));
        let groups = script.task_groups();
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].name, "make all");
        assert_eq!(script.command_count(), 1);
    }

    #[test]
    fn test_validate() {
        assert!(Script::Single(Command::shell("  ")).validate().is_err());
        assert!(Script::Groups(vec![]).validate().is_err());
        assert!(
            Script::Groups(vec![TaskGroup::new("empty", vec![])])
                .validate()
                .is_err()
        );
        assert!(
            Script::Groups(vec![TaskGroup::new("ok", vec![Command::shell("true")])])
                .validate()
                .is_ok()
        );
    }

    #[test]
    fn test_display_quotes_arguments_with_spaces() {
        let command = Command::exec("rsync", ["-a", "/srv/my build/", "/var/www/"]);
        assert_eq!(command.to_string(), r#"rsync -a "/srv/my build/" /var/www/"#);
    }

    #[test]
    fn test_with_args_leaves_shell_lines_alone() {
        let shell = Command::shell("deploy.sh");
        assert_eq!(shell.with_args(["x"]), shell);

        let exec = Command::exec("rsync", ["-a"]).with_args(["src/", "dst/"]);
        assert_eq!(exec, Command::exec("rsync", ["-a", "src/", "dst/"]));
    }
}
