//! Line-oriented operator terminal on stdin.

use std::fmt::Write as _;

use fleet_control::{ControlError, FleetControl, GroupUpdate};
use fleet_core::{Group, PlatformRef, Service};
use fleet_runtime::RuntimeBackend;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{debug, warn};

const HELP: &str = "\
commands:
  group list
  group create <name> <min> <max> <platform> <version>
  group <name>
  group <name> delete
  group <name> edit <min|max|memory|maintenance|platform> <value>
  group <name> edit property <key>[=<value>]
  service list
  service <name>
  service <name> shutdown
  platform list
  help
  shutdown";

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TerminalCommand {
    GroupList,
    GroupCreate {
        name: String,
        min: u32,
        max: u32,
        platform: PlatformRef,
    },
    GroupInfo(String),
    GroupDelete(String),
    GroupEdit { name: String, update: GroupUpdate },
    ServiceList,
    ServiceInfo(String),
    ServiceShutdown(String),
    PlatformList,
    Help,
    Shutdown,
}

/// How the terminal loop ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalExit {
    /// The operator asked the daemon to stop.
    Shutdown,
    /// stdin closed; the daemon keeps running.
    Eof,
}

/// Parse one input line. Blank lines yield `None`.
pub fn parse(line: &str) -> Result<Option<TerminalCommand>, String> {
    let words: Vec<&str> = line.split_whitespace().collect();
    let number = |s: &str| {
        s.parse::<u32>()
            .map_err(|_| format!("'{s}' is not a number"))
    };

    let command = match words.as_slice() {
        [] => return Ok(None),
        ["help"] => TerminalCommand::Help,
        ["shutdown"] | ["stop"] => TerminalCommand::Shutdown,
        ["group", "list"] => TerminalCommand::GroupList,
        ["group", "create", name, min, max, platform, version] => TerminalCommand::GroupCreate {
            name: name.to_string(),
            min: number(*min)?,
            max: number(*max)?,
            platform: PlatformRef::new(*platform, *version),
        },
        ["group", name] => TerminalCommand::GroupInfo(name.to_string()),
        ["group", name, "delete"] => TerminalCommand::GroupDelete(name.to_string()),
        ["group", name, "edit", field, value] => TerminalCommand::GroupEdit {
            name: name.to_string(),
            update: GroupUpdate::parse(*field, *value).map_err(|e| e.to_string())?,
        },
        ["service", "list"] => TerminalCommand::ServiceList,
        ["service", name] => TerminalCommand::ServiceInfo(name.to_string()),
        ["service", name, "shutdown"] => TerminalCommand::ServiceShutdown(name.to_string()),
        ["platform", "list"] => TerminalCommand::PlatformList,
        _ => return Err(format!("unknown command: {line}\n{HELP}")),
    };
    Ok(Some(command))
}

fn group_line(group: &Group) -> String {
    let mut line = format!(
        "{:<16} min={:<3} max={:<3} {} {}MB",
        group.name, group.min_online, group.max_online, group.platform, group.memory_mb
    );
    if group.in_maintenance() {
        line.push_str(" [maintenance]");
    }
    line
}

fn service_line(service: &Service) -> String {
    let handle = service
        .handle
        .as_ref()
        .map(ToString::to_string)
        .unwrap_or_else(|| "-".to_string());
    format!(
        "{:<20} {:<10} {}:{:<6} {}",
        service.name(),
        service.state.label(),
        service.host,
        service.port,
        handle
    )
}

/// Run a parsed command and return the text to show.
pub async fn execute<B: RuntimeBackend>(
    control: &FleetControl<B>,
    command: TerminalCommand,
) -> Result<String, ControlError> {
    let mut out = String::new();
    match command {
        TerminalCommand::Help => out.push_str(HELP),
        TerminalCommand::Shutdown => out.push_str("shutting down"),
        TerminalCommand::GroupList => {
            let groups = control.groups().await;
            if groups.is_empty() {
                out.push_str("no groups");
            }
            for group in groups {
                let _ = writeln!(out, "{}", group_line(&group));
            }
        }
        TerminalCommand::GroupCreate {
            name,
            min,
            max,
            platform,
        } => {
            let group = control
                .create_group(Group::new(name, min, max, platform))
                .await?;
            let _ = write!(out, "created {}", group_line(&group));
        }
        TerminalCommand::GroupInfo(name) => {
            let group = control.group(&name).await?;
            let _ = writeln!(out, "{}", group_line(&group));
            for (key, value) in &group.properties {
                let _ = writeln!(out, "  {key} = {value}");
            }
            for service in control.services_of(&name).await? {
                let _ = writeln!(out, "  {}", service_line(&service));
            }
        }
        TerminalCommand::GroupDelete(name) => {
            control.destroy_group(&name).await?;
            let _ = write!(out, "deleted group {name}");
        }
        TerminalCommand::GroupEdit { name, update } => {
            let group = control.update_group(&name, update).await?;
            let _ = write!(out, "updated {}", group_line(&group));
        }
        TerminalCommand::ServiceList => {
            let services = control.services().await;
            if services.is_empty() {
                out.push_str("no services");
            }
            for service in services {
                let _ = writeln!(out, "{}", service_line(&service));
            }
        }
        TerminalCommand::ServiceInfo(name) => {
            let service = control.service(&name).await?;
            let _ = write!(
                out,
                "{}\n  id: {}\n  group: {}\n  directory: {}",
                service_line(&service),
                service.id,
                service.group,
                service.work_dir.display()
            );
        }
        TerminalCommand::ServiceShutdown(name) => {
            control.shutdown_service(&name).await?;
            let _ = write!(out, "stopped {name}");
        }
        TerminalCommand::PlatformList => {
            for platform in control.platforms() {
                let versions: Vec<&str> = platform.versions.iter().map(|v| v.version.as_str()).collect();
                let _ = writeln!(out, "{:<12} {:?} {}", platform.name, platform.kind, versions.join(", "));
            }
        }
    }
    Ok(out.trim_end().to_string())
}

/// Read commands from stdin until `shutdown` or end of input.
pub async fn run<B: RuntimeBackend>(control: FleetControl<B>) -> TerminalExit {
    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        let line = match lines.next_line().await {
            Ok(Some(line)) => line,
            Ok(None) => {
                debug!("stdin closed, terminal disabled");
                return TerminalExit::Eof;
            }
            Err(e) => {
                warn!(error = %e, "failed to read stdin, terminal disabled");
                return TerminalExit::Eof;
            }
        };

        let command = match parse(&line) {
            Ok(Some(command)) => command,
            Ok(None) => continue,
            Err(usage) => {
                println!("{usage}");
                continue;
            }
        };
        let shutdown = command == TerminalCommand::Shutdown;
        match execute(&control, command).await {
            Ok(output) if !output.is_empty() => println!("{output}"),
            Ok(_) => {}
            Err(e) => println!("error: {e}"),
        }
        if shutdown {
            return TerminalExit::Shutdown;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use fleet_runtime::testing::{FakeSubstrate, fixture};

    #[test]
    fn parses_group_commands() {
        assert_eq!(parse("  ").unwrap(), None);
        assert_eq!(parse("group list").unwrap(), Some(TerminalCommand::GroupList));
        assert_eq!(
            parse("group create lobby 2 5 paper 1.21").unwrap(),
            Some(TerminalCommand::GroupCreate {
                name: "lobby".to_string(),
                min: 2,
                max: 5,
                platform: PlatformRef::new("paper", "1.21"),
            })
        );
        assert_eq!(
            parse("group lobby edit max 8").unwrap(),
            Some(TerminalCommand::GroupEdit {
                name: "lobby".to_string(),
                update: GroupUpdate::MaxOnline(8),
            })
        );
        assert_eq!(
            parse("group lobby delete").unwrap(),
            Some(TerminalCommand::GroupDelete("lobby".to_string()))
        );
    }

    #[test]
    fn parses_property_edits() {
        assert_eq!(
            parse("group lobby edit property motd=Welcome").unwrap(),
            Some(TerminalCommand::GroupEdit {
                name: "lobby".to_string(),
                update: GroupUpdate::Property {
                    key: "motd".to_string(),
                    value: Some("Welcome".to_string()),
                },
            })
        );
    }

    #[test]
    fn parses_service_commands() {
        assert_eq!(
            parse("service lobby-1 shutdown").unwrap(),
            Some(TerminalCommand::ServiceShutdown("lobby-1".to_string()))
        );
        assert_eq!(
            parse("service lobby-1").unwrap(),
            Some(TerminalCommand::ServiceInfo("lobby-1".to_string()))
        );
        assert_eq!(parse("shutdown").unwrap(), Some(TerminalCommand::Shutdown));
    }

    #[test]
    fn rejects_malformed_input() {
        assert!(parse("group create lobby two 5 paper 1.21").is_err());
        assert!(parse("group lobby edit colour red").is_err());
        assert!(parse("dance").unwrap_err().contains("unknown command"));
    }

    #[tokio::test]
    async fn executes_against_control() {
        let fx = fixture(FakeSubstrate::new(), 47000).await.unwrap();
        let control = FleetControl::new(fx.runtime.clone(), fx.events.clone());

        let out = execute(&control, parse("group create lobby 1 2 paper 1.21").unwrap().unwrap())
            .await
            .unwrap();
        assert!(out.starts_with("created lobby"));

        let out = execute(&control, TerminalCommand::GroupList).await.unwrap();
        assert!(out.contains("paper:1.21"));

        let err = execute(&control, TerminalCommand::ServiceInfo("lobby-9".to_string()))
            .await
            .unwrap_err();
        assert_eq!(err.to_string(), "there is no service named 'lobby-9'");
    }
}
