//! Dump and restore through the PostgreSQL client tools.
//!
//! `pg_dump` and `pg_restore` run as child processes with their stderr
//! relayed line by line, so the operator sees the tool's own progress
//! output. The exit status is the only success signal.

use std::io::{BufRead, BufReader};
use std::path::Path;
use std::process::{Command, Stdio};

use crate::config::Settings;
use crate::error::{BurrowError, Result};

/// Probes the tool by spawning `--version`. Called before workflows that
/// destroy state, so a missing binary is caught while everything is intact.
pub fn ensure_tool(tool: &str) -> Result<()> {
    let probe = Command::new(tool)
        .arg("--version")
        .stdout(Stdio::null())
        .stderr(Stdio::null())
        .status();
    match probe {
        Ok(status) if status.success() => Ok(()),
        Ok(status) => Err(BurrowError::ToolFailed {
            tool: tool.to_string(),
            status,
        }),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(BurrowError::ToolMissing {
            tool: tool.to_string(),
        }),
        Err(e) => Err(e.into()),
    }
}

/// Timestamped filename for a fresh dump of the given database.
pub fn dump_filename(database: &str) -> String {
    format!(
        "{database}_{}.dump",
        chrono::Local::now().format("%Y%m%d%H%M%S")
    )
}

/// Dumps the working database in custom format into `target`.
pub fn dump_database(settings: &Settings, target: &Path) -> Result<()> {
    run_relaying_stderr("pg_dump", dump_command(settings, target))
}

/// Loads a dump file into the working database. The caller is expected to
/// have dropped and recreated it first.
pub fn restore_database(settings: &Settings, dump_path: &Path) -> Result<()> {
    run_relaying_stderr("pg_restore", restore_command(settings, dump_path))
}

fn dump_command(settings: &Settings, target: &Path) -> Command {
    let mut cmd = Command::new("pg_dump");
    cmd.arg(format!("--host={}", settings.host))
        .arg(format!("--port={}", settings.port))
        .arg(format!("--username={}", settings.username))
        .arg("--format=custom")
        .arg("--verbose")
        .arg(format!("--file={}", target.display()))
        .arg(&settings.database)
        .env("PGPASSWORD", &settings.password);
    cmd
}

fn restore_command(settings: &Settings, dump_path: &Path) -> Command {
    let mut cmd = Command::new("pg_restore");
    cmd.arg(format!("--host={}", settings.host))
        .arg(format!("--port={}", settings.port))
        .arg(format!("--username={}", settings.username))
        .arg("--verbose")
        .arg("--clean")
        .arg("--if-exists")
        .arg("--disable-triggers")
        .arg("--no-acl")
        .arg("--no-owner")
        .arg("-d")
        .arg(&settings.database)
        .arg(dump_path)
        .env("PGPASSWORD", &settings.password);
    cmd
}

/// Program and arguments only. `Command`'s `Debug` output includes the child
/// environment, which carries `PGPASSWORD`.
fn command_line(cmd: &Command) -> String {
    let mut line = cmd.get_program().to_string_lossy().into_owned();
    for arg in cmd.get_args() {
        line.push(' ');
        line.push_str(&arg.to_string_lossy());
    }
    line
}

fn run_relaying_stderr(tool: &str, mut cmd: Command) -> Result<()> {
    cmd.stdout(Stdio::null()).stderr(Stdio::piped());
    tracing::debug!("running {}", command_line(&cmd));

    let mut child = cmd.spawn().map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            BurrowError::ToolMissing {
                tool: tool.to_string(),
            }
        } else {
            BurrowError::Io(e)
        }
    })?;

    if let Some(stderr) = child.stderr.take() {
        for line in BufReader::new(stderr).lines() {
            eprintln!("{}", line?);
        }
    }

    let status = child.wait()?;
    if status.success() {
        Ok(())
    } else {
        Err(BurrowError::ToolFailed {
            tool: tool.to_string(),
            status,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::OsStr;

    fn settings() -> Settings {
        Settings {
            username: "postgres".into(),
            password: "secret".into(),
            host: "localhost".into(),
            port: 5433,
            database: "devproject".into(),
            project: "testproject".into(),
            ..Default::default()
        }
    }

    fn args_of(cmd: &Command) -> Vec<String> {
        cmd.get_args()
            .map(|a| a.to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn dump_command_targets_the_working_database() {
        let cmd = dump_command(&settings(), Path::new(".burrow/devproject_x.dump"));
        assert_eq!(cmd.get_program(), "pg_dump");
        let args = args_of(&cmd);
        assert!(args.contains(&"--host=localhost".to_string()));
        assert!(args.contains(&"--port=5433".to_string()));
        assert!(args.contains(&"--username=postgres".to_string()));
        assert!(args.contains(&"--format=custom".to_string()));
        assert_eq!(args.last().unwrap(), "devproject");
    }

    #[test]
    fn restore_command_keeps_the_destructive_flags_together() {
        let cmd = restore_command(&settings(), Path::new(".burrow/devproject_x.dump"));
        assert_eq!(cmd.get_program(), "pg_restore");
        let args = args_of(&cmd);
        for flag in [
            "--clean",
            "--if-exists",
            "--disable-triggers",
            "--no-acl",
            "--no-owner",
        ] {
            assert!(args.contains(&flag.to_string()), "missing {flag}");
        }
        let d = args.iter().position(|a| a == "-d").unwrap();
        assert_eq!(args[d + 1], "devproject");
        assert_eq!(args.last().unwrap(), ".burrow/devproject_x.dump");
    }

    #[test]
    fn password_travels_through_the_environment_not_the_argv() {
        let cmd = dump_command(&settings(), Path::new("out.dump"));
        let env: Vec<_> = cmd.get_envs().collect();
        assert!(
            env.contains(&(OsStr::new("PGPASSWORD"), Some(OsStr::new("secret")))),
            "PGPASSWORD not set"
        );
        assert!(args_of(&cmd).iter().all(|a| !a.contains("secret")));
    }

    #[test]
    fn logged_command_lines_leave_the_password_out() {
        for cmd in [
            dump_command(&settings(), Path::new("out.dump")),
            restore_command(&settings(), Path::new("out.dump")),
        ] {
            let line = command_line(&cmd);
            assert!(line.contains("--username=postgres"));
            assert!(!line.contains("secret"), "password leaked into {line}");
        }
    }

    #[test]
    fn missing_tool_is_reported_as_such() {
        let err = ensure_tool("definitely-not-a-postgres-tool").unwrap_err();
        assert!(matches!(err, BurrowError::ToolMissing { .. }));
    }

    #[test]
    fn dump_filenames_sort_chronologically() {
        let name = dump_filename("devproject");
        assert!(name.starts_with("devproject_"));
        assert!(name.ends_with(".dump"));
        // devproject_YYYYMMDDHHMMSS.dump
        assert_eq!(name.len(), "devproject_".len() + 14 + ".dump".len());
    }
}
