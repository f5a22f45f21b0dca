use anyhow::{Result, anyhow};
use indicatif::{HumanBytes, ProgressBar, ProgressStyle};
use std::fs;
use std::path::{Path, PathBuf};

use crate::catalog::{self, PgCatalog, Snapshot};
use crate::config::{self, CONFIG_FILE, Settings};
use crate::dump;
use crate::engine::Engine;
use crate::error::BurrowError;
use crate::prompt::{self, Selector, TermSelect};
use crate::remote::RemoteStore;
use crate::server::{self, PgServer, ServerOps};
use colored::*;
use comfy_table::{Attribute, Cell, ContentArrangement, Table, presets::UTF8_FULL};

/// Validated settings plus open connections, shared by every command
/// that talks to the server.
struct Context {
    settings: Settings,
    server: PgServer,
    catalog: PgCatalog,
}

impl Context {
    /// Loads the config and connects. Creates the tracker database and
    /// its table on first contact with a fresh server.
    fn open() -> Result<Self> {
        let settings = Settings::load()?;
        let mut server = PgServer::connect(&settings)?;
        if catalog::ensure_tracker(&mut server)? {
            println!(
                "{} {}",
                "i".yellow().bold(),
                format!("Created tracker database '{}'", catalog::TRACKER_DATABASE).yellow()
            );
        }
        let catalog = PgCatalog::open(&settings)?;
        Ok(Self {
            settings,
            server,
            catalog,
        })
    }

    fn engine(&mut self) -> Engine<'_> {
        Engine::new(
            &mut self.server,
            &mut self.catalog,
            &self.settings.database,
            &self.settings.project,
        )
    }
}

pub fn do_init() -> Result<()> {
    if Path::new(CONFIG_FILE).exists() {
        match Settings::load() {
            Ok(_) => {
                println!(
                    "{} {}",
                    "i".yellow().bold(),
                    format!("{CONFIG_FILE} is already present and complete").yellow()
                );
                if !prompt::confirm("Rewrite it? [y/N] ")? {
                    println!("Aborted.");
                    return Ok(());
                }
            }
            Err(e) => {
                println!(
                    "{} {}",
                    "i".yellow().bold(),
                    format!("Rewriting {CONFIG_FILE}: {e}").yellow()
                );
            }
        }
    }

    let username = prompt::input("Postgres username: ")?;
    let password = prompt::password("Postgres password: ")?;
    let host = prompt::input_default("Host", "127.0.0.1")?;
    let port = prompt::input_default("Port", "5432")?;
    let port: u16 = port
        .parse()
        .map_err(|_| anyhow!("'{port}' is not a valid port number"))?;
    let database = prompt::input("Working database: ")?;
    let project = prompt::input_default("Project name", &config::default_project_name())?;

    let settings = Settings {
        username,
        password,
        host,
        port,
        database,
        project,
        ..Settings::default()
    };
    settings.validate()?;
    settings.save()?;
    println!(
        "{} {}",
        "✔".green().bold(),
        format!("Wrote {CONFIG_FILE}").green()
    );

    // Bootstrap the tracker right away so the first snapshot is quick
    let mut server = PgServer::connect(&settings)?;
    if catalog::ensure_tracker(&mut server)? {
        println!(
            "{} {}",
            "✔".green().bold(),
            format!("Created tracker database '{}'", catalog::TRACKER_DATABASE).green()
        );
    } else {
        println!(
            "{} {}",
            "i".yellow().bold(),
            format!(
                "Tracker database '{}' already present",
                catalog::TRACKER_DATABASE
            )
            .yellow()
        );
    }
    PgCatalog::open(&settings)?;
    Ok(())
}

pub fn do_snapshot(name: Option<String>) -> Result<()> {
    let mut ctx = Context::open()?;
    let name = match name {
        Some(name) => name,
        None => prompt::input("Snapshot name: ")?,
    };
    if name.is_empty() {
        return Err(anyhow!("snapshot name cannot be empty"));
    }

    let bar = create_progress_bar(&format!("Snapshotting '{}'", ctx.settings.database));
    let snapshot = ctx.engine().take_snapshot(&name)?;
    bar.finish_with_message("Snapshot created");
    println!(
        "{} {}",
        "✔".green().bold(),
        format!(
            "Snapshot '{}' created as {}",
            snapshot.name,
            snapshot.physical_name()
        )
        .green()
    );
    Ok(())
}

pub fn do_list() -> Result<()> {
    let mut ctx = Context::open()?;
    let project = ctx.settings.project.clone();
    let snapshots = ctx.engine().snapshots()?;

    if snapshots.is_empty() {
        println!(
            "{} {}",
            "i".yellow().bold(),
            format!("No snapshots in project '{project}'").yellow()
        );
        return Ok(());
    }

    let mut table = Table::new();
    table
        .load_preset(UTF8_FULL)
        .set_content_arrangement(ContentArrangement::Dynamic)
        .set_header(vec![
            Cell::new("Name").add_attribute(Attribute::Bold),
            Cell::new("Hash").add_attribute(Attribute::Bold),
            Cell::new("Created").add_attribute(Attribute::Bold),
        ]);

    for s in &snapshots {
        table.add_row(vec![
            Cell::new(&s.name),
            Cell::new(&s.hash),
            Cell::new(s.created_at.format("%Y-%m-%d %H:%M:%S").to_string()),
        ]);
    }

    println!("{}", table);
    Ok(())
}

pub fn do_restore(name: Option<String>, latest: bool) -> Result<()> {
    let mut ctx = Context::open()?;
    let working = ctx.settings.database.clone();
    let project = ctx.settings.project.clone();
    let mut engine = ctx.engine();

    let snapshot = if latest {
        Some(engine.latest()?)
    } else if let Some(name) = name {
        Some(engine.resolve(&name)?)
    } else {
        let snapshots = engine.snapshots()?;
        pick(
            &mut TermSelect,
            "Select a snapshot to restore:",
            &project,
            snapshots,
        )?
    };
    let Some(snapshot) = snapshot else {
        println!("Aborted.");
        return Ok(());
    };

    if !prompt::confirm(&format!(
        "Replace '{}' with snapshot '{}'? [y/N] ",
        working, snapshot.name
    ))? {
        println!("Aborted.");
        return Ok(());
    }

    let bar = create_progress_bar(&format!("Restoring '{}'", snapshot.name));
    engine.restore_snapshot(&snapshot)?;
    bar.finish_with_message("Restore complete");
    println!(
        "{} {}",
        "✔".green().bold(),
        format!("Restored '{}' from snapshot '{}'", working, snapshot.name).green()
    );
    Ok(())
}

pub fn do_delete(name: Option<String>) -> Result<()> {
    let mut ctx = Context::open()?;
    let project = ctx.settings.project.clone();
    let mut engine = ctx.engine();

    let snapshot = if let Some(name) = name {
        Some(engine.resolve(&name)?)
    } else {
        let snapshots = engine.snapshots()?;
        pick(
            &mut TermSelect,
            "Select a snapshot to delete:",
            &project,
            snapshots,
        )?
    };
    let Some(snapshot) = snapshot else {
        println!("Aborted.");
        return Ok(());
    };

    if !prompt::confirm(&format!(
        "Delete snapshot '{}' from project '{}'? [y/N] ",
        snapshot.name, snapshot.project
    ))? {
        println!("Aborted.");
        return Ok(());
    }

    engine.delete_snapshot(&snapshot)?;
    println!(
        "{} {}",
        "✔".green().bold(),
        format!("Deleted snapshot '{}'", snapshot.name).green()
    );
    Ok(())
}

pub fn do_export(
    bucket: Option<String>,
    region: Option<String>,
    prefix: Option<String>,
) -> Result<()> {
    let settings = Settings::load()?;
    let mut remote = settings.remote()?.clone();
    remote.apply_overrides(bucket, region, prefix);
    remote.validate()?;

    // Check the tool before spending time on anything else
    dump::ensure_tool("pg_dump")?;
    fs::create_dir_all(&settings.backup_dir)?;
    let target = Path::new(&settings.backup_dir).join(dump::dump_filename(&settings.database));

    println!(
        "{} {}",
        "i".yellow().bold(),
        format!("Dumping '{}' to {}", settings.database, target.display()).yellow()
    );
    dump::dump_database(&settings, &target)?;

    let store = RemoteStore::connect(&remote)?;
    let key = store.upload(&target, &settings.project)?;
    println!(
        "{} {}",
        "✔".green().bold(),
        format!("Uploaded {key} to bucket '{}'", remote.bucket).green()
    );
    Ok(())
}

pub fn do_download(
    bucket: Option<String>,
    region: Option<String>,
    prefix: Option<String>,
) -> Result<()> {
    let settings = Settings::load()?;
    let mut remote = settings.remote()?.clone();
    remote.apply_overrides(bucket, region, prefix);
    remote.validate()?;

    let store = RemoteStore::connect(&remote)?;
    let objects = store.list()?;
    if objects.is_empty() {
        println!(
            "{} {}",
            "i".yellow().bold(),
            format!(
                "No dumps under '{}' in bucket '{}'",
                remote.prefix, remote.bucket
            )
            .yellow()
        );
        return Ok(());
    }

    let lines: Vec<String> = objects
        .iter()
        .map(|o| {
            let when = o
                .last_modified
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_else(|| "unknown".to_string());
            format!(
                "{}  {}  {}",
                o.filename(),
                HumanBytes(o.size.max(0) as u64),
                when
            )
        })
        .collect();

    let mut selector = TermSelect;
    let Some(index) = selector.select("Select a dump to download:", &lines)? else {
        println!("Aborted.");
        return Ok(());
    };

    let path = store.download(&objects[index], Path::new(&settings.backup_dir))?;
    println!(
        "{} {}",
        "✔".green().bold(),
        format!("Downloaded to {}", path.display()).green()
    );
    Ok(())
}

pub fn do_load(file: Option<PathBuf>) -> Result<()> {
    let mut ctx = Context::open()?;
    dump::ensure_tool("pg_restore")?;

    let path = match file {
        Some(path) => path,
        None => {
            let backups = Path::new(&ctx.settings.backup_dir);
            let Some(path) = pick_dump(&mut TermSelect, backups)? else {
                println!("Aborted.");
                return Ok(());
            };
            path
        }
    };
    if !path.exists() {
        return Err(anyhow!("dump file '{}' does not exist", path.display()));
    }

    if !prompt::confirm(&format!(
        "Replace '{}' with the contents of '{}'? [y/N] ",
        ctx.settings.database,
        path.display()
    ))? {
        println!("Aborted.");
        return Ok(());
    }

    // Recreate the working database empty, then let pg_restore fill it
    let database = ctx.settings.database.clone();
    ctx.server.terminate_sessions(&database)?;
    if ctx.server.database_exists(&database)? {
        ctx.server.drop_database(&database)?;
    }
    ctx.server.create_database(&database)?;
    dump::restore_database(&ctx.settings, &path)?;

    println!(
        "{} {}",
        "✔".green().bold(),
        format!("Loaded '{}' into '{database}'", path.display()).green()
    );
    Ok(())
}

/// Runs the statements in `<backup_dir>/execute.sql` against the working
/// database, one statement per line. Failing lines are reported and
/// skipped so the rest of the script still runs.
pub fn do_execute() -> Result<()> {
    let settings = Settings::load()?;
    let path = Path::new(&settings.backup_dir).join("execute.sql");
    let script =
        fs::read_to_string(&path).map_err(|_| anyhow!("no script at '{}'", path.display()))?;

    let mut client = server::connect(&settings, &settings.database)?;
    let mut ran = 0usize;
    let mut failed = 0usize;
    for (lineno, line) in script.lines().enumerate() {
        let statement = line.trim();
        if statement.is_empty() || statement.starts_with("--") {
            continue;
        }
        match client.simple_query(statement) {
            Ok(_) => ran += 1,
            Err(e) => {
                failed += 1;
                eprintln!(
                    "{} {}: {}",
                    "!".yellow().bold(),
                    format!("line {}", lineno + 1).yellow(),
                    e
                );
            }
        }
    }

    if failed == 0 {
        println!(
            "{} {}",
            "✔".green().bold(),
            format!("Executed {ran} statements").green()
        );
    } else {
        eprintln!(
            "{} {}",
            "!".yellow().bold(),
            format!("Executed {ran} statements, {failed} failed").yellow()
        );
    }
    Ok(())
}

pub fn do_version() {
    println!("{} {}", "burrow".bold(), env!("CARGO_PKG_VERSION").cyan());
}

/// Offers the snapshots in a menu; `None` means the user cancelled.
fn pick(
    selector: &mut dyn Selector,
    title: &str,
    project: &str,
    snapshots: Vec<Snapshot>,
) -> Result<Option<Snapshot>> {
    if snapshots.is_empty() {
        return Err(BurrowError::NotFound(format!(
            "no snapshots in project '{project}', run 'burrow snapshot'"
        ))
        .into());
    }
    let lines: Vec<String> = snapshots
        .iter()
        .map(|s| format!("{}  ({})", s.name, s.created_at.format("%Y-%m-%d %H:%M:%S")))
        .collect();
    match selector.select(title, &lines)? {
        Some(index) => Ok(snapshots.into_iter().nth(index)),
        None => Ok(None),
    }
}

/// Dump files in the backups directory, newest first. Dump filenames embed
/// their creation time, so lexicographic order is chronological.
fn local_dumps(dir: &Path) -> Result<Vec<PathBuf>> {
    let entries = fs::read_dir(dir).map_err(|_| {
        anyhow!(
            "backups directory '{}' does not exist, run 'burrow download' or 'burrow export' first",
            dir.display()
        )
    })?;
    let mut dumps: Vec<PathBuf> = entries
        .filter_map(|entry| entry.ok())
        .map(|entry| entry.path())
        .filter(|p| p.extension().is_some_and(|e| e == "dump"))
        .collect();
    dumps.sort();
    dumps.reverse();
    Ok(dumps)
}

/// Offers the local dump files in a menu; `None` means the user cancelled.
fn pick_dump(selector: &mut dyn Selector, dir: &Path) -> Result<Option<PathBuf>> {
    let dumps = local_dumps(dir)?;
    if dumps.is_empty() {
        return Err(BurrowError::NotFound(format!(
            "no dump files in '{}', run 'burrow download' or 'burrow export' first",
            dir.display()
        ))
        .into());
    }
    let lines: Vec<String> = dumps
        .iter()
        .map(|p| {
            let name = p
                .file_name()
                .map(|n| n.to_string_lossy().into_owned())
                .unwrap_or_else(|| p.display().to_string());
            match fs::metadata(p) {
                Ok(meta) => format!("{}  {}", name, HumanBytes(meta.len())),
                Err(_) => name,
            }
        })
        .collect();
    match selector.select("Select a dump to load:", &lines)? {
        Some(index) => Ok(dumps.into_iter().nth(index)),
        None => Ok(None),
    }
}

fn create_progress_bar(prefix: &str) -> ProgressBar {
    let bar = ProgressBar::new_spinner();
    bar.set_style(
        ProgressStyle::with_template("{spinner} {msg}")
            .unwrap()
            .tick_chars("⠁⠂⠄⡀⢀⠠⠐⠈ "),
    );
    bar.set_message(prefix.to_string());
    bar.enable_steady_tick(std::time::Duration::from_millis(80));
    bar
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prompt::ScriptedSelect;
    use chrono::NaiveDate;

    fn snapshot(id: i32, name: &str) -> Snapshot {
        Snapshot {
            id,
            hash: format!("{id:032x}"),
            name: name.to_string(),
            project: "testproject".to_string(),
            created_at: NaiveDate::from_ymd_opt(2024, 6, 1)
                .unwrap()
                .and_hms_opt(10, 0, id as u32)
                .unwrap(),
        }
    }

    #[test]
    fn picking_returns_the_chosen_snapshot() {
        let mut selector = ScriptedSelect::new([Some(1)]);
        let snapshots = vec![snapshot(1, "alpha"), snapshot(2, "beta")];
        let picked = pick(&mut selector, "pick", "testproject", snapshots)
            .unwrap()
            .unwrap();
        assert_eq!(picked.name, "beta");
    }

    #[test]
    fn cancelling_the_menu_is_not_an_error() {
        let mut selector = ScriptedSelect::new([None]);
        let snapshots = vec![snapshot(1, "alpha")];
        assert!(
            pick(&mut selector, "pick", "testproject", snapshots)
                .unwrap()
                .is_none()
        );
    }

    #[test]
    fn an_empty_catalog_cannot_be_picked_from() {
        let mut selector = ScriptedSelect::new([Some(0)]);
        let err = pick(&mut selector, "pick", "testproject", Vec::new()).unwrap_err();
        let err = err.downcast::<BurrowError>().unwrap();
        assert!(matches!(err, BurrowError::NotFound(_)));
    }

    #[test]
    fn dump_menus_offer_the_newest_file_first() {
        let dir = tempfile::tempdir().unwrap();
        for name in [
            "devdb_20240101000000.dump",
            "devdb_20240615120000.dump",
            "devdb_20240301080000.dump",
            "notes.txt",
        ] {
            fs::write(dir.path().join(name), b"x").unwrap();
        }
        let mut selector = ScriptedSelect::new([Some(0), Some(2)]);
        let newest = pick_dump(&mut selector, dir.path()).unwrap().unwrap();
        assert_eq!(newest.file_name().unwrap(), "devdb_20240615120000.dump");
        let oldest = pick_dump(&mut selector, dir.path()).unwrap().unwrap();
        assert_eq!(oldest.file_name().unwrap(), "devdb_20240101000000.dump");
    }

    #[test]
    fn cancelling_the_dump_menu_is_not_an_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("devdb_20240101000000.dump"), b"x").unwrap();
        let mut selector = ScriptedSelect::new([None]);
        assert!(pick_dump(&mut selector, dir.path()).unwrap().is_none());
    }

    #[test]
    fn a_directory_without_dumps_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("notes.txt"), b"x").unwrap();
        let mut selector = ScriptedSelect::new([Some(0)]);
        let err = pick_dump(&mut selector, dir.path()).unwrap_err();
        let err = err.downcast::<BurrowError>().unwrap();
        assert!(matches!(err, BurrowError::NotFound(_)));
    }
}
