//! Plugin commands: listing, install, remove, dependency check, updates and run.

use std::sync::Arc;

use anyhow::{bail, Result};
use icy_core::{Capability, PluginDescriptor};
use icy_plugins::{find_updates, Launch, LoadFailure, PluginUpdate};
use serde::Serialize;

use crate::app::App;
use crate::terminal_output::{note_info, note_success, note_warn, paint, render_table, Column, DIM, YELLOW};

#[derive(Debug, Serialize)]
struct PluginRow {
    class_name: String,
    name: String,
    version: String,
    kind: String,
    status: String,
}

fn kind_of(plugin: &PluginDescriptor) -> &'static str {
    if plugin.has_capability(Capability::Daemon) {
        "daemon"
    } else if plugin.has_capability(Capability::Actionable) {
        "action"
    } else if plugin.has_capability(Capability::Importer) {
        "importer"
    } else {
        "library"
    }
}

fn print_rows(rows: &[PluginRow], json: bool) -> Result<()> {
    if json {
        println!("{}", serde_json::to_string_pretty(rows)?);
        return Ok(());
    }
    let columns = [
        Column::left("Class").max(48),
        Column::left("Name").max(24),
        Column::right("Version"),
        Column::left("Kind"),
        Column::left("Status"),
    ];
    let cells: Vec<Vec<String>> = rows
        .iter()
        .map(|r| vec![r.class_name.clone(), r.name.clone(), r.version.clone(), r.kind.clone(), r.status.clone()])
        .collect();
    print!("{}", render_table(&columns, &cells));
    Ok(())
}

/// Installed plugins, followed by the packages that failed to load.
pub async fn list(app: &App, json: bool) -> Result<()> {
    app.loader.wait_loaded().await?;
    let active = app.loader.active_daemons();

    let mut rows: Vec<PluginRow> = app
        .loader
        .plugins()
        .iter()
        .map(|p| {
            let status = if p.is_bundled() {
                "bundled"
            } else if active.contains(p.ident()) {
                "running"
            } else if p.has_capability(Capability::Daemon) && !p.is_enabled() {
                "disabled"
            } else {
                "installed"
            };
            PluginRow {
                class_name: p.class_name().to_string(),
                name: p.name(),
                version: p.version().to_string(),
                kind: kind_of(p).to_string(),
                status: status.to_string(),
            }
        })
        .collect();

    for failure in app.loader.failures() {
        let status = match &failure {
            LoadFailure::NeedsNewerHost { required, .. } => format!("needs Icy {required}"),
            LoadFailure::MissingDependency { missing, .. } => format!("missing {missing}"),
            LoadFailure::NotAPlugin(_) => "not a plugin".to_string(),
            LoadFailure::Fatal { .. } => "broken".to_string(),
        };
        rows.push(PluginRow {
            class_name: failure.class_name().to_string(),
            name: String::new(),
            version: String::new(),
            kind: String::new(),
            status,
        });
    }

    print_rows(&rows, json)?;
    for unsatisfied in app.loader.unsatisfied_dependencies() {
        note_warn(&format!("{} needs {}", unsatisfied.plugin, unsatisfied.dependency));
    }
    Ok(())
}

/// Repository catalog, optionally with full descriptors.
pub async fn available(app: &App, details: bool, json: bool) -> Result<()> {
    app.loader.wait_loaded().await?;
    app.repository.wait_loaded().await?;
    if app.repository.is_failed() {
        bail!("No repository could be reached");
    }
    if details {
        app.repository.load_all_descriptors().await;
    }

    let rows: Vec<PluginRow> = app
        .repository
        .plugins()
        .iter()
        .map(|p| {
            let status = match app.loader.plugin(p.class_name()) {
                Some(local) if local.ident().is_older(p.ident()) => format!("update from {}", local.version()),
                Some(_) => "installed".to_string(),
                None if p.is_beta() => "beta".to_string(),
                None => String::new(),
            };
            PluginRow {
                class_name: p.class_name().to_string(),
                name: p.name(),
                version: p.version().to_string(),
                kind: if p.is_descriptor_loaded() { kind_of(p).to_string() } else { String::new() },
                status,
            }
        })
        .collect();
    print_rows(&rows, json)?;

    if details && !json {
        for plugin in app.repository.plugins() {
            let name = plugin.name();
            let meta = plugin.meta();
            if !meta.description.is_empty() {
                println!("\n{name} {}", paint(&format!("by {}", meta.author), DIM));
                println!("  {}", meta.description);
            }
        }
    }
    Ok(())
}

/// Finds each class in the repository catalog.
async fn lookup(app: &App, classes: &[String]) -> Result<Vec<Arc<PluginDescriptor>>> {
    app.repository.wait_loaded().await?;
    let mut found = Vec::new();
    for class in classes {
        match app.repository.plugin(class) {
            Some(plugin) => found.push(plugin),
            None => bail!("{class} is not offered by any enabled repository"),
        }
    }
    Ok(found)
}

pub async fn install(app: &App, classes: &[String]) -> Result<()> {
    app.loader.wait_loaded().await?;
    for plugin in lookup(app, classes).await? {
        if !app.installer.install(plugin.clone(), app.show_progress()) {
            note_info(&format!("{} is already queued", plugin.ident()));
        }
    }
    app.installer.wait_install().await?;

    let report = app.installer.state().last_install.unwrap_or_default();
    for ident in &report.installed {
        note_success(&format!("Installed {ident}"));
    }
    for ident in &report.needs_newer_host {
        note_warn(&format!("Installed {ident}, but it needs a newer Icy"));
    }
    if !report.failed.is_empty() {
        let names: Vec<String> = report.failed.iter().map(ToString::to_string).collect();
        bail!("Installation failed: {}", names.join(", "));
    }
    Ok(())
}

pub async fn remove(app: &App, classes: &[String]) -> Result<()> {
    app.loader.wait_loaded().await?;
    for class in classes {
        let Some(plugin) = app.loader.plugin(class) else {
            bail!("{class} is not installed");
        };
        if plugin.is_bundled() {
            bail!("{class} ships with Icy and cannot be removed");
        }
        let dependents: Vec<String> = app
            .loader
            .dependents_of(plugin.ident())
            .iter()
            .map(|d| d.class_name().to_string())
            .collect();
        if !dependents.is_empty() {
            note_warn(&format!("{class} is required by {}", dependents.join(", ")));
        }
        app.installer.remove(plugin, app.show_progress());
    }
    app.installer.wait_remove().await?;

    let report = app.installer.state().last_remove.unwrap_or_default();
    for ident in &report.removed {
        note_success(&format!("Removed {ident}"));
    }
    if !report.failed.is_empty() {
        let names: Vec<String> = report.failed.iter().map(ToString::to_string).collect();
        bail!("Removal failed: {}", names.join(", "));
    }
    Ok(())
}

/// Reinstalls missing, outdated or broken dependencies of installed plugins.
pub async fn check(app: &App) -> Result<()> {
    let queued = app
        .loader
        .check_plugins(&app.installer, &app.repository, app.show_progress())
        .await?;
    if queued.is_empty() {
        note_success("All plugin dependencies are satisfied");
        return Ok(());
    }
    for plugin in &queued {
        note_info(&format!("Installing dependency {}", plugin.ident()));
    }
    app.installer.wait_install().await?;

    let report = app.installer.state().last_install.unwrap_or_default();
    if !report.failed.is_empty() {
        bail!("{} dependency install(s) failed", report.failed.len());
    }
    note_success(&format!("{} dependency install(s) done", queued.len()));
    Ok(())
}

pub async fn updates(app: &App, apply: bool, json: bool) -> Result<()> {
    app.loader.wait_loaded().await?;
    app.repository.wait_loaded().await?;
    let updates: Vec<PluginUpdate> = find_updates(&app.loader.plugins(), &app.repository.plugins());

    if json {
        let summaries: Vec<_> = updates.iter().map(PluginUpdate::summary).collect();
        println!("{}", serde_json::to_string_pretty(&summaries)?);
    } else if updates.is_empty() {
        note_success("All plugins are up to date");
    } else {
        let columns = [Column::left("Class"), Column::right("Installed"), Column::right("Available")];
        let rows: Vec<Vec<String>> = updates
            .iter()
            .map(|u| {
                let s = u.summary();
                let available = if s.beta { paint(&format!("{} (beta)", s.available), YELLOW) } else { s.available };
                vec![s.class_name, s.installed, available]
            })
            .collect();
        print!("{}", render_table(&columns, &rows));
    }

    if apply && !updates.is_empty() {
        let queued = icy_plugins::updater::apply(&app.installer, &updates, app.show_progress());
        app.installer.wait_install().await?;
        let report = app.installer.state().last_install.unwrap_or_default();
        if !report.failed.is_empty() {
            bail!("{} of {queued} update(s) failed", report.failed.len());
        }
        note_success(&format!("{queued} update(s) installed"));
    }
    Ok(())
}

/// Runs an installed plugin; threaded plugins are joined before returning.
pub async fn run(app: &App, class: &str) -> Result<()> {
    app.loader.wait_loaded().await?;
    if let Some(failure) = app.loader.load_failure(class) {
        bail!("{class} cannot be loaded: {failure}");
    }

    let launcher = app.launcher();
    let loader = app.loader.clone();
    let class_name = class.to_string();
    let launch = tokio::task::spawn_blocking(move || -> Result<Launch> {
        match launcher.start_class(&loader, &class_name)? {
            Launch::Spawned(handle) => {
                if handle.join().is_err() {
                    bail!("{class_name} thread panicked");
                }
                Ok(Launch::Completed)
            }
            other => Ok(other),
        }
    })
    .await??;

    match launch {
        Launch::Completed => Ok(()),
        Launch::Interrupted => {
            note_info(&format!("{class} was interrupted"));
            Ok(())
        }
        Launch::NotRunnable => bail!("{class} has nothing to run"),
        Launch::Failed => bail!("{class} failed, see the log for details"),
        Launch::Spawned(_) => Ok(()),
    }
}
