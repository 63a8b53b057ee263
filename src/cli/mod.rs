//! PF-040: CLI subcommands: init, validate, run, show.

use crate::core::action::{Selection, StepApplier};
use crate::core::parser;
use crate::core::playground::{MutationOutcome, Playground};
use crate::core::session::PlaygroundSession;
use crate::core::types::*;
use crate::error::PlaygroundError;
use crate::gateway::local::LocalGateway;
use crate::gateway::{store, PlaygroundView, PreparationGateway, Tour};
use clap::Subcommand;
use std::path::{Path, PathBuf};
use std::sync::Arc;

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Initialize a new prepflow project
    Init {
        /// Directory to initialize (default: current)
        #[arg(default_value = ".")]
        path: PathBuf,
    },

    /// Validate a playground script without touching the store
    Validate {
        /// Path to the script
        #[arg(short, long, default_value = "playground.yaml")]
        file: PathBuf,
    },

    /// Replay a script against the local store
    Run {
        /// Path to the script
        #[arg(short, long, default_value = "playground.yaml")]
        file: PathBuf,

        /// Store directory
        #[arg(long, default_value = "store")]
        store: PathBuf,

        /// Compare the final recipe against the stored chain; exit non-zero on drift
        #[arg(long)]
        verify: bool,

        /// Grid rows to print
        #[arg(long, default_value_t = 10)]
        rows: usize,
    },

    /// List stored preparations, or the recipe of one
    Show {
        /// Store directory
        #[arg(long, default_value = "store")]
        store: PathBuf,

        /// Preparation id
        #[arg(short, long)]
        preparation: Option<String>,
    },
}

/// Dispatch a CLI command.
pub fn dispatch(cmd: Commands) -> Result<(), String> {
    match cmd {
        Commands::Init { path } => cmd_init(&path),
        Commands::Validate { file } => cmd_validate(&file),
        Commands::Run {
            file,
            store,
            verify,
            rows,
        } => cmd_run(&file, &store, verify, rows),
        Commands::Show { store, preparation } => cmd_show(&store, preparation.as_deref()),
    }
}

const TEMPLATE: &str = r#"version: "1.0"
name: my-preparation
description: "Replayed by prepflow"

config:
  tours: false

datasets:
  customers:
    name: customers
    csv: |
      id,firstname,city
      1,Ronald,Paris
      2,john,Lyon
      3,Ronald,

operations:
  - op: append
    action: uppercase
    columns: [firstname]
  - op: append
    action: fillemptywithdefault
    columns: [city]
    parameters:
      default_value: Nantes
  - op: rename
    name: customers clean
"#;

fn cmd_init(path: &Path) -> Result<(), String> {
    let script_path = path.join("playground.yaml");
    if script_path.exists() {
        return Err(format!("{} already exists", script_path.display()));
    }

    let store_dir = path.join("store");
    std::fs::create_dir_all(&store_dir).map_err(|e| format!("cannot create store dir: {}", e))?;
    std::fs::write(&script_path, TEMPLATE)
        .map_err(|e| format!("cannot write {}: {}", script_path.display(), e))?;

    println!("Initialized prepflow project at {}", path.display());
    println!("  Created: {}", script_path.display());
    println!("  Created: {}/", store_dir.display());
    Ok(())
}

fn cmd_validate(file: &Path) -> Result<(), String> {
    let script = parser::parse_script_file(file)?;
    let errors = parser::validate_script(&script);

    if errors.is_empty() {
        println!(
            "OK: {} ({} datasets, {} operations)",
            script.name,
            script.datasets.len(),
            script.operations.len()
        );
        Ok(())
    } else {
        for e in &errors {
            eprintln!("  ERROR: {}", e);
        }
        Err(format!("{} validation error(s)", errors.len()))
    }
}

/// Parse and validate a script file, returning errors if invalid.
fn parse_and_validate(file: &Path) -> Result<PlaygroundScript, String> {
    let script = parser::parse_script_file(file)?;
    let errors = parser::validate_script(&script);
    if errors.is_empty() {
        return Ok(script);
    }
    for e in &errors {
        eprintln!("  ERROR: {}", e);
    }
    Err("validation failed".to_string())
}

fn runtime() -> Result<tokio::runtime::Runtime, String> {
    tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .map_err(|e| format!("cannot start runtime: {}", e))
}

/// View that forwards render signals to the log.
struct ConsoleView;

impl PlaygroundView for ConsoleView {
    fn show_grid(&self, content: &GridContent, focus: Option<&str>) {
        log::debug!(
            "grid: {} columns, {} records (focus {})",
            content.columns.len(),
            content.records.len(),
            focus.unwrap_or("-")
        );
    }

    fn show_recipe(&self) {
        log::info!("recipe panel shown");
    }

    fn tour(&self, tour: Tour) {
        log::info!("tour started: {:?}", tour);
    }

    fn load_failed(&self, error: &PlaygroundError) {
        log::error!("load failed: {}", error);
    }
}

fn cmd_run(file: &Path, store_dir: &Path, verify: bool, rows: usize) -> Result<(), String> {
    let script = parse_and_validate(file)?;
    let base_dir = file.parent().unwrap_or_else(|| Path::new("."));
    runtime()?.block_on(run_script(&script, base_dir, store_dir, verify, rows))
}

async fn run_script(
    script: &PlaygroundScript,
    base_dir: &Path,
    store_dir: &Path,
    verify: bool,
    rows: usize,
) -> Result<(), String> {
    let gateway = Arc::new(LocalGateway::open(store_dir)?);
    for (id, dataset) in &script.datasets {
        let text = parser::dataset_text(dataset, base_dir)?;
        gateway
            .add_dataset(id, &dataset.name, &text, dataset.parameters.clone())
            .await
            .map_err(|e| format!("dataset '{}': {}", id, e))?;
    }

    let playground = Playground::local(gateway, Arc::new(ConsoleView), script.config.clone());
    let opened = match (&script.preparation, script.start_dataset()) {
        (Some(id), _) => playground.load_preparation(id).await,
        (None, Some(id)) => playground.load_dataset(id).await,
        (None, None) => return Err("script declares no dataset and no preparation".to_string()),
    };
    opened.map_err(|e| e.to_string())?;

    println!(
        "Running: {} ({} operations)",
        script.name,
        script.operations.len()
    );
    for (i, op) in script.operations.iter().enumerate() {
        let summary = apply_op(&playground, op)
            .await
            .map_err(|e| format!("operation {} ({}): {}", i + 1, op.kind(), e))?;
        println!("  [{}] {}: {}", i + 1, op.kind(), summary);
    }

    let session = playground.session().await;
    println!();
    print_session(&session, rows);

    if verify {
        if session.preparation.is_none() {
            println!("Verify: no preparation open, skipped.");
            return Ok(());
        }
        let findings = playground.verify().await.map_err(|e| e.to_string())?;
        if !findings.is_empty() {
            for f in &findings {
                println!("  DRIFTED: {}", f);
            }
            return Err(format!("{} drift finding(s)", findings.len()));
        }
        println!("Verify: recipe and grid match the stored chain.");
    }
    Ok(())
}

fn resolve_column(session: &PlaygroundSession, key: &str) -> Result<ColumnRef, String> {
    session
        .grid
        .as_ref()
        .and_then(|g| g.columns.iter().find(|c| c.id == key || c.name == key))
        .map(|c| ColumnRef::new(c.id.clone(), c.name.clone()))
        .ok_or_else(|| format!("unknown column '{}'", key))
}

fn step_at(session: &PlaygroundSession, index: usize) -> Result<Step, String> {
    session
        .recipe
        .steps()
        .get(index)
        .cloned()
        .ok_or_else(|| {
            format!(
                "no step at position {} ({} steps)",
                index,
                session.recipe.len()
            )
        })
}

fn outcome(result: MutationOutcome, applied: &str, unchanged: &str) -> String {
    match result {
        MutationOutcome::Applied => applied.to_string(),
        MutationOutcome::Unchanged => unchanged.to_string(),
    }
}

/// Replay one script operation. Returns a one-line summary.
async fn apply_op(playground: &Playground, op: &ScriptOp) -> Result<String, String> {
    let session = playground.session().await;
    let err = |e: PlaygroundError| e.to_string();

    match op {
        ScriptOp::Append {
            action,
            scope,
            columns,
            row,
            parameters,
            filter,
        } => {
            let columns = columns
                .iter()
                .map(|c| resolve_column(&session, c))
                .collect::<Result<Vec<_>, _>>()?;
            let selection = Selection {
                columns,
                line: *row,
                apply_on_filters: filter.is_some(),
                filter: filter.clone(),
            };
            let applied = StepApplier::new(action.clone(), *scope, selection)
                .apply(playground, parameters)
                .await
                .map_err(err)?;
            let tour = applied
                .tour
                .map(|t| format!(" (tour: {:?})", t))
                .unwrap_or_default();
            Ok(format!("{} -> {} step(s){}", action, applied.step_count, tour))
        }
        ScriptOp::Update { step, parameters } => {
            let target = step_at(&session, *step)?;
            let result = playground
                .update_step(&target, parameters.clone())
                .await
                .map_err(err)?;
            Ok(outcome(result, "updated", "parameters unchanged, skipped"))
        }
        ScriptOp::Preview { step, parameters } => {
            let target = step_at(&session, *step)?;
            let preview = playground
                .preview_update(&target, parameters.clone())
                .await
                .map_err(err)?;
            Ok(match preview {
                Some(content) => format!(
                    "{} record(s) at step {}, nothing committed",
                    content.records.len(),
                    session.recipe.active_threshold_index().map_or(0, |i| i + 1)
                ),
                None => "inactive step or parameters unchanged, skipped".to_string(),
            })
        }
        ScriptOp::Move { from, to } => {
            let result = playground
                .update_step_order(*from, *to)
                .await
                .map_err(err)?;
            Ok(outcome(result, "moved", "out of range or same position, skipped"))
        }
        ScriptOp::Remove { step } => {
            let target = step_at(&session, *step)?;
            playground.remove_step(&target).await.map_err(err)?;
            Ok(format!("removed {}", target.action))
        }
        ScriptOp::Toggle { step } => {
            let target = step_at(&session, *step)?;
            playground.toggle_step(&target).await.map_err(err)?;
            let after = playground.session().await;
            let active = after.recipe.active_threshold_index().map_or(0, |i| i + 1);
            Ok(format!("{} of {} step(s) active", active, after.recipe.len()))
        }
        ScriptOp::Rename { name } => {
            playground
                .create_or_update_preparation(name)
                .await
                .map_err(err)?;
            Ok(format!("named '{}'", name))
        }
        ScriptOp::EditCell {
            row,
            column,
            value,
            update_all,
        } => {
            let column = resolve_column(&session, column)?;
            let record = session
                .grid
                .as_ref()
                .and_then(|g| g.records.iter().find(|r| r.tdp_id == *row))
                .ok_or_else(|| format!("no row {}", row))?;
            let applied = playground
                .edit_cell(record, &column, value, *update_all, &Selection::default())
                .await
                .map_err(err)?;
            Ok(format!("{} -> {} step(s)", column.id, applied.step_count))
        }
        ScriptOp::DatasetParams {
            separator,
            encoding,
        } => {
            let mut parameters = session
                .dataset
                .as_ref()
                .map(|d| d.parameters.clone())
                .unwrap_or_default();
            if let Some(s) = separator {
                parameters.separator = s.clone();
            }
            if let Some(e) = encoding {
                parameters.encoding = e.clone();
            }
            playground
                .change_dataset_parameters(parameters)
                .await
                .map_err(err)?;
            Ok("reloaded".to_string())
        }
        ScriptOp::ChangeColumn {
            column,
            column_type,
            domain,
        } => {
            let column = resolve_column(&session, column)?;
            let patch = ColumnPatch {
                column_type: column_type.clone(),
                domain: domain.clone(),
            };
            playground
                .change_column_type(&column.id, patch)
                .await
                .map_err(err)?;
            Ok(format!("column {} changed", column.id))
        }
        ScriptOp::Save { folder, name } => {
            playground
                .save_preparation(folder, name)
                .await
                .map_err(err)?;
            Ok(format!("saved as '{}' in {}", name, folder))
        }
        ScriptOp::Copy { from } => {
            playground.copy_steps(from).await.map_err(err)?;
            let after = playground.session().await;
            Ok(format!("{} step(s) after copy", after.recipe.len()))
        }
        ScriptOp::Undo => Ok(outcome(
            playground.undo().await.map_err(err)?,
            "undone",
            "nothing to undo",
        )),
        ScriptOp::Redo => Ok(outcome(
            playground.redo().await.map_err(err)?,
            "redone",
            "nothing to redo",
        )),
        ScriptOp::Close => {
            playground.close().await.map_err(err)?;
            Ok("closed".to_string())
        }
    }
}

fn describe_step(step: &Step) -> String {
    let target = step
        .column_id()
        .map(|c| format!(" [{}]", c))
        .unwrap_or_default();
    let params: Vec<String> = step
        .parameters
        .iter()
        .filter(|(k, _)| !crate::core::action::IMPLICIT_PARAMETERS.contains(&k.as_str()))
        .map(|(k, v)| format!("{}={}", k, v))
        .collect();
    if params.is_empty() {
        format!("{}{}", step.action, target)
    } else {
        format!("{}{} {}", step.action, target, params.join(" "))
    }
}

/// Display the recipe and the top of the grid.
fn print_session(session: &PlaygroundSession, rows: usize) {
    let Some(ref preparation) = session.preparation else {
        println!("No preparation open.");
        return;
    };
    let draft = if preparation.draft { ", draft" } else { "" };
    println!(
        "Recipe: {} ({}{}, {} steps)",
        preparation.name,
        preparation.id,
        draft,
        session.recipe.len()
    );
    for (i, step) in session.recipe.steps().iter().enumerate() {
        let symbol = if step.inactive { "-" } else { "+" };
        println!("  {} {} {}", symbol, i, describe_step(step));
    }

    if let Some(ref grid) = session.grid {
        println!();
        let header: Vec<&str> = grid.columns.iter().map(|c| c.name.as_str()).collect();
        println!("  {}", header.join(" | "));
        for record in grid.records.iter().take(rows) {
            let cells: Vec<&str> = grid
                .columns
                .iter()
                .map(|c| record.get(&c.id).unwrap_or(""))
                .collect();
            println!("  {}", cells.join(" | "));
        }
        if grid.records.len() > rows {
            println!("  ... {} more row(s)", grid.records.len() - rows);
        }
    }
}

fn cmd_show(store_dir: &Path, preparation: Option<&str>) -> Result<(), String> {
    if !store::store_file_path(store_dir).exists() {
        return Err(format!("no store at {}", store_dir.display()));
    }
    let gateway = LocalGateway::open(store_dir)?;
    runtime()?.block_on(async {
        match preparation {
            Some(id) => {
                let details = gateway
                    .get_details(&PreparationId::new(id))
                    .await
                    .map_err(|e| e.to_string())?;
                println!(
                    "Preparation: {} ({})",
                    details.preparation.name, details.preparation.id
                );
                println!("  Dataset: {}", details.preparation.dataset_id);
                println!("  Folder:  {}", details.preparation.folder_id);
                println!(
                    "  Head:    {}",
                    details.head().map(StepId::as_str).unwrap_or("-")
                );
                for (i, (step, action)) in details
                    .steps
                    .iter()
                    .skip(1)
                    .zip(details.actions.iter())
                    .enumerate()
                {
                    let step = Step {
                        id: step.clone(),
                        action: action.action.clone(),
                        parameters: action.parameters.clone(),
                        inactive: false,
                    };
                    println!("    {} {}", i, describe_step(&step));
                }
            }
            None => {
                let preparations = gateway.list_preparations().await.map_err(|e| e.to_string())?;
                if preparations.is_empty() {
                    println!("No preparations stored.");
                }
                for p in &preparations {
                    let details = gateway.get_details(&p.id).await.map_err(|e| e.to_string())?;
                    println!(
                        "{}: {} [{}] ({} steps)",
                        p.id,
                        p.name,
                        p.folder_id,
                        details.actions.len()
                    );
                }
            }
        }
        Ok(())
    })
}
