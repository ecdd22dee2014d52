use crate::builtin::register_builtins;
use crate::cli::RunArgs;
use crate::config::builder::build_config;
use crate::config::models::AppConfig;
use crate::error::Result;
use crate::render::{RenderOptions, render_tree};
use crate::scenario::build_transaction;
use crate::ui::{CliProgressHandler, UiEvent};
use molstate::core::models::ids::Ref;
use molstate::core::tree::StateTree;
use molstate::engine::error::EngineError;
use molstate::engine::update::TransactionResult;
use molstate::workflows::session::Session;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::mpsc;
use tracing::{debug, info};

pub async fn run(args: RunArgs, ui_sender: mpsc::Sender<UiEvent>) -> Result<()> {
    info!("Loading scenario from {:?}", &args.scenario);
    let app = build_config(&args)?;
    debug!("Engine configuration: {:?}", app.engine);

    let progress_handler = CliProgressHandler::new(ui_sender);
    let session = Session::new(app.engine.clone()).with_progress(progress_handler.reporter());
    register_builtins(session.registry()).map_err(EngineError::from)?;

    println!(
        "Running {} transaction(s) from {}",
        app.transactions.len(),
        app.scenario_path.display()
    );
    apply_scenario(&session, &app, |line| println!("{}", line)).await
}

/// Submits every transaction of the scenario in order, reporting through
/// `emit`. Stops at the first transaction the engine rejects.
pub async fn apply_scenario(
    session: &Session,
    app: &AppConfig,
    mut emit: impl FnMut(String),
) -> Result<()> {
    let removed_objects = Arc::new(AtomicUsize::new(0));
    let counter = removed_objects.clone();
    let mut subscription = session.on_object_removed(move |event| {
        if event.object.is_some() {
            counter.fetch_add(1, Ordering::SeqCst);
        }
    });

    let options = RenderOptions {
        show_hidden: app.show_hidden,
    };
    let total = app.transactions.len();
    let mut outcome = Ok(());
    for (i, file_tx) in app.transactions.iter().enumerate() {
        let index = i + 1;
        let tree = session.get_tree();
        let result = match build_transaction(index, file_tx, &tree) {
            Ok(tx) => session.submit_transaction(tx).await.map_err(Into::into),
            Err(e) => Err(e),
        };
        let result = match result {
            Ok(result) => result,
            Err(e) => {
                outcome = Err(e);
                break;
            }
        };

        let removed = removed_objects.swap(0, Ordering::SeqCst);
        let title = match &file_tx.name {
            Some(name) => format!("Transaction {} '{}'", index, name),
            None => format!("Transaction {}", index),
        };
        emit(summarize(&title, &result, removed));
        for line in error_lines(&session.get_tree(), &result) {
            emit(line);
        }

        if app.render_each || index == total {
            emit(render_tree(&session.get_tree(), &session.cells(), options));
        }
    }

    subscription.unsubscribe();
    outcome
}

fn summarize(title: &str, result: &TransactionResult, removed_objects: usize) -> String {
    let failed = result.errors().count();
    let cancelled = result.cancelled().count();
    let mut line = format!(
        "{}: {} added, {} removed, {} recomputed",
        title,
        result.diff.added.len(),
        result.diff.removed.len(),
        result.recomputed()
    );
    if failed > 0 {
        line.push_str(&format!(", {} failed", failed));
    }
    if cancelled > 0 {
        line.push_str(&format!(", {} superseded", cancelled));
    }
    if removed_objects > 0 {
        line.push_str(&format!(", {} object(s) disposed", removed_objects));
    }
    line
}

fn error_lines(tree: &StateTree, result: &TransactionResult) -> Vec<String> {
    result
        .failures()
        .map(|failure| match &failure {
            EngineError::TransformFailed { node_ref, reason } => {
                format!("  ! {}: {}", display_name(tree, *node_ref), reason)
            }
            EngineError::Cancelled(node_ref) => {
                format!("  ~ {}: superseded", display_name(tree, *node_ref))
            }
            other => format!("  ! {}", other),
        })
        .collect()
}

fn display_name(tree: &StateTree, node_ref: Ref) -> String {
    tree.node(node_ref)
        .and_then(|node| node.tag.clone())
        .unwrap_or_else(|| node_ref.to_string())
}
