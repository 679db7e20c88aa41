//! Purpose: Hold top-level CLI command dispatch for `stocktake`.
//! Exports: `dispatch_command`.
//! Role: Keep `main.rs` focused on parse/bootstrap and delegate command execution.
//! Invariants: Mutations report through the view model notification, then exit.
//! Invariants: Helpers in `main.rs` remain the source of output formatting.

use super::*;
use stocktake::api::Action;

pub(super) fn dispatch_command(command: Command, ctx: &CliContext) -> Result<RunOutcome, Error> {
    match command {
        Command::Completion { shell } => {
            let mut cmd = Cli::command();
            clap_complete::aot::generate(shell, &mut cmd, "stocktake", &mut io::stdout());
            Ok(RunOutcome::ok())
        }
        Command::Version => {
            emit_version_output(ctx.color_mode);
            Ok(RunOutcome::ok())
        }
        Command::Serve(args) => {
            let bind = args.bind.parse().map_err(|_| {
                Error::new(ErrorKind::Usage)
                    .with_message("invalid bind address")
                    .with_hint("Use a host:port value like 127.0.0.1:9800.")
            })?;
            let config = serve::ServeConfig {
                bind,
                data: args.data,
                token: args.token,
                allow_non_loopback: args.allow_non_loopback,
            };
            let runtime = tokio::runtime::Builder::new_multi_thread()
                .enable_all()
                .build()
                .map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to start runtime")
                        .with_source(err)
                })?;
            runtime.block_on(serve::serve(config))?;
            Ok(RunOutcome::ok())
        }
        Command::List {
            view,
            page,
            page_size,
            json,
        } => {
            let (mut inventory, _store) = ctx.open_inventory()?;
            inventory.list().map_err(failure_error)?;
            inventory.dispatch(Action::SetSearch(view.search.clone()));
            inventory.dispatch(Action::SetSort(view.sort_spec()));
            inventory.dispatch(Action::SetPageSize(page_size));
            inventory.dispatch(Action::SetPage(page));
            let projection = inventory.view();

            let is_tty = io::stdout().is_terminal();
            if json || !is_tty {
                let value = serde_json::to_value(&projection).map_err(|err| {
                    Error::new(ErrorKind::Internal)
                        .with_message("failed to encode listing")
                        .with_source(err)
                })?;
                emit_json(value, ctx.color_mode);
            } else {
                let use_color = ctx.color_mode.use_color(is_tty);
                println!(
                    "{}",
                    render::render_table(&projection, inventory.state().theme, use_color)
                );
            }
            Ok(RunOutcome::ok())
        }
        Command::Add { name, quantity } => {
            let (mut inventory, store) = ctx.open_inventory()?;
            let result = inventory.add(&name, quantity.as_deref());
            finish_mutation(&inventory, result, &store, item_details(&name), ctx)
        }
        Command::Remove { name } => {
            let (mut inventory, store) = ctx.open_inventory()?;
            let result = inventory.remove(&name);
            finish_mutation(&inventory, result, &store, item_details(&name), ctx)
        }
        Command::Edit {
            name,
            new_name,
            quantity,
        } => {
            let (mut inventory, store) = ctx.open_inventory()?;
            let result = inventory.edit(&name, &new_name, quantity.as_deref());
            let mut details = item_details(&new_name);
            if new_name != name {
                details.insert("renamed_from".to_string(), json!(name));
            }
            finish_mutation(&inventory, result, &store, details, ctx)
        }
        Command::Delete { name } => {
            let (mut inventory, store) = ctx.open_inventory()?;
            let result = inventory.delete(&name);
            finish_mutation(&inventory, result, &store, item_details(&name), ctx)
        }
        Command::Export { view, output } => {
            let (mut inventory, store) = ctx.open_inventory()?;
            inventory.list().map_err(failure_error)?;
            inventory.dispatch(Action::SetSearch(view.search.clone()));
            inventory.dispatch(Action::SetSort(view.sort_spec()));
            let csv = inventory.export_csv();
            let Some(path) = output else {
                println!("{csv}");
                return Ok(RunOutcome::ok());
            };
            std::fs::write(&path, csv.as_bytes()).map_err(|err| {
                Error::new(ErrorKind::Io)
                    .with_message("failed to write csv")
                    .with_path(&path)
                    .with_source(err)
            })?;
            let rows = inventory.view().matched;
            let mut details = Map::new();
            details.insert("path".to_string(), json!(path.display().to_string()));
            details.insert("rows".to_string(), json!(rows));
            let notice = Notice {
                kind: "success".to_string(),
                time: notice_time_now().unwrap_or_default(),
                cmd: "export".to_string(),
                store,
                message: format!("Exported {rows} items"),
                details,
            };
            emit_notice(&notice, ctx.color_mode);
            Ok(RunOutcome::ok())
        }
    }
}

fn item_details(name: &str) -> Map<String, Value> {
    let mut details = Map::new();
    details.insert("item".to_string(), json!(name));
    details
}

fn finish_mutation<S: ItemStore>(
    inventory: &Inventory<S>,
    result: Result<(), Failure>,
    store: &str,
    details: Map<String, Value>,
    ctx: &CliContext,
) -> Result<RunOutcome, Error> {
    match result {
        Ok(()) => {
            emit_state_notices(inventory, store, details, ctx.color_mode);
            Ok(RunOutcome::ok())
        }
        Err(failure) => Err(failure_error(failure)),
    }
}
