mod check_shape;
mod entities;
mod run;

use anyhow::Result;
use clap::ArgMatches;

/// Run the selected subcommand; `Ok(false)` means checks ran and failed.
pub async fn dispatch(matches: &ArgMatches) -> Result<bool> {
    match matches.subcommand() {
        Some(("run", sub_m)) => run::handle(sub_m).await,
        Some(("entities", sub_m)) => entities::handle(sub_m).await,
        Some(("check-shape", sub_m)) => check_shape::handle(sub_m).await,
        _ => anyhow::bail!("Unknown command. Run 'crudprobe --help' for usage."),
    }
}

/// Process exit code for an error: the engine's classification, else 1.
pub fn exit_code(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<crudprobe_core::Error>()
        .map_or(1, crudprobe_core::Error::exit_code)
}
