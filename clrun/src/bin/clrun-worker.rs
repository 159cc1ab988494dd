// clrun-worker: detached supervisor for one PTY session
//
// Started by `clrun` with null stdio in its own process session. Logs go to
// .clrun/logs/<id>.worker.log; the session record is the only output.

use clap::Parser;
use clrun_lib::logging;
use clrun_lib::session::config::StatePaths;
use clrun_lib::session::worker::{self, WorkerArgs};

fn main() {
    let args = WorkerArgs::parse();
    let paths = StatePaths::new(&args.project_root);
    if let Err(e) = logging::init_worker(&paths.worker_log(args.terminal_id)) {
        eprintln!("failed to open worker log: {e}");
    }

    let terminal_id = args.terminal_id;
    tracing::info!(%terminal_id, restore = args.restore, pid = std::process::id(), "worker starting");

    let runtime = match tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            tracing::error!(error = %e, "failed to build tokio runtime");
            std::process::exit(1);
        }
    };

    match runtime.block_on(worker::run(args)) {
        Ok(exit) => {
            tracing::info!(%terminal_id, ?exit, "worker finished");
        }
        Err(e) => {
            tracing::error!(%terminal_id, error = ?e, "worker failed");
            std::process::exit(1);
        }
    }
}
