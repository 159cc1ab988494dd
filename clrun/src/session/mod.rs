// Session orchestration core
// Shared by the clrun CLI and the clrun-worker binary; all coordination goes
// through files under <project>/.clrun/.

pub mod buffer;
pub mod client;
pub mod config;
pub mod error;
pub mod keys;
pub mod ledger;
pub mod lock;
pub mod maintenance;
pub mod persistence;
pub mod process;
pub mod protocol;
pub mod queue;
pub mod recovery;
pub mod restore;
pub mod runtime;
pub mod shell_state;
pub mod worker;
