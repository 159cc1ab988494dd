// Logging setup shared by both binaries
pub mod logging;

// Session management (client operations, worker, stores)
pub mod session;
