pub mod init_log;

pub use init_log::{init_log, init_log_for_tests};
