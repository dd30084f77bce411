//! User-facing notifications.
//!
//! The visual toast UI lives outside this system; the pipeline only talks to
//! this interface. The default implementation routes through the log at the
//! matching level.

use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Notice {
    Info,
    Success,
    Warning,
    Error,
}

pub trait Notifier: Send + Sync {
    fn notify(&self, kind: Notice, message: &str);
}

/// Log-backed notifier used by the CLI.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, kind: Notice, message: &str) {
        match kind {
            Notice::Info | Notice::Success => info!("{message}"),
            Notice::Warning => warn!("{message}"),
            Notice::Error => error!("{message}"),
        }
    }
}
