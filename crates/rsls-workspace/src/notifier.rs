use std::fmt;

#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum MessageType {
    Error,
    Warning,
    Info,
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageType::Error => f.write_str("error"),
            MessageType::Warning => f.write_str("warning"),
            MessageType::Info => f.write_str("info"),
        }
    }
}

/// User-visible messages from the sync service.
pub trait Notifier: Send + Sync {
    fn show_message(&self, typ: MessageType, title: &str, msg: &str);
}

/// Routes messages to `tracing` when nothing else is listening.
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn show_message(&self, typ: MessageType, title: &str, msg: &str) {
        match typ {
            MessageType::Error => tracing::error!("{}: {}", title, msg),
            MessageType::Warning => tracing::warn!("{}: {}", title, msg),
            MessageType::Info => tracing::info!("{}: {}", title, msg),
        }
    }
}
