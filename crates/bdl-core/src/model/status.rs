//! Bundle status state machine values, stored as strings in the database.

/// Status of a bundle. `Start` is entered on submission, `Init` once the item
/// list is known, `Connecting` while items are transferring (and on every
/// finished item), `Finished` when every item is complete.
///
/// `Pause`, `Cancel`, `ErrorNet` and `ErrorStorage` end the current run; the
/// bundle can be submitted again afterwards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TaskStatus {
    Start,
    Init,
    Queue,
    Connecting,
    Pause,
    Cancel,
    ErrorNet,
    ErrorStorage,
    Finished,
}

impl TaskStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            TaskStatus::Start => "start",
            TaskStatus::Init => "init",
            TaskStatus::Queue => "queue",
            TaskStatus::Connecting => "connecting",
            TaskStatus::Pause => "pause",
            TaskStatus::Cancel => "cancel",
            TaskStatus::ErrorNet => "error_net",
            TaskStatus::ErrorStorage => "error_storage",
            TaskStatus::Finished => "finished",
        }
    }

    /// Unknown strings map to `Pause` so a damaged row is resumable rather than lost.
    pub fn parse_lossy(s: &str) -> Self {
        match s {
            "start" => TaskStatus::Start,
            "init" => TaskStatus::Init,
            "queue" => TaskStatus::Queue,
            "connecting" => TaskStatus::Connecting,
            "pause" => TaskStatus::Pause,
            "cancel" => TaskStatus::Cancel,
            "error_net" => TaskStatus::ErrorNet,
            "error_storage" => TaskStatus::ErrorStorage,
            "finished" => TaskStatus::Finished,
            _ => TaskStatus::Pause,
        }
    }

    /// True for the statuses a running transfer loop polls to stop.
    pub fn is_stopped(self) -> bool {
        matches!(
            self,
            TaskStatus::Pause | TaskStatus::Cancel | TaskStatus::ErrorNet | TaskStatus::ErrorStorage
        )
    }

    /// Error kind carried by an error status.
    pub fn error_kind(self) -> Option<ErrorKind> {
        match self {
            TaskStatus::ErrorNet => Some(ErrorKind::Network),
            TaskStatus::ErrorStorage => Some(ErrorKind::Storage),
            _ => None,
        }
    }
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Class of failure that ended a run.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// Unsuccessful response, transport failure, or resolution failure.
    Network,
    /// Local file I/O or persistence failure.
    Storage,
}

impl ErrorKind {
    pub fn status(self) -> TaskStatus {
        match self {
            ErrorKind::Network => TaskStatus::ErrorNet,
            ErrorKind::Storage => TaskStatus::ErrorStorage,
        }
    }
}
