use tracing::info;

/// Events emitted by the engine. The UI layer subscribes to this stream;
/// the engine itself never blocks on a slow consumer.
#[derive(Debug, Clone, PartialEq)]
pub enum UploadEvent {
    /// Chunk transfer began (or restarted) for a session.
    Started { token: String },
    /// Progress after an acknowledged batch.
    Progress {
        token: String,
        uploaded_chunks: u32,
        total_chunks: u32,
        bytes_per_sec: f64,
        eta_secs: Option<f64>,
    },
    /// A chunk attempt failed and a retry is scheduled.
    Retrying {
        token: String,
        chunk_index: u32,
        attempt: u32,
        max_attempts: u32,
    },
    /// Start was requested while another session is transferring.
    Queued { token: String, message: String },
    Paused { token: String },
    Resumed { token: String },
    /// No progress for too long; the transfer is being restarted.
    /// Informational only — this is not an error state.
    Stalled { token: String },
    Finalizing { token: String },
    Completed { token: String, url: Option<String> },
    Failed { token: String, message: String },
    Cancelled { token: String },
}

impl UploadEvent {
    /// Session token this event concerns.
    pub fn token(&self) -> &str {
        match self {
            Self::Started { token }
            | Self::Progress { token, .. }
            | Self::Retrying { token, .. }
            | Self::Queued { token, .. }
            | Self::Paused { token }
            | Self::Resumed { token }
            | Self::Stalled { token }
            | Self::Finalizing { token }
            | Self::Completed { token, .. }
            | Self::Failed { token, .. }
            | Self::Cancelled { token } => token,
        }
    }
}

/// Callback invoked with progress updates.
pub type ProgressCallback = Box<dyn Fn(&str, u32, u32) + Send + Sync>;
/// Callback invoked once per terminal outcome.
pub type OutcomeCallback = Box<dyn Fn(&str, &str) + Send + Sync>;

/// Caller-supplied callback set, replaced wholesale via
/// [`crate::UploadEngine::configure`]. Ordinary owned state — the engine
/// holds exactly one current set.
#[derive(Default)]
pub struct EngineCallbacks {
    pub on_progress: Option<ProgressCallback>,
    pub on_completed: Option<OutcomeCallback>,
    pub on_failed: Option<OutcomeCallback>,
}

/// Delivery seam for one-shot OS-level notifications.
///
/// Consulted only when the engine's negotiated capabilities allow
/// notifications; the default sink just logs.
pub trait Notifier: Send + Sync {
    fn notify(&self, title: &str, body: &str);
}

/// Default notifier: structured log lines instead of OS notifications.
#[derive(Debug, Default)]
pub struct LogNotifier;

impl Notifier for LogNotifier {
    fn notify(&self, title: &str, body: &str) {
        info!(title, body, "notification");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn event_token_accessor() {
        let e = UploadEvent::Completed {
            token: "t1".into(),
            url: None,
        };
        assert_eq!(e.token(), "t1");

        let e = UploadEvent::Retrying {
            token: "t2".into(),
            chunk_index: 4,
            attempt: 2,
            max_attempts: 10,
        };
        assert_eq!(e.token(), "t2");
    }

    #[test]
    fn callbacks_default_empty() {
        let cb = EngineCallbacks::default();
        assert!(cb.on_progress.is_none());
        assert!(cb.on_completed.is_none());
        assert!(cb.on_failed.is_none());
    }
}
