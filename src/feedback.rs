/// Fire-and-forget cue collaborator for successful scans.
pub trait FeedbackCue: Send + Sync {
    fn scan_succeeded(&self);
}

/// Production cue. Desktop hosts have no vibrator, so the cue is an
/// info-level event.
#[derive(Debug, Default)]
pub struct LogCue;

impl FeedbackCue for LogCue {
    fn scan_succeeded(&self) {
        tracing::info!("scan succeeded");
    }
}
