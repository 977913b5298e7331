use thiserror::Error;

/// Failure reported by a stage or source. The router reacts to each class
/// differently: corrupt units are skipped, exhaustion is retried under a
/// budget, a lost stream disables only its own chain, a lost source ends the
/// session.
#[derive(Error, Debug)]
pub enum StageError {
    /// Corrupt or truncated input unit; recoverable by skipping the unit.
    #[error("corrupt unit: {0}")]
    Corrupt(String),

    /// Transient shortage of stage resources, e.g. an empty hardware surface
    /// pool. Worth retrying; persistent exhaustion becomes a lost stream.
    #[error("resources exhausted: {0}")]
    Exhausted(String),

    /// The stream's chain is permanently unusable (unsupported parameters,
    /// lost hardware context). Other streams keep running.
    #[error("stream unusable: {0}")]
    StreamLost(String),

    /// The source or a shared device is gone; the whole session is over.
    #[error("session lost: {0}")]
    SourceLost(String),
}

/// Error surfaced from `Router::pull`. Per-unit problems and back-pressure
/// never reach here.
#[derive(Error, Debug)]
pub enum PipelineError {
    /// One stream's chain failed and has been disabled; surfaced exactly once
    /// per stream. Pulls keep working for the remaining streams.
    #[error("stream {index} disabled: {source}")]
    Stream {
        index: usize,
        #[source]
        source: StageError,
    },

    /// The session is unusable; the caller should tear it down.
    #[error("session failed: {0}")]
    Session(#[source] StageError),
}
