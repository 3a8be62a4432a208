/// Failures raised by the charger protocol engine.
///
/// These travel inside `anyhow::Error`; use `downcast_ref::<Error>()` to
/// tell them apart.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    /// No matching datagram arrived before the deadline.
    #[error("recv timeout")]
    Timeout,

    #[error("roundtrip cancelled, charger is shutting down")]
    Cancelled,

    #[error("missing credentials for RFID authorization")]
    MissingCredentials,

    #[error("invalid status: plug {plug}, state {state}")]
    InvalidStatus { plug: u8, state: u8 },

    #[error("invalid current: {0} A")]
    InvalidCurrent(f64),

    #[error("{command} unexpected response: {response}")]
    UnexpectedResponse { command: String, response: String },

    #[error("report {report}: decode failed: {source}")]
    Decode {
        report: u16,
        #[source]
        source: serde_json::Error,
    },

    #[error("expected report, got {0}")]
    NotAReport(String),

    #[error("malformed datagram: {0}")]
    Malformed(#[source] serde_json::Error),

    #[error("dispatcher already started")]
    AlreadyStarted,
}
