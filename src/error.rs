use thiserror::Error;

/// Error taxonomy for the security mediation core.
///
/// Propagation policy: `Config` is the only variant that aborts the
/// process at startup. `Auth` never crosses the orchestrator boundary —
/// it is fatal to an executor container, which exits before the
/// dispatcher ever constructs a `CoreError` for it. `Policy`, `Timeout`,
/// and tool-level `Runtime` faults are packaged as `ToolOutput` values by
/// the caller rather than propagated as this enum; these variants exist
/// for the layers with no tool-result channel yet (config parsing,
/// capability minting, the approval store, the bridge socket).
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("config error: {0}")]
    Config(String),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("LLM error: {0}")]
    Llm(String),

    #[error("capability verification failed: {0}")]
    Auth(String),

    #[error("policy violation: {0}")]
    Policy(String),

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("runtime error: {0}")]
    Runtime(String),

    #[error("protocol error: {0}")]
    Protocol(String),

    #[error("transient error: {0}")]
    Transient(String),

    #[error("approval error: {0}")]
    Approval(String),

    #[error("tool not found: {0}")]
    ToolNotFound(String),

    #[error("container runtime error: {0}")]
    Dispatcher(#[from] bollard::errors::Error),
}

pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_display_messages() {
        let cases: Vec<(CoreError, &str)> = vec![
            (CoreError::Config("bad key".into()), "config error: bad key"),
            (CoreError::Llm("timeout".into()), "LLM error: timeout"),
            (CoreError::Auth("bad signature".into()), "capability verification failed: bad signature"),
            (CoreError::Policy("path outside mounts".into()), "policy violation: path outside mounts"),
            (CoreError::Timeout("container".into()), "timeout: container"),
            (CoreError::Runtime("demux failure".into()), "runtime error: demux failure"),
            (CoreError::Protocol("malformed frame".into()), "protocol error: malformed frame"),
            (CoreError::Transient("llm 503".into()), "transient error: llm 503"),
            (CoreError::Approval("not found".into()), "approval error: not found"),
            (CoreError::ToolNotFound("foo".into()), "tool not found: foo"),
        ];
        for (err, expected) in cases {
            assert_eq!(err.to_string(), expected);
        }
    }

    #[test]
    fn error_from_io() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: CoreError = io_err.into();
        assert!(err.to_string().contains("gone"));
    }

    #[test]
    fn error_from_json() {
        let json_err = serde_json::from_str::<serde_json::Value>("{{bad").unwrap_err();
        let err: CoreError = json_err.into();
        assert!(err.to_string().starts_with("JSON error:"));
    }

    #[test]
    fn error_is_debug() {
        let err = CoreError::Config("test".into());
        let dbg = format!("{:?}", err);
        assert!(dbg.contains("Config"));
    }

    #[test]
    fn result_type_alias_works() {
        let ok: Result<i32> = Ok(42);
        assert_eq!(ok.unwrap(), 42);
        let err: Result<i32> = Err(CoreError::Runtime("fail".into()));
        assert!(err.is_err());
    }

    #[test]
    fn error_from_rusqlite() {
        let err = rusqlite::Connection::open_in_memory()
            .and_then(|c| c.execute("INVALID SQL", []))
            .unwrap_err();
        let wrapped: CoreError = err.into();
        assert!(wrapped.to_string().contains("database error"));
    }
}
