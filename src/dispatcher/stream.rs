//! Adapts bollard's multiplexed container log stream into a plain
//! `{stdout, stderr}` split. Docker's wire framing is already the
//! byte-oriented `[type:1][reserved:3][len:4 BE][payload]` header format;
//! bollard demuxes it for us into `LogOutput::{StdOut,StdErr}` frames, so
//! this module just folds those into two buffers rather than
//! re-implementing the framing.

use bollard::Docker;
use bollard::container::LogsOptions;
use bollard::errors::Error as BollardError;
use futures::StreamExt;

pub struct Demuxed {
    pub stdout: Vec<u8>,
    pub stderr: Vec<u8>,
}

pub async fn collect_logs(docker: &Docker, container_id: &str) -> Result<Demuxed, BollardError> {
    let mut stream = docker.logs(
        container_id,
        Some(LogsOptions::<String> {
            follow: true,
            stdout: true,
            stderr: true,
            ..Default::default()
        }),
    );

    let mut stdout = Vec::new();
    let mut stderr = Vec::new();
    while let Some(chunk) = stream.next().await {
        match chunk? {
            bollard::container::LogOutput::StdOut { message } => stdout.extend_from_slice(&message),
            bollard::container::LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
            bollard::container::LogOutput::Console { message } => stdout.extend_from_slice(&message),
            bollard::container::LogOutput::StdIn { .. } => {}
        }
    }
    Ok(Demuxed { stdout, stderr })
}
