//! Runtime helpers for dodeca worker cells.
//!
//! Provides the `run_cell!` macro that handles all the boilerplate for talking
//! to the host over stdin/stdout, plus [`serve`], the request loop it runs.
//!
//! Cells never write to stdout directly: stdout carries protocol frames.
//! Logs go to stderr, which the host forwards into its own tracing output.

use cell_minify_proto::{
    Chunk, DecodeError, FrameReader, HostMessage, MinifyOutput, MinifyTask, WorkerMessage,
    write_frame,
};
use tokio::io::{AsyncRead, AsyncWrite};

pub use cell_minify_proto;
pub use tokio;
pub use tracing;
pub use tracing_subscriber;
pub use ur_taking_me_with_you;

/// Default filter when `RUST_LOG` is not set. Anything a cell logs ends up in
/// the host's output, so stay quiet unless asked.
pub const DEFAULT_CELL_FILTER: &str = "warn";

/// Log to stderr, filtered by `RUST_LOG`.
pub fn init_cell_tracing() {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(DEFAULT_CELL_FILTER));

    let _ = tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_ansi(false)
        .with_target(true)
        .with_env_filter(filter)
        .try_init();
}

/// Answer minify requests until the host closes the pipe.
///
/// Requests are handled one at a time, in order. A handler error becomes a
/// `Failed` reply; the loop keeps going. Returns once `reader` hits EOF.
pub async fn serve<R, W, F, E>(reader: R, mut writer: W, mut handler: F) -> Result<(), DecodeError>
where
    R: AsyncRead + Unpin,
    W: AsyncWrite + Unpin,
    F: FnMut(&MinifyTask) -> Result<MinifyOutput, E>,
    E: std::fmt::Display,
{
    let mut frames = FrameReader::new(reader);

    while let Some(chunk) = frames.next().await? {
        let payload = match chunk {
            Chunk::Frame(payload) => payload,
            Chunk::Text(text) => {
                tracing::warn!("ignoring non-frame input from host: {text:?}");
                continue;
            }
        };

        let HostMessage::Minify { id, task } = HostMessage::from_payload(&payload)?;
        tracing::debug!(id, len = task.code.len(), "minify request");

        let reply = match handler(&task) {
            Ok(output) => WorkerMessage::Done { id, output },
            Err(e) => WorkerMessage::Failed {
                id,
                message: e.to_string(),
            },
        };

        let frame = reply
            .to_frame()
            .or_else(|e| {
                WorkerMessage::Failed {
                    id,
                    message: format!("failed to encode result: {e}"),
                }
                .to_frame()
            })
            .map_err(|e| std::io::Error::other(e.to_string()))?;
        write_frame(&mut writer, &frame).await?;
    }

    tracing::debug!("host closed the pipe, exiting");
    Ok(())
}

/// Run a cell with the given name and task handler.
///
/// # Examples
///
/// ```ignore
/// use dodeca_cell_runtime::run_cell;
///
/// fn main() -> Result<(), Box<dyn std::error::Error>> {
///     run_cell!("minify", |task| dodeca_minify::minify(task))
/// }
/// ```
#[macro_export]
macro_rules! run_cell {
    ($cell_name:expr, |$task:ident| $handle:expr) => {{
        use $crate::{tokio, tracing, ur_taking_me_with_you};

        // Ensure this process dies when the parent dies
        ur_taking_me_with_you::die_with_parent();

        $crate::init_cell_tracing();

        async fn __run_cell_async() -> Result<(), Box<dyn std::error::Error>> {
            tracing::debug!("cell {} ready (pid {})", $cell_name, std::process::id());
            $crate::serve(tokio::io::stdin(), tokio::io::stdout(), |$task| $handle).await?;
            Ok(())
        }

        tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()?
            .block_on(__run_cell_async())
    }};
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::{AsyncWriteExt, duplex};

    #[tokio::test]
    async fn test_serve_replies_in_order() {
        let (mut host_tx, worker_rx) = duplex(64 * 1024);
        let (worker_tx, host_rx) = duplex(64 * 1024);

        let worker = tokio::spawn(async move {
            serve(worker_rx, worker_tx, |task: &MinifyTask| {
                if task.code.contains("bad") {
                    Err("nope")
                } else {
                    Ok(MinifyOutput {
                        code: task.code.to_uppercase(),
                        ..Default::default()
                    })
                }
            })
            .await
        });

        for (id, code) in [(1, "good"), (2, "bad")] {
            let msg = HostMessage::Minify {
                id,
                task: MinifyTask {
                    code: code.to_string(),
                    options: Default::default(),
                },
            };
            host_tx.write_all(&msg.to_frame().unwrap()).await.unwrap();
        }
        drop(host_tx);

        worker.await.unwrap().unwrap();

        let mut frames = FrameReader::new(host_rx);
        let mut replies = Vec::new();
        while let Some(Chunk::Frame(payload)) = frames.next().await.unwrap() {
            replies.push(WorkerMessage::from_payload(&payload).unwrap());
        }

        assert_eq!(replies.len(), 2);
        match &replies[0] {
            WorkerMessage::Done { id, output } => {
                assert_eq!(*id, 1);
                assert_eq!(output.code, "GOOD");
            }
            other => panic!("unexpected reply: {other:?}"),
        }
        match &replies[1] {
            WorkerMessage::Failed { id, message } => {
                assert_eq!(*id, 2);
                assert_eq!(message, "nope");
            }
            other => panic!("unexpected reply: {other:?}"),
        }
    }
}
