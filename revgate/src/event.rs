//! Lifecycle event intake for `revgate serve`.
//!
//! Events arrive as JSON lines, one [`LifecycleEvent`] per line:
//!
//! ```text
//! {"event":"opened","pullRequest":{"changeRequestId":12,"repositoryId":3,"fromRef":"feature","toRef":"main"}}
//! ```
//!
//! Blank lines are ignored; a line that does not parse is logged and skipped
//! so one bad producer cannot stall the stream.
//!
//! Reading happens on a dedicated `std::thread` that feeds a tokio unbounded
//! channel. A blocking read on stdin cannot be cancelled, so it must not live
//! on the runtime's blocking pool: the runtime would wait for it on shutdown
//! and `serve` could never exit while the producer keeps stdin open.

use std::io::BufRead;

use revgate_core::trigger::LifecycleEvent;
use tokio::sync::mpsc;
use tracing::{debug, warn};

/// Parses one input line. `None` for blank or malformed lines.
pub fn parse_line(line: &str) -> Option<LifecycleEvent> {
    let line = line.trim();
    if line.is_empty() {
        return None;
    }
    match serde_json::from_str(line) {
        Ok(event) => Some(event),
        Err(e) => {
            warn!(error = %e, "ignoring malformed lifecycle event");
            None
        }
    }
}

/// Spawns the reader thread and returns the receiving end of its channel.
///
/// The channel closes at EOF or on a read error. The thread also stops once
/// the receiver is dropped and the next line arrives; until then it stays
/// parked in `read` and does not hold the process open.
///
/// # Errors
///
/// Returns the OS error if the thread cannot be spawned.
pub fn spawn_reader<R>(reader: R) -> std::io::Result<mpsc::UnboundedReceiver<LifecycleEvent>>
where
    R: BufRead + Send + 'static,
{
    let (tx, rx) = mpsc::unbounded_channel();
    std::thread::Builder::new()
        .name("revgate-stdin".into())
        .spawn(move || read_events(reader, &tx))?;
    Ok(rx)
}

fn read_events<R: BufRead>(reader: R, tx: &mpsc::UnboundedSender<LifecycleEvent>) {
    for line in reader.lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!(error = %e, "event input failed, stopping intake");
                return;
            }
        };
        if let Some(event) = parse_line(&line) {
            if tx.send(event).is_err() {
                debug!("event receiver gone, stopping intake");
                return;
            }
        }
    }
    debug!("event input reached EOF");
}
