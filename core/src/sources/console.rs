use tokio::io::{AsyncBufRead, AsyncBufReadExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::instrument::Handler;
use crate::job::Event;
use crate::runtime::{Module, ModuleCtx};

const CLICK_PREFIX: &str = "click";

/// One parsed console line.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsoleCommand {
    /// Stop the injector and ask the process to exit.
    Quit,
    /// Line starting with `click` (any case).
    Click(String),
    /// Anything else, including empty lines.
    Generic(String),
}

impl ConsoleCommand {
    /// Classify a raw line; surrounding whitespace is ignored.
    pub fn classify(line: &str) -> Self {
        let line = line.trim();
        if line.eq_ignore_ascii_case("quit") {
            return ConsoleCommand::Quit;
        }
        let is_click = line
            .get(..CLICK_PREFIX.len())
            .is_some_and(|head| head.eq_ignore_ascii_case(CLICK_PREFIX));
        if is_click {
            ConsoleCommand::Click(line.to_string())
        } else {
            ConsoleCommand::Generic(line.to_string())
        }
    }
}

/// Reads lines and turns each into a detached job run, so slow jobs never stall input.
pub struct ConsoleInjector<R> {
    reader: R,
    click: Handler,
    generic: Handler,
    quit: Option<oneshot::Sender<()>>,
}

impl<R> ConsoleInjector<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    /// Injector over `reader`. The receiver resolves when a `quit` line is read.
    pub fn new(reader: R, click: Handler, generic: Handler) -> (Self, oneshot::Receiver<()>) {
        let (tx, rx) = oneshot::channel();
        (Self { reader, click, generic, quit: Some(tx) }, rx)
    }

    fn handle(&mut self, line: &str) -> bool {
        match ConsoleCommand::classify(line) {
            ConsoleCommand::Quit => {
                info!("quit requested from console");
                if let Some(tx) = self.quit.take() {
                    let _ = tx.send(());
                }
                return false;
            }
            ConsoleCommand::Click(line) => {
                debug!(%line, "click event");
                self.click.spawn(Event::Manual { line });
            }
            ConsoleCommand::Generic(line) => {
                debug!(%line, "generic event");
                self.generic.spawn(Event::Manual { line });
            }
        }
        true
    }
}

impl<R> Module for ConsoleInjector<R>
where
    R: AsyncBufRead + Unpin + Send + 'static,
{
    fn name(&self) -> &'static str { "console" }

    fn spawn(mut self: Box<Self>, mut ctx: ModuleCtx) -> JoinHandle<anyhow::Result<()>> {
        tokio::spawn(async move {
            info!("console ready: type 'click ...', any other text, or 'quit'");
            let mut buf = Vec::new();
            loop {
                buf.clear();
                tokio::select! {
                    read = self.reader.read_until(b'\n', &mut buf) => match read {
                        Ok(0) => {
                            info!("console input closed");
                            break;
                        }
                        Ok(_) => {
                            // invalid UTF-8 is still a line; it becomes a generic event
                            let text = String::from_utf8_lossy(&buf).into_owned();
                            if !self.handle(&text) {
                                break;
                            }
                        }
                        Err(e) => {
                            warn!(error = %e, "console read failed");
                            break;
                        }
                    },
                    changed = ctx.shutdown.changed() => {
                        if changed.is_err() || *ctx.shutdown.borrow() {
                            break;
                        }
                    }
                }
            }
            Ok(())
        })
    }
}
