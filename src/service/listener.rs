//! Event stream listener.
//!
//! Tails the engine's live event feed and hands every decoded event to the
//! reconciliation service. The feed is restarted after a fixed delay whenever
//! it fails, forever, until shutdown.
use std::time::Duration;

use tokio::io::{AsyncBufReadExt, BufReader};
use tokio_util::sync::CancellationToken;

use crate::engine::{self, CommandError, parse_event};
use crate::tunnel::TunnelDiscovery;

use super::ReconciliationService;

pub struct EventListener<D> {
    service: ReconciliationService<D>,
    restart_delay: Duration,
}

impl<D> EventListener<D>
where
    D: TunnelDiscovery + Send + Sync + 'static,
{
    pub fn new(service: ReconciliationService<D>, restart_delay: Duration) -> Self {
        Self {
            service,
            restart_delay,
        }
    }

    /// Runs the listener until `shutdown` is cancelled.
    pub async fn run(self, shutdown: CancellationToken) {
        log::debug!("event listener starting");
        let mut attempt: u64 = 0;

        loop {
            if shutdown.is_cancelled() {
                break;
            }

            match self.stream_events(&shutdown, attempt > 0).await {
                Ok(()) => break,
                Err(err) => {
                    if err.is_unavailable() {
                        log::error!("{err}");
                        self.service.record_failure(&err);
                    } else {
                        log::warn!("{err}");
                    }
                    // events may have been missed while the feed was down
                    self.service.request_poll(Duration::ZERO);
                }
            }
            attempt += 1;

            tokio::select! {
                _ = shutdown.cancelled() => break,
                () = tokio::time::sleep(self.restart_delay) => {
                    log::debug!("restarting event stream (attempt {attempt})");
                }
            }
        }

        log::debug!("event listener stopped");
    }

    /// Runs one event subprocess to completion.
    ///
    /// Returns `Ok(())` only when stopped through `shutdown`; a feed that ends
    /// on its own is an error.
    async fn stream_events(&self, shutdown: &CancellationToken, reconnect: bool) -> engine::Result<()> {
        let (mut command, command_line) = self.service.engine().events_command()?;
        let failed = engine::Error::EventStreamFailed;

        let mut child = command.spawn().map_err(|source| {
            failed(CommandError::Spawn {
                command: command_line.clone(),
                source,
            })
        })?;
        let Some(stdout) = child.stdout.take() else {
            return Err(failed(CommandError::StreamClosed {
                command: command_line,
            }));
        };
        log::debug!("subscribed to `{command_line}`");
        if reconnect {
            self.service.request_poll(Duration::ZERO);
        }

        let mut lines = BufReader::new(stdout).lines();
        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    if let Err(err) = child.kill().await {
                        log::debug!("failed to kill `{command_line}`: {err}");
                    }
                    return Ok(());
                }
                line = lines.next_line() => match line {
                    Ok(Some(line)) => self.handle_line(&line),
                    Ok(None) => break,
                    Err(source) => {
                        return Err(failed(CommandError::Read {
                            command: command_line,
                            source,
                        }));
                    }
                },
            }
        }

        let status = child.wait().await.map_err(|source| {
            failed(CommandError::Read {
                command: command_line.clone(),
                source,
            })
        })?;
        if status.success() {
            Err(failed(CommandError::StreamClosed {
                command: command_line,
            }))
        } else {
            Err(failed(CommandError::Exit {
                command: command_line,
                status,
                stderr: String::new(),
            }))
        }
    }

    fn handle_line(&self, line: &str) {
        let line = line.trim();
        if line.is_empty() {
            return;
        }
        match parse_event(line) {
            Ok(event) => {
                let outcome = self.service.handle_event(&event);
                log::trace!(
                    "event `{}` for `{}` ({}): {:?}",
                    event.status,
                    event.name,
                    event.id,
                    outcome
                );
            }
            Err(err) => log::trace!("ignoring event line: {err}"),
        }
    }
}
