//! Worker transport.
//!
//! One dedicated OS thread per session runs a current-thread tokio runtime
//! and feeds commands, strictly FIFO, to the [`Orchestrator`]. The host posts
//! commands without waiting and receives [`WorkerEvent`]s through an
//! [`EventSink`].

use std::io::{BufRead, Write};
use std::sync::Arc;
use std::thread::JoinHandle;

use storebench_backends::CancelToken;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::error::TransportError;
use crate::orchestrator::Orchestrator;
use crate::protocol::{event_channel, Command, EventSink};

pub struct Worker;

impl Worker {
    /// Start the worker thread. Events go to `sink` until the worker exits,
    /// at which point the sink is dropped.
    pub fn spawn(orchestrator: Orchestrator, sink: Arc<dyn EventSink>) -> Result<WorkerHandle, TransportError> {
        let runtime = tokio::runtime::Builder::new_current_thread()
            .enable_all()
            .build()
            .map_err(TransportError::Runtime)?;
        let (commands, mut inbox) = mpsc::unbounded_channel::<Command>();
        let cancel = orchestrator.session_token();

        let thread = std::thread::Builder::new()
            .name("storebench-worker".to_string())
            .spawn(move || {
                let mut orchestrator = orchestrator;
                runtime.block_on(async move {
                    while let Some(command) = inbox.recv().await {
                        if let Err(err) = orchestrator.handle(&command, &*sink).await {
                            warn!(backend = %command.backend, task = ?command.task, error = %err, "command failed");
                        }
                    }
                    orchestrator.release_all().await;
                    debug!("worker drained its queue");
                });
            })
            .map_err(TransportError::Spawn)?;

        info!("worker started");
        Ok(WorkerHandle {
            commands: Some(commands),
            cancel,
            thread: Some(thread),
        })
    }
}

/// Host side of a running worker.
pub struct WorkerHandle {
    commands: Option<mpsc::UnboundedSender<Command>>,
    cancel: CancelToken,
    thread: Option<JoinHandle<()>>,
}

impl WorkerHandle {
    /// Queue a command. Never waits for its result.
    pub fn post(&self, command: Command) -> Result<(), TransportError> {
        self.commands
            .as_ref()
            .ok_or(TransportError::Disconnected)?
            .send(command)
            .map_err(|_| TransportError::Disconnected)
    }

    /// Cancel the running phase and every phase still queued.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Stop accepting commands. Queued commands still run; the worker exits
    /// after the last one and drops its sink.
    pub fn close(&mut self) {
        self.commands = None;
    }

    /// Close the queue, let the worker drain it and release every live
    /// adapter, then join the thread.
    pub fn shutdown(mut self) -> Result<(), TransportError> {
        self.close();
        match self.thread.take() {
            Some(thread) => thread.join().map_err(|_| TransportError::WorkerPanicked),
            None => Ok(()),
        }
    }
}

impl Drop for WorkerHandle {
    fn drop(&mut self) {
        self.close();
        if let Some(thread) = self.thread.take() {
            if thread.join().is_err() {
                warn!("worker thread panicked");
            }
        }
    }
}

/// Serve the worker protocol over JSON lines: commands are read from
/// `input`, events are written to `output` as they arrive. Returns once
/// `input` is exhausted and every queued command has finished.
pub fn serve_lines<R, W>(input: R, mut output: W, orchestrator: Orchestrator) -> Result<(), TransportError>
where
    R: BufRead,
    W: Write + Send + 'static,
{
    let (sink, mut events) = event_channel();
    let handle = Worker::spawn(orchestrator, Arc::new(sink))?;

    let writer = std::thread::Builder::new()
        .name("storebench-events".to_string())
        .spawn(move || -> Result<(), TransportError> {
            while let Some(event) = events.blocking_recv() {
                writeln!(output, "{}", event.to_json()?)?;
                output.flush()?;
            }
            Ok(())
        })
        .map_err(TransportError::Spawn)?;

    // Undecodable bytes are skipped like any other malformed line.
    let mut input = input;
    let mut buf = Vec::new();
    loop {
        buf.clear();
        if input.read_until(b'\n', &mut buf)? == 0 {
            break;
        }
        let text = String::from_utf8_lossy(&buf);
        let line = text.trim();
        if line.is_empty() {
            continue;
        }
        match Command::from_json(line) {
            Ok(command) => handle.post(command)?,
            Err(err) => warn!(%line, error = %err, "ignoring malformed command"),
        }
    }

    handle.shutdown()?;
    writer.join().map_err(|_| TransportError::WorkerPanicked)?
}
