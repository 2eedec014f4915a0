//! Runs tasks on a dedicated thread and reports their results.
//!
//! The controller talks to the orchestrator over two channels: a bounded
//! control channel carrying tasks and directives, and an unbounded event
//! channel carrying result snapshots and completion markers back.
//!
//! ```text
//! controller ──ControlMessage──▶ orchestrator thread ──▶ Task ──▶ device
//!      ▲                                   │
//!      └────────OrchestratorEvent──────────┘
//! ```
//!
//! Cancellation is cooperative: a `stop` takes effect between measurement
//! cycles, never during one.

use crate::diagnostics;
use crate::error::{AppResult, DtError};
use crate::task::{ResultSnapshot, Task, TaskContext, TaskId};
use std::collections::VecDeque;
use std::fmt;
use std::str::FromStr;
use std::thread;
use tokio::sync::mpsc::{self, error::TryRecvError};
use tracing::{debug, error, info, warn};

/// Control vocabulary understood by the orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Directive {
    /// End the running task after its current cycle.
    Stop,
    /// Stop the running task and exit the loop.
    Terminate,
    DebugOn,
    DebugOff,
}

impl Directive {
    pub fn as_str(self) -> &'static str {
        match self {
            Directive::Stop => "stop",
            Directive::Terminate => "terminate",
            Directive::DebugOn => "debugon",
            Directive::DebugOff => "debugoff",
        }
    }
}

impl fmt::Display for Directive {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Directive {
    type Err = DtError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "stop" => Ok(Directive::Stop),
            "terminate" => Ok(Directive::Terminate),
            "debugon" => Ok(Directive::DebugOn),
            "debugoff" => Ok(Directive::DebugOff),
            other => Err(DtError::UnknownDirective(other.to_string())),
        }
    }
}

/// Controller → orchestrator.
#[derive(Debug)]
pub enum ControlMessage {
    /// Run this task; queued if another one is running.
    Task(Box<Task>),
    Directive(Directive),
}

/// Orchestrator → controller.
#[derive(Debug, Clone, PartialEq)]
pub enum OrchestratorEvent {
    /// Task state after initialization or a measurement cycle.
    Snapshot(Box<ResultSnapshot>),
    /// The task finished; no more snapshots follow for it.
    Stopped(TaskId),
}

impl fmt::Display for OrchestratorEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OrchestratorEvent::Snapshot(s) => match s.id {
                Some(id) => write!(f, "snapshot {id} ({})", s.kind),
                None => write!(f, "snapshot ({})", s.kind),
            },
            OrchestratorEvent::Stopped(id) => write!(f, "stopped {id}"),
        }
    }
}

/// Receive loop driving one task at a time.
pub struct Orchestrator {
    ctx: TaskContext,
    control: mpsc::Receiver<ControlMessage>,
    events: mpsc::UnboundedSender<OrchestratorEvent>,
    pending: VecDeque<Task>,
    terminate: bool,
}

impl Orchestrator {
    pub fn new(
        ctx: TaskContext,
        control: mpsc::Receiver<ControlMessage>,
        events: mpsc::UnboundedSender<OrchestratorEvent>,
    ) -> Self {
        Self {
            ctx,
            control,
            events,
            pending: VecDeque::new(),
            terminate: false,
        }
    }

    /// Process messages until `terminate`, or until the controller goes away.
    ///
    /// Blocks the calling thread; must not run inside an async runtime.
    pub fn run(mut self) {
        info!("Orchestrator started");
        loop {
            let task = match self.pending.pop_front() {
                Some(task) => task,
                None => match self.control.blocking_recv() {
                    Some(ControlMessage::Task(task)) => *task,
                    Some(ControlMessage::Directive(Directive::Terminate)) | None => break,
                    Some(ControlMessage::Directive(Directive::Stop)) => {
                        debug!("Stop with no running task ignored");
                        continue;
                    }
                    Some(ControlMessage::Directive(d)) => {
                        self.apply_debug(d);
                        continue;
                    }
                },
            };
            if !self.execute(task) || self.terminate {
                break;
            }
        }
        if !self.pending.is_empty() {
            warn!(dropped = self.pending.len(), "Orchestrator exiting with queued tasks");
        }
        info!("Orchestrator stopped");
    }

    fn apply_debug(&self, directive: Directive) {
        match directive {
            Directive::DebugOn => diagnostics::set_debug(true),
            Directive::DebugOff => diagnostics::set_debug(false),
            Directive::Stop | Directive::Terminate => {}
        }
    }

    /// Take everything already queued. Returns whether the running task
    /// should stop.
    fn drain(&mut self) -> bool {
        let mut stop = false;
        loop {
            match self.control.try_recv() {
                Ok(ControlMessage::Task(task)) => self.pending.push_back(*task),
                Ok(ControlMessage::Directive(Directive::Stop)) => stop = true,
                Ok(ControlMessage::Directive(Directive::Terminate)) => {
                    self.terminate = true;
                    stop = true;
                }
                Ok(ControlMessage::Directive(d)) => self.apply_debug(d),
                Err(TryRecvError::Empty) => break,
                // Nobody can send `stop` any more.
                Err(TryRecvError::Disconnected) => {
                    stop = true;
                    break;
                }
            }
        }
        stop
    }

    fn send(&self, event: OrchestratorEvent) -> bool {
        if self.events.send(event).is_err() {
            error!("Event channel closed; controller gone");
            return false;
        }
        true
    }

    /// Run one task to completion. Returns `false` when the controller can
    /// no longer be reached.
    fn execute(&mut self, mut task: Task) -> bool {
        let id = match task.id() {
            Some(id) => id,
            None => match task.assign_id() {
                Ok(id) => id,
                Err(err) => {
                    error!("Cannot identify task: {err}");
                    return true;
                }
            },
        };
        info!(%id, kind = %task.kind(), "Running task");

        task.init_meas(&self.ctx);
        let mut stop = self.drain();
        if task.is_failed() || task.is_completed() || task.is_single() || stop {
            if !self.send(OrchestratorEvent::Snapshot(Box::new(task.snapshot()))) {
                return false;
            }
        } else {
            let mut cycles = 0u64;
            loop {
                task.measure(&self.ctx);
                cycles += 1;
                if !self.send(OrchestratorEvent::Snapshot(Box::new(task.snapshot()))) {
                    return false;
                }
                stop |= self.drain();
                if task.is_failed() || stop {
                    break;
                }
            }
            debug!(%id, cycles, failed = task.is_failed(), "Measurement loop left");
        }
        self.send(OrchestratorEvent::Stopped(id))
    }
}

/// Controller-side handle to an orchestrator thread.
pub struct OrchestratorHandle {
    control: mpsc::Sender<ControlMessage>,
    events: mpsc::UnboundedReceiver<OrchestratorEvent>,
    thread: Option<thread::JoinHandle<()>>,
}

impl OrchestratorHandle {
    /// Start the orchestrator thread with a control channel of `capacity`.
    pub fn spawn(ctx: TaskContext, capacity: usize) -> AppResult<Self> {
        let (control_tx, control_rx) = mpsc::channel(capacity.max(1));
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        let orchestrator = Orchestrator::new(ctx, control_rx, events_tx);
        let thread = thread::Builder::new()
            .name("orchestrator".into())
            .spawn(move || orchestrator.run())?;
        Ok(Self {
            control: control_tx,
            events: events_rx,
            thread: Some(thread),
        })
    }

    /// Hand a task over, assigning its identity if it has none.
    pub async fn submit(&self, mut task: Task) -> AppResult<TaskId> {
        let id = match task.id() {
            Some(id) => id,
            None => task.assign_id()?,
        };
        self.control
            .send(ControlMessage::Task(Box::new(task)))
            .await
            .map_err(|_| DtError::ChannelClosed)?;
        Ok(id)
    }

    pub async fn directive(&self, directive: Directive) -> AppResult<()> {
        self.control
            .send(ControlMessage::Directive(directive))
            .await
            .map_err(|_| DtError::ChannelClosed)
    }

    /// Send a directive given by its literal name.
    pub async fn send_text(&self, text: &str) -> AppResult<()> {
        self.directive(text.parse()?).await
    }

    /// Sender for directives from elsewhere, e.g. a signal handler.
    pub fn control(&self) -> mpsc::Sender<ControlMessage> {
        self.control.clone()
    }

    /// Next event; `None` once the orchestrator has exited and all events
    /// were read.
    pub async fn next_event(&mut self) -> Option<OrchestratorEvent> {
        self.events.recv().await
    }

    /// Next event if one is ready.
    pub fn try_next_event(&mut self) -> Option<OrchestratorEvent> {
        self.events.try_recv().ok()
    }

    /// Terminate the loop and wait for the thread to exit.
    pub async fn shutdown(mut self) -> AppResult<()> {
        if self.directive(Directive::Terminate).await.is_err() {
            debug!("Orchestrator already gone at shutdown");
        }
        if let Some(thread) = self.thread.take() {
            let joined = tokio::task::spawn_blocking(move || thread.join())
                .await
                .map_err(|e| DtError::Io(std::io::Error::other(e.to_string())))?;
            if joined.is_err() {
                error!("Orchestrator thread panicked");
                return Err(DtError::ChannelClosed);
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::numerics::mock::ScriptedNumerics;
    use crate::task::parameter::{INPUT_POWER, OUTPUT_POWER};
    use crate::task::test_support::mock_context;
    use crate::task::{TaskKind, TaskState};
    use crate::transport::mock::{MockDevice, MockReply};
    use serial_test::serial;
    use std::sync::Arc;

    /// Run an orchestrator over pre-queued messages on this thread.
    fn run_queued(device: &MockDevice, messages: Vec<ControlMessage>) -> Vec<OrchestratorEvent> {
        let ctx = mock_context(device, Arc::new(ScriptedNumerics::new()));
        let (control_tx, control_rx) = mpsc::channel(16);
        let (events_tx, mut events_rx) = mpsc::unbounded_channel();
        for message in messages {
            control_tx.try_send(message).expect("capacity");
        }
        drop(control_tx);
        Orchestrator::new(ctx, control_rx, events_tx).run();

        let mut events = Vec::new();
        while let Ok(event) = events_rx.try_recv() {
            events.push(event);
        }
        events
    }

    fn task_message(kind: TaskKind) -> (TaskId, ControlMessage) {
        let mut task = kind.create();
        let id = task.assign_id().expect("fresh task");
        (id, ControlMessage::Task(Box::new(task)))
    }

    fn stop() -> ControlMessage {
        ControlMessage::Directive(Directive::Stop)
    }

    #[test]
    fn test_directive_vocabulary() {
        for d in [Directive::Stop, Directive::Terminate, Directive::DebugOn, Directive::DebugOff] {
            assert_eq!(d.as_str().parse::<Directive>().expect("literal"), d);
        }
        assert_eq!(" stop\n".parse::<Directive>().expect("trimmed"), Directive::Stop);
        assert!(matches!("halt".parse::<Directive>(), Err(DtError::UnknownDirective(_))));
    }

    #[test]
    fn test_completion_marker_text() {
        assert_eq!(OrchestratorEvent::Stopped(TaskId(42)).to_string(), "stopped 42");
    }

    #[test]
    #[serial]
    fn test_queued_stop_gives_single_snapshot() {
        let device = MockDevice::new();
        let (id, task) = task_message(TaskKind::MeasurePower);
        let events = run_queued(&device, vec![task, stop()]);

        assert_eq!(events.len(), 2);
        match &events[0] {
            OrchestratorEvent::Snapshot(s) => {
                assert_eq!(s.id, Some(id));
                assert_eq!(s.state, TaskState::Initialized);
            }
            other => panic!("unexpected event {other:?}"),
        }
        assert_eq!(events[1], OrchestratorEvent::Stopped(id));
        assert!(device.requests_named("GET PWR").is_empty());
    }

    #[test]
    #[serial]
    fn test_task_arriving_mid_task_runs_next() {
        let device = MockDevice::new();
        let (first, power) = task_message(TaskKind::MeasurePower);
        let (second, calibrate) = task_message(TaskKind::Calibrate);
        let events = run_queued(&device, vec![power, calibrate, stop()]);

        let markers: Vec<&OrchestratorEvent> = events
            .iter()
            .filter(|e| matches!(e, OrchestratorEvent::Stopped(_)))
            .collect();
        assert_eq!(
            markers,
            vec![&OrchestratorEvent::Stopped(first), &OrchestratorEvent::Stopped(second)]
        );
        assert_eq!(events.len(), 4);
    }

    #[test]
    #[serial]
    fn test_terminate_drops_queued_tasks() {
        let device = MockDevice::new();
        let (first, power) = task_message(TaskKind::MeasurePower);
        let (_, calibrate) = task_message(TaskKind::Calibrate);
        let events = run_queued(
            &device,
            vec![power, ControlMessage::Directive(Directive::Terminate), calibrate],
        );
        assert_eq!(events.last(), Some(&OrchestratorEvent::Stopped(first)));
        assert_eq!(events.len(), 2);
        assert!(device.requests_named("SET DCCOMP").is_empty());
    }

    #[test]
    #[serial]
    fn test_failed_task_reports_once() {
        let device = MockDevice::new();
        let mut task = TaskKind::MeasurePower.create();
        task.set_parameter(crate::task::parameter::AVERAGING, 0.0).expect("held");
        let events = run_queued(&device, vec![ControlMessage::Task(Box::new(task))]);

        assert_eq!(events.len(), 2);
        match &events[0] {
            OrchestratorEvent::Snapshot(s) => assert!(s.failed),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(matches!(events[1], OrchestratorEvent::Stopped(_)));
    }

    #[test]
    #[serial]
    fn test_debug_directives_toggle_diagnostics() {
        let device = MockDevice::new();
        run_queued(&device, vec![ControlMessage::Directive(Directive::DebugOn)]);
        assert!(diagnostics::debug_enabled());
        run_queued(&device, vec![ControlMessage::Directive(Directive::DebugOff)]);
        assert!(!diagnostics::debug_enabled());
    }

    #[tokio::test]
    #[serial]
    async fn test_measurement_loop_until_stop() {
        let device = MockDevice::new();
        device.set_reply("GET PWR", MockReply::Words(vec![500, 700]));
        let ctx = mock_context(&device, Arc::new(ScriptedNumerics::new()));
        let mut handle = OrchestratorHandle::spawn(ctx, 8).expect("spawn");

        let id = handle
            .submit(TaskKind::MeasurePower.create())
            .await
            .expect("submitted");
        let mut snapshots = 0;
        loop {
            match handle.next_event().await.expect("orchestrator alive") {
                OrchestratorEvent::Snapshot(s) => {
                    assert!(s.completed, "{}", s.message);
                    assert_eq!(s.result(OUTPUT_POWER), Some(500.0));
                    assert_eq!(s.result(INPUT_POWER), Some(700.0));
                    snapshots += 1;
                    if snapshots == 3 {
                        handle.send_text("stop").await.expect("stop sent");
                    }
                }
                OrchestratorEvent::Stopped(stopped) => {
                    assert_eq!(stopped, id);
                    break;
                }
            }
        }
        assert!(snapshots >= 3);
        handle.shutdown().await.expect("clean shutdown");
    }
}
