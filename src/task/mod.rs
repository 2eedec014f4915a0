//! Measurement tasks and their lifecycle.
//!
//! A [`Task`] pairs the shared lifecycle state ([`TaskCore`]) with a
//! kind-specific [`Procedure`]. The lifecycle is
//!
//! ```text
//! New -> Initializing -> InitFailed
//!                     -> Initialized -> Measuring -> MeasureFailed
//!                                                 -> Measured -> Measuring ...
//! ```
//!
//! Single-shot tasks stop at `Initialized` with `completed` set. Faults never
//! escape as `Err`: they end up in the task's `failed` flag and message, in
//! the operator's language. Only logic errors (unknown keys, ids assigned
//! twice) are returned to the caller.

pub mod calibrate;
pub mod carrier;
pub mod dmr;
pub mod nonlinearity;
pub mod parameter;
pub mod power;
pub mod sensitivity;

use crate::config::{CalibrationSettings, ModelSettings, Settings, TimingSettings};
use crate::error::{AppResult, DtError, TransportError};
use crate::i18n::{Localized, Message};
use crate::numerics::{default_routines, NumericRoutines};
use crate::transport::registry::{self, ConnectionRegistry};
use crate::transport::{Connection, DeviceLink, Pll, SharedTransport};
use chrono::{DateTime, Utc};
use parameter::{ParameterDescriptor, ResultDescriptor};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Concrete task variants with stable identifiers.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskKind {
    Calibrate,
    MeasurePower,
    MeasureCarrierFrequency,
    MeasureNonlinearity,
    DmrInput,
    DmrOutput,
    MeasureSensitivity,
    /// DMR input analysis on recorded samples; needs no device.
    DmrInputModel,
}

impl TaskKind {
    /// Every kind, in menu order.
    pub const ALL: [TaskKind; 8] = [
        TaskKind::Calibrate,
        TaskKind::MeasurePower,
        TaskKind::MeasureCarrierFrequency,
        TaskKind::MeasureNonlinearity,
        TaskKind::DmrInput,
        TaskKind::DmrOutput,
        TaskKind::MeasureSensitivity,
        TaskKind::DmrInputModel,
    ];

    /// Stable identifier used in scenario definitions and on the command line.
    pub fn id(self) -> &'static str {
        match self {
            TaskKind::Calibrate => "calibrate",
            TaskKind::MeasurePower => "measure_power",
            TaskKind::MeasureCarrierFrequency => "measure_carrier_frequency",
            TaskKind::MeasureNonlinearity => "measure_nonlinearity",
            TaskKind::DmrInput => "dmr_input",
            TaskKind::DmrOutput => "dmr_output",
            TaskKind::MeasureSensitivity => "measure_sensitivity",
            TaskKind::DmrInputModel => "dmr_input_model",
        }
    }

    /// Operator-facing name.
    pub fn display_name(self) -> Localized {
        let (en, ru) = match self {
            TaskKind::Calibrate => ("Calibration", "Калибровка"),
            TaskKind::MeasurePower => (
                "Measuring input&output power",
                "Измерение входной/выходной мощности",
            ),
            TaskKind::MeasureCarrierFrequency => ("Measuring carrier", "Измерение несущей"),
            TaskKind::MeasureNonlinearity => ("THD measurement", "Измерение КНИ"),
            TaskKind::DmrInput => ("DMR Input", "Вход ЦР"),
            TaskKind::DmrOutput => ("DMR Output", "Выход ЦР"),
            TaskKind::MeasureSensitivity => ("Measuring sensitivity", "Измерение чувствительности"),
            TaskKind::DmrInputModel => ("DMR Input (model)", "Вход ЦР (модель)"),
        };
        Localized { en, ru }
    }

    fn procedure(self) -> Box<dyn Procedure> {
        match self {
            TaskKind::Calibrate => Box::new(calibrate::Calibrate),
            TaskKind::MeasurePower => Box::new(power::MeasurePower),
            TaskKind::MeasureCarrierFrequency => Box::new(carrier::MeasureCarrierFrequency),
            TaskKind::MeasureNonlinearity => Box::new(nonlinearity::MeasureNonlinearity),
            TaskKind::DmrInput => Box::new(dmr::DmrInput),
            TaskKind::DmrOutput => Box::new(dmr::DmrOutput),
            TaskKind::MeasureSensitivity => Box::new(sensitivity::MeasureSensitivity::default()),
            TaskKind::DmrInputModel => Box::new(dmr::DmrInputModel::default()),
        }
    }

    /// New task of this kind with default parameters.
    pub fn create(self) -> Task {
        Task::new(self)
    }
}

impl fmt::Display for TaskKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.id())
    }
}

impl FromStr for TaskKind {
    type Err = DtError;

    /// Accepts the stable identifier or the display name in either language.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim();
        TaskKind::ALL
            .into_iter()
            .find(|k| {
                let name = k.display_name();
                k.id() == s || name.en == s || name.ru == s
            })
            .ok_or_else(|| DtError::UnknownTaskType(s.to_string()))
    }
}

/// Identity of a task, assigned once by the controller.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskId(pub u64);

static NEXT_TASK_ID: AtomicU64 = AtomicU64::new(1);

impl TaskId {
    fn next() -> Self {
        TaskId(NEXT_TASK_ID.fetch_add(1, Ordering::Relaxed))
    }
}

impl fmt::Display for TaskId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    New,
    Initializing,
    InitFailed,
    Initialized,
    Measuring,
    MeasureFailed,
    Measured,
}

/// Device status bits and their meaning.
const STATUS_BITS: [(&str, &str); 6] = [
    ("DAC I-channel overflow", "Переполнение I-канала ЦАП"),
    ("DAC Q-channel overflow", "Переполнение Q-канала ЦАП"),
    ("Modulator PLL lock", "Установлен PLL модулятора"),
    ("Demodulator PLL lock", "Установлен PLL демодулятора"),
    ("Data loaded to modulator", "Загружены данные в модулятор"),
    ("Error loading data to modulator", "Ошибка загрузки данных в модулятор"),
];

/// Descriptions of the set bits of a device status word.
pub fn describe_status(status: u16) -> Vec<&'static str> {
    STATUS_BITS
        .iter()
        .enumerate()
        .filter(|(bit, _)| status & (1 << bit) != 0)
        .map(|(_, &(en, ru))| Localized { en, ru }.text())
        .collect()
}

/// Why a task phase failed.
#[derive(Debug)]
pub enum TaskFault {
    /// Link fault; the connection is discarded.
    Communication(TransportError),
    /// A PLL did not lock or has no register set for the frequency.
    PllLock(Pll),
    /// Captured data could not be evaluated; optional detail.
    Evaluation(Option<String>),
    /// Device status reports a fault in the masked bits.
    Status { status: u16, mask: u16 },
    /// Task-specific setup failed with an operator message.
    Setup(String),
}

impl TaskFault {
    /// Evaluation error with a detail line.
    pub fn evaluation(detail: impl Into<String>) -> Self {
        TaskFault::Evaluation(Some(detail.into()))
    }
}

impl From<TransportError> for TaskFault {
    fn from(err: TransportError) -> Self {
        TaskFault::Communication(err)
    }
}

/// Everything a task needs from its environment.
#[derive(Clone)]
pub struct TaskContext {
    pub device: DeviceLink,
    pub numerics: Arc<dyn NumericRoutines>,
    pub timing: TimingSettings,
    pub model: ModelSettings,
}

impl TaskContext {
    /// Context with default timing and no model recordings.
    pub fn new(device: DeviceLink, numerics: Arc<dyn NumericRoutines>) -> Self {
        Self {
            device,
            numerics,
            timing: TimingSettings::default(),
            model: ModelSettings::default(),
        }
    }

    /// Context built from configuration on the process-wide registry.
    pub fn from_settings(settings: &Settings) -> Self {
        Self::with_registry(settings, registry::global())
    }

    /// Context built from configuration on the given registry.
    pub fn with_registry(settings: &Settings, registry: Arc<ConnectionRegistry>) -> Self {
        Self {
            device: DeviceLink::new(registry, settings.device.path.clone()),
            numerics: default_routines(),
            timing: settings.timing.clone(),
            model: settings.model.clone(),
        }
    }

    /// Replace timing settings.
    pub fn with_timing(mut self, timing: TimingSettings) -> Self {
        self.timing = timing;
        self
    }

    /// Replace model recordings.
    pub fn with_model(mut self, model: ModelSettings) -> Self {
        self.model = model;
        self
    }
}

/// Kind-specific behaviour of a task.
pub trait Procedure: Send {
    fn kind(&self) -> TaskKind;

    /// Parameter keys held by the task.
    fn parameters(&self) -> &'static [&'static str];

    /// Result keys produced by the task.
    fn results(&self) -> &'static [&'static str];

    /// Only an initialization phase.
    fn single_shot(&self) -> bool {
        false
    }

    /// Whether `init_meas` acquires the device connection.
    fn needs_device(&self) -> bool {
        true
    }

    /// Device setup. Runs after parameters validated.
    fn init(&mut self, core: &mut TaskCore, ctx: &TaskContext) -> Result<(), TaskFault>;

    /// One measurement cycle.
    fn measure(&mut self, _core: &mut TaskCore, _ctx: &TaskContext) -> Result<(), TaskFault> {
        Ok(())
    }
}

/// Lifecycle state shared by every task kind.
#[derive(Debug, Clone, Default)]
pub struct TaskCore {
    pub id: Option<TaskId>,
    /// Device-native parameter values.
    pub parameters: BTreeMap<&'static str, f64>,
    /// Device-native results of the last phase.
    pub results: BTreeMap<&'static str, Option<f64>>,
    /// Amplitude spectrum of the last capture, for plotting.
    pub spectrum: Option<Vec<f64>>,
    pub message: String,
    pub failed: bool,
    pub completed: bool,
    pub inited: bool,
    pub single: bool,
    pub state: TaskState,
    start: Option<Instant>,
    elapsed: Duration,
    connection: Option<Connection>,
}

impl TaskCore {
    /// Value of a held parameter; 0 for keys the task does not hold.
    pub fn value(&self, key: &str) -> f64 {
        self.parameters.get(key).copied().unwrap_or_default()
    }

    /// Record a result.
    pub fn set_result(&mut self, key: &'static str, value: f64) {
        self.results.insert(key, Some(value));
    }

    /// The open connection's transport.
    pub fn link(&self) -> Result<SharedTransport, TransportError> {
        self.connection
            .as_ref()
            .map(|c| Arc::clone(&c.transport))
            .ok_or(TransportError::NotConnected)
    }

    fn clear_results(&mut self) {
        self.results.values_mut().for_each(|v| *v = None);
        self.spectrum = None;
    }

    fn set_success(&mut self) {
        self.failed = false;
        self.completed = true;
        let start = *self.start.get_or_insert_with(Instant::now);
        self.elapsed = start.elapsed();
    }

    fn set_failure(&mut self, message: String) {
        self.failed = true;
        self.completed = false;
        self.message = message;
    }
}

/// A measurement task.
pub struct Task {
    core: TaskCore,
    procedure: Box<dyn Procedure>,
}

impl fmt::Debug for Task {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Task")
            .field("kind", &self.kind())
            .field("core", &self.core)
            .finish()
    }
}

impl Clone for Task {
    /// Copies parameters, results and status; the copy holds no connection.
    fn clone(&self) -> Self {
        let mut core = self.core.clone();
        core.connection = None;
        Self {
            core,
            procedure: self.kind().procedure(),
        }
    }
}

impl Task {
    /// Task of `kind` with default parameters and empty results.
    pub fn new(kind: TaskKind) -> Self {
        let procedure = kind.procedure();
        let parameters = procedure
            .parameters()
            .iter()
            .filter_map(|&key| parameter::parameter(key).map(|d| (key, d.default)))
            .collect();
        let results = procedure.results().iter().map(|&key| (key, None)).collect();
        let core = TaskCore {
            parameters,
            results,
            single: procedure.single_shot(),
            ..TaskCore::default()
        };
        Self { core, procedure }
    }

    pub fn kind(&self) -> TaskKind {
        self.procedure.kind()
    }

    pub fn id(&self) -> Option<TaskId> {
        self.core.id
    }

    /// Give the task its identity. Fails if it already has one.
    pub fn assign_id(&mut self) -> AppResult<TaskId> {
        if let Some(id) = self.core.id {
            return Err(DtError::IdentityAlreadyAssigned(id.0));
        }
        let id = TaskId::next();
        self.core.id = Some(id);
        Ok(id)
    }

    /// Lifecycle state and status flags.
    pub fn core(&self) -> &TaskCore {
        &self.core
    }

    pub fn state(&self) -> TaskState {
        self.core.state
    }

    pub fn message(&self) -> &str {
        &self.core.message
    }

    pub fn is_failed(&self) -> bool {
        self.core.failed
    }

    pub fn is_completed(&self) -> bool {
        self.core.completed
    }

    pub fn is_inited(&self) -> bool {
        self.core.inited
    }

    /// Only an initialization phase.
    pub fn is_single(&self) -> bool {
        self.core.single
    }

    /// Time from successful initialization to the end of the last successful
    /// phase.
    pub fn elapsed(&self) -> Duration {
        self.core.elapsed
    }

    /// Whether the task currently holds a device connection.
    pub fn is_connected(&self) -> bool {
        self.core.connection.is_some()
    }

    /// Descriptors of the held parameters, in key order.
    pub fn parameter_descriptors(&self) -> Vec<&'static ParameterDescriptor> {
        self.core
            .parameters
            .keys()
            .filter_map(|k| parameter::parameter(k))
            .collect()
    }

    /// Descriptors of the produced results, in key order.
    pub fn result_descriptors(&self) -> Vec<&'static ResultDescriptor> {
        self.core
            .results
            .keys()
            .filter_map(|k| parameter::result(k))
            .collect()
    }

    /// Device-native parameter values.
    pub fn parameters(&self) -> &BTreeMap<&'static str, f64> {
        &self.core.parameters
    }

    /// Device-native value of a held parameter.
    pub fn parameter(&self, key: &str) -> Option<f64> {
        self.core.parameters.get(key).copied()
    }

    fn held_key(&self, key: &str) -> AppResult<&'static str> {
        self.core
            .parameters
            .keys()
            .find(|k| **k == key)
            .copied()
            .ok_or_else(|| DtError::UnknownParameter {
                task: self.kind().id().to_string(),
                parameter: key.to_string(),
            })
    }

    /// Set a held parameter in device-native units. Values are validated at
    /// `init_meas`, not here.
    pub fn set_parameter(&mut self, key: &str, value: f64) -> AppResult<()> {
        let key = self.held_key(key)?;
        self.core.parameters.insert(key, value);
        Ok(())
    }

    /// Held parameter in display units.
    pub fn display_parameter(&self, key: &str) -> Option<f64> {
        let desc = parameter::parameter(key)?;
        self.parameter(key).map(|v| desc.to_display(v))
    }

    /// Set a held, writable parameter from display units.
    pub fn set_display_parameter(&mut self, key: &str, display: f64) -> AppResult<()> {
        let key = self.held_key(key)?;
        let desc = parameter::parameter(key).ok_or_else(|| DtError::UnknownParameter {
            task: self.kind().id().to_string(),
            parameter: key.to_string(),
        })?;
        if desc.read_only {
            return Err(DtError::ReadOnlyParameter(key.to_string()));
        }
        self.core.parameters.insert(key, desc.to_native(display));
        Ok(())
    }

    /// Device-native results.
    pub fn results(&self) -> &BTreeMap<&'static str, Option<f64>> {
        &self.core.results
    }

    /// Device-native value of a result, if present.
    pub fn result(&self, key: &str) -> Option<f64> {
        self.core.results.get(key).copied().flatten()
    }

    /// Result in display units.
    pub fn display_result(&self, key: &str) -> Option<f64> {
        let desc = parameter::result(key)?;
        self.result(key).map(|v| desc.to_display(v))
    }

    /// Formatted result with its unit label.
    pub fn format_result(&self, key: &str) -> Option<String> {
        let desc = parameter::result(key)?;
        let value = self.result(key)?;
        let unit = desc.unit.label();
        Some(if unit.is_empty() {
            desc.render(value)
        } else {
            format!("{} {unit}", desc.render(value))
        })
    }

    /// Whether a result passes its acceptance limit.
    pub fn result_accepted(&self, key: &str) -> Option<bool> {
        let desc = parameter::result(key)?;
        let value = desc.physical(self.result(key)?);
        desc.acceptance?.accepts(value, &self.core.parameters)
    }

    /// Amplitude spectrum of the last capture.
    pub fn spectrum(&self) -> Option<&[f64]> {
        self.core.spectrum.as_deref()
    }

    /// Copy the output power calibration into the reference parameters, if
    /// the task holds them.
    pub fn load_calibration(&mut self, calibration: &CalibrationSettings) {
        if let Some(v) = self.core.parameters.get_mut(parameter::REF_ATTENUATION) {
            *v = calibration.ref_attenuation;
        }
        if let Some(v) = self.core.parameters.get_mut(parameter::REF_OUTPUT_POWER) {
            *v = calibration.ref_output_power;
        }
    }

    /// Initialize with the current parameters.
    pub fn init_meas(&mut self, ctx: &TaskContext) -> &mut Self {
        self.init_meas_with(ctx, &[])
    }

    /// Initialize, applying the overrides that name held parameters.
    pub fn init_meas_with(&mut self, ctx: &TaskContext, overrides: &[(&str, f64)]) -> &mut Self {
        let core = &mut self.core;
        core.failed = false;
        core.completed = false;
        core.inited = false;
        core.message.clear();
        core.start = None;
        core.elapsed = Duration::ZERO;
        core.state = TaskState::Initializing;
        core.clear_results();

        if self.procedure.needs_device() {
            match ctx.device.connect() {
                Ok(connection) => self.core.connection = Some(connection),
                Err(err) => {
                    self.fail(TaskFault::Communication(err), ctx, TaskState::InitFailed);
                    return self;
                }
            }
        }

        for (key, value) in overrides {
            if let Some(slot) = self.core.parameters.get_mut(*key) {
                *slot = *value;
            }
        }

        let violations: Vec<&str> = self
            .core
            .parameters
            .iter()
            .filter_map(|(key, value)| parameter::parameter(key).filter(|d| !d.accepts(*value)))
            .map(|d| d.label.text())
            .collect();
        if !violations.is_empty() {
            let mut message = format!("{}:", Message::ParameterError.text());
            for label in violations {
                message.push('\n');
                message.push_str(label);
                message.push(' ');
                message.push_str(Message::OutOfRange.text());
            }
            self.core.set_failure(message);
            self.core.state = TaskState::InitFailed;
            warn!(kind = %self.kind(), "Parameter validation failed");
            return self;
        }

        match self.procedure.init(&mut self.core, ctx) {
            Ok(()) => {
                self.core.inited = true;
                self.core.state = TaskState::Initialized;
                self.core.start = Some(Instant::now());
                if self.core.single {
                    self.core.set_success();
                }
                info!(kind = %self.kind(), id = ?self.core.id, "Task initialized");
            }
            Err(fault) => self.fail(fault, ctx, TaskState::InitFailed),
        }
        self
    }

    /// Run one measurement cycle.
    pub fn measure(&mut self, ctx: &TaskContext) -> &mut Self {
        self.core.completed = false;
        self.core.message.clear();
        self.core.clear_results();
        if self.core.failed {
            return self;
        }

        self.core.state = TaskState::Measuring;
        match self.procedure.measure(&mut self.core, ctx) {
            Ok(()) => {
                self.core.set_success();
                self.core.state = TaskState::Measured;
                debug!(kind = %self.kind(), elapsed = ?self.core.elapsed, "Measurement cycle done");
            }
            Err(fault) => self.fail(fault, ctx, TaskState::MeasureFailed),
        }
        self
    }

    fn fail(&mut self, fault: TaskFault, ctx: &TaskContext, state: TaskState) {
        let message = match fault {
            TaskFault::Communication(err) => {
                let mut message = format!("{}:\n{err}", Message::CommunicationError.text());
                if err.is_device_busy() {
                    message.push('\n');
                    message.push_str(Message::RebootDevice.text());
                }
                if let Some(connection) = self.core.connection.take() {
                    ctx.device.discard(&connection.path);
                }
                warn!(kind = %self.kind(), "Communication fault: {err}");
                message
            }
            TaskFault::PllLock(Pll::Modulator) => Message::ModulatorPllError.text().to_string(),
            TaskFault::PllLock(Pll::Demodulator) => Message::DemodulatorPllError.text().to_string(),
            TaskFault::Evaluation(detail) => match detail {
                Some(detail) => format!("{}:\n{detail}", Message::MeasurementError.text()),
                None => Message::MeasurementError.text().to_string(),
            },
            TaskFault::Status { status, mask } => format!(
                "{}:\n{}",
                Message::StatusError.text(),
                describe_status(status & mask).join("\n")
            ),
            TaskFault::Setup(message) => message,
        };
        self.core.set_failure(message);
        self.core.state = state;
    }

    /// Copy of the reportable state, safe to send across threads.
    pub fn snapshot(&self) -> ResultSnapshot {
        ResultSnapshot {
            id: self.core.id,
            kind: self.kind(),
            results: self
                .core
                .results
                .iter()
                .map(|(k, v)| (k.to_string(), *v))
                .collect(),
            spectrum: self.core.spectrum.clone(),
            message: self.core.message.clone(),
            failed: self.core.failed,
            completed: self.core.completed,
            inited: self.core.inited,
            state: self.core.state,
            elapsed_secs: self.core.elapsed.as_secs_f64(),
            timestamp: Utc::now(),
        }
    }

    /// Take over results and status from a snapshot of the same task.
    ///
    /// Returns `false` and changes nothing when the identities differ.
    pub fn apply_snapshot(&mut self, snapshot: &ResultSnapshot) -> bool {
        if snapshot.id != self.core.id || snapshot.kind != self.kind() {
            return false;
        }
        for (key, slot) in self.core.results.iter_mut() {
            *slot = snapshot.results.get(*key).copied().flatten();
        }
        self.core.spectrum = snapshot.spectrum.clone();
        self.core.message = snapshot.message.clone();
        self.core.failed = snapshot.failed;
        self.core.completed = snapshot.completed;
        self.core.inited = snapshot.inited;
        self.core.state = snapshot.state;
        self.core.elapsed = Duration::from_secs_f64(snapshot.elapsed_secs.max(0.0));
        true
    }
}

/// Reportable task state, sent from the orchestrator to the controller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultSnapshot {
    pub id: Option<TaskId>,
    pub kind: TaskKind,
    /// Device-native results.
    pub results: BTreeMap<String, Option<f64>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub spectrum: Option<Vec<f64>>,
    pub message: String,
    pub failed: bool,
    pub completed: bool,
    pub inited: bool,
    pub state: TaskState,
    pub elapsed_secs: f64,
    pub timestamp: DateTime<Utc>,
}

impl ResultSnapshot {
    /// Device-native value of a result.
    pub fn result(&self, key: &str) -> Option<f64> {
        self.results.get(key).copied().flatten()
    }
}

#[cfg(test)]
pub(crate) mod test_support {
    use super::*;
    use crate::numerics::mock::ScriptedNumerics;
    use crate::transport::mock::{MockDevice, MockOpener};
    use crate::transport::LinkSettings;

    /// Context on a fresh mock device with fast timing.
    pub fn mock_context(device: &MockDevice, numerics: Arc<ScriptedNumerics>) -> TaskContext {
        let settings = LinkSettings {
            poll_interval: Duration::from_millis(1),
            pll_lock_timeout: Duration::from_millis(20),
            ..LinkSettings::default()
        };
        let registry = Arc::new(ConnectionRegistry::new(
            Arc::new(MockOpener::new(device.clone())),
            settings,
        ));
        TaskContext::new(DeviceLink::new(registry, Some("/dev/mock".to_string())), numerics)
            .with_timing(TimingSettings {
                calibration_settle_ms: 1,
                pll_lock_timeout_ms: 20,
            })
    }
}
