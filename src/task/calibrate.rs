//! DC offset calibration of the device.

use super::parameter::STATUS;
use super::{Procedure, TaskContext, TaskCore, TaskFault, TaskKind};
use crate::transport::{self, Payload, Reply};

/// Status bits reported after calibration.
const CALIBRATION_STATUS_MASK: u16 = 0x23;
/// Bits that fail the calibration.
const CALIBRATION_FAULT_BITS: u16 = 0x03;

/// Single-shot: runs DC compensation and checks the DAC overflow bits.
pub struct Calibrate;

impl Procedure for Calibrate {
    fn kind(&self) -> TaskKind {
        TaskKind::Calibrate
    }

    fn parameters(&self) -> &'static [&'static str] {
        &[]
    }

    fn results(&self) -> &'static [&'static str] {
        &[STATUS]
    }

    fn single_shot(&self) -> bool {
        true
    }

    fn init(&mut self, core: &mut TaskCore, ctx: &TaskContext) -> Result<(), TaskFault> {
        let link = core.link()?;
        let status = {
            let mut t = transport::lock(&link);
            t.command("SET MEASST", &Payload::single(1), Reply::None)?;
            t.command("SET DCCOMP", &Payload::single(1), Reply::None)?;
            std::thread::sleep(ctx.timing.calibration_settle());
            t.command("SET DCCOMP", &Payload::single(0), Reply::None)?;
            t.status()?.unwrap_or_default()
        };
        core.set_result(STATUS, f64::from(status));

        if status & CALIBRATION_FAULT_BITS != 0 {
            return Err(TaskFault::Status {
                status,
                mask: CALIBRATION_STATUS_MASK,
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::numerics::mock::ScriptedNumerics;
    use crate::task::test_support::mock_context;
    use crate::task::{parameter, TaskKind, TaskState};
    use crate::transport::mock::MockDevice;
    use std::sync::Arc;

    #[test]
    fn test_calibration_sequence() {
        let device = MockDevice::new();
        device.set_status(0x10);
        let ctx = mock_context(&device, Arc::new(ScriptedNumerics::new()));
        let mut task = TaskKind::Calibrate.create();
        task.init_meas(&ctx);

        assert!(task.is_completed(), "{}", task.message());
        assert!(task.is_inited());
        assert_eq!(task.state(), TaskState::Initialized);
        assert_eq!(task.result(parameter::STATUS), Some(16.0));

        let requests = device.requests();
        let seq: Vec<(String, Vec<u16>)> = requests
            .iter()
            .map(|r| (r.name.clone(), r.u16_words()))
            .collect();
        assert_eq!(
            seq,
            vec![
                ("SET MEASST".to_string(), vec![1]),
                ("SET DCCOMP".to_string(), vec![1]),
                ("SET DCCOMP".to_string(), vec![0]),
                ("STATUS".to_string(), vec![]),
            ]
        );
    }
}
