//! Input and output RF power.

use super::parameter::{ATTENUATION, AVERAGING, INPUT_POWER, OUTPUT_POWER};
use super::{Procedure, TaskContext, TaskCore, TaskFault, TaskKind};
use crate::transport::{self, Payload, Reply};

/// Attenuator code for an attenuation in dB (0.5 dB steps).
pub fn attenuation_code(attenuation: f64) -> u64 {
    (2.0 * attenuation + 0.5).floor().max(0.0) as u64
}

/// Averaged power detector readings, stored as raw ADC counts.
pub struct MeasurePower;

impl Procedure for MeasurePower {
    fn kind(&self) -> TaskKind {
        TaskKind::MeasurePower
    }

    fn parameters(&self) -> &'static [&'static str] {
        &[AVERAGING, ATTENUATION]
    }

    fn results(&self) -> &'static [&'static str] {
        &[OUTPUT_POWER, INPUT_POWER]
    }

    fn init(&mut self, core: &mut TaskCore, _ctx: &TaskContext) -> Result<(), TaskFault> {
        let link = core.link()?;
        let mut t = transport::lock(&link);
        t.command("SET RF_PATH", &Payload::single(0), Reply::None)?;
        t.command(
            "SET ATT",
            &Payload::single(attenuation_code(core.value(ATTENUATION))),
            Reply::None,
        )?;
        Ok(())
    }

    fn measure(&mut self, core: &mut TaskCore, _ctx: &TaskContext) -> Result<(), TaskFault> {
        let link = core.link()?;
        let counts = transport::lock(&link).command(
            "GET PWR",
            &Payload::single(core.value(AVERAGING) as u64),
            Reply::Words(2),
        )?;
        core.set_result(OUTPUT_POWER, f64::from(counts[0]));
        core.set_result(INPUT_POWER, f64::from(counts[1]));
        Ok(())
    }
}
