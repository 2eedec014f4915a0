//! Static descriptors of task parameters and results.
//!
//! Values are stored in device-native units (Hz, dB, fractions, raw counts).
//! Descriptors carry the display unit, format and, for results, an optional
//! transform to the displayed quantity and an acceptance limit.

use crate::i18n::Localized;
use crate::units::{Unit, KHZ, MHZ};
use std::collections::BTreeMap;

pub const ATTENUATION: &str = "attenuation";
pub const AVERAGING: &str = "averaging";
pub const DATA_LENGTH: &str = "dataLength";
pub const FREQUENCY: &str = "frequency";
pub const MOD_FREQUENCY: &str = "modFrequency";
pub const MOD_AMPLITUDE: &str = "modAmplitude";
pub const REF_DISTORTION: &str = "refDistortion";
pub const REF_ATTENUATION: &str = "refAttenuation";
pub const REF_OUTPUT_POWER: &str = "refOutputPower";
pub const NOISE: &str = "noise";

pub const STATUS: &str = "status";
pub const OUTPUT_POWER: &str = "outputPower";
pub const INPUT_POWER: &str = "inputPower";
pub const CARRIER_FREQUENCY: &str = "carrierFrequency";
pub const DISTORTION: &str = "distortion";
pub const MODULATION_INDEX: &str = "modulationIndex";
pub const BIT_ERROR_RATE: &str = "bitErrorRate";
pub const BIT_FREQUENCY_DEVIATION: &str = "bitFrequencyDeviation";
pub const BIT_POWER_DIFFERENCE: &str = "bitPowerDifference";
pub const THRESHOLD_POWER: &str = "thresholdPower";
pub const SEARCH_STATUS: &str = "searchStatus";

/// Numeric kind of a parameter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ValueKind {
    /// Whole number of device units.
    Integer,
    Real,
}

/// Fixed-point display format: field width and decimals.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DisplayFormat {
    pub width: usize,
    pub precision: usize,
}

const fn fmt(width: usize, precision: usize) -> DisplayFormat {
    DisplayFormat { width, precision }
}

impl DisplayFormat {
    /// Render a display value.
    pub fn render(self, value: f64) -> String {
        format!("{:>w$.p$}", value, w = self.width, p = self.precision)
    }
}

/// Description of one task parameter.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ParameterDescriptor {
    pub key: &'static str,
    pub label: Localized,
    pub kind: ValueKind,
    /// Default, device-native.
    pub default: f64,
    /// Inclusive bounds, device-native. Read-only parameters have none.
    pub bounds: Option<(f64, f64)>,
    /// Operator increment, device-native.
    pub step: Option<f64>,
    pub unit: Unit,
    pub format: DisplayFormat,
    pub read_only: bool,
}

impl ParameterDescriptor {
    /// Whether a device-native value satisfies kind and bounds.
    pub fn accepts(&self, value: f64) -> bool {
        if !value.is_finite() {
            return false;
        }
        if self.kind == ValueKind::Integer && value.fract() != 0.0 {
            return false;
        }
        match self.bounds {
            Some((low, high)) => (low..=high).contains(&value),
            None => true,
        }
    }

    /// Device-native value shown in display units. Integer parameters with a
    /// unit multiplier of 1 are shown whole.
    pub fn to_display(&self, native: f64) -> f64 {
        if self.kind == ValueKind::Integer && self.unit.multiplier() == 1.0 {
            native.trunc()
        } else {
            self.unit.to_display(native)
        }
    }

    /// Display value converted to device units; integer parameters are
    /// rounded to the nearest device unit.
    pub fn to_native(&self, display: f64) -> f64 {
        let native = self.unit.to_native(display);
        match self.kind {
            ValueKind::Integer => native.round(),
            ValueKind::Real => native,
        }
    }

    /// Display-unit bounds and step.
    pub fn display_bounds(&self) -> Option<(f64, f64)> {
        self.bounds
            .map(|(low, high)| (self.unit.to_display(low), self.unit.to_display(high)))
    }

    /// Formatted display value.
    pub fn render(&self, native: f64) -> String {
        self.format.render(self.to_display(native))
    }
}

macro_rules! loc {
    ($en:expr, $ru:expr) => {
        Localized { en: $en, ru: $ru }
    };
}

static PARAMETERS: [ParameterDescriptor; 10] = [
    ParameterDescriptor {
        key: ATTENUATION,
        label: loc!("Attenuation", "Затухание"),
        kind: ValueKind::Real,
        default: 31.5,
        bounds: Some((0.5, 31.5)),
        step: Some(0.5),
        unit: Unit::Db,
        format: fmt(4, 1),
        read_only: false,
    },
    ParameterDescriptor {
        key: AVERAGING,
        label: loc!("N av. pnts", "N точек уср."),
        kind: ValueKind::Integer,
        default: 64.0,
        bounds: Some((1.0, 4096.0)),
        step: Some(1.0),
        unit: Unit::One,
        format: fmt(4, 0),
        read_only: false,
    },
    ParameterDescriptor {
        key: DATA_LENGTH,
        label: loc!("N ADC pnts", "N точек АЦП"),
        kind: ValueKind::Integer,
        default: 16384.0,
        bounds: Some((4.0, 16384.0)),
        step: Some(2.0),
        unit: Unit::One,
        format: fmt(5, 0),
        read_only: false,
    },
    ParameterDescriptor {
        key: FREQUENCY,
        label: loc!("Carrier freq.", "Несущая част."),
        kind: ValueKind::Integer,
        default: 200.0 * MHZ,
        bounds: Some((138.0 * MHZ, 800.0 * MHZ)),
        step: Some(MHZ),
        unit: Unit::MHz,
        format: fmt(10, 6),
        read_only: false,
    },
    ParameterDescriptor {
        key: MOD_FREQUENCY,
        label: loc!("Mod. frequency", "Частота мод."),
        kind: ValueKind::Integer,
        default: 10.0 * KHZ,
        bounds: Some((1.0, 100.0 * KHZ)),
        step: Some(100.0),
        unit: Unit::KHz,
        format: fmt(7, 3),
        read_only: false,
    },
    ParameterDescriptor {
        key: MOD_AMPLITUDE,
        label: loc!("Mod. ampl.", "Ампл. мод."),
        kind: ValueKind::Real,
        default: 0.5,
        bounds: Some((0.0, 1.0)),
        step: Some(0.01),
        unit: Unit::Percent,
        format: fmt(5, 1),
        read_only: false,
    },
    ParameterDescriptor {
        key: REF_DISTORTION,
        label: loc!("Thr. INL", "Порог КНИ"),
        kind: ValueKind::Real,
        default: 0.05,
        bounds: Some((0.01, 1.0)),
        step: Some(0.01),
        unit: Unit::Percent,
        format: fmt(5, 1),
        read_only: false,
    },
    ParameterDescriptor {
        key: REF_ATTENUATION,
        label: loc!("Ref. att.", "Опор. осл."),
        kind: ValueKind::Real,
        default: 31.5,
        bounds: None,
        step: None,
        unit: Unit::Db,
        format: fmt(4, 1),
        read_only: true,
    },
    ParameterDescriptor {
        key: REF_OUTPUT_POWER,
        label: loc!("Ref. power", "Опор. мощн."),
        kind: ValueKind::Real,
        default: 1.0,
        bounds: None,
        step: None,
        unit: Unit::Dbm,
        format: fmt(5, 1),
        read_only: true,
    },
    ParameterDescriptor {
        key: NOISE,
        label: loc!("Noise", "Шум"),
        kind: ValueKind::Real,
        default: 0.1,
        bounds: Some((0.0, 3.0)),
        step: Some(0.01),
        unit: Unit::Percent,
        format: fmt(5, 1),
        read_only: false,
    },
];

/// Descriptor of a parameter key.
pub fn parameter(key: &str) -> Option<&'static ParameterDescriptor> {
    PARAMETERS.iter().find(|d| d.key == key)
}

/// All parameter descriptors.
pub fn parameters() -> &'static [ParameterDescriptor] {
    &PARAMETERS
}

/// Check one device-native value; unknown keys are rejected.
pub fn check_parameter(key: &str, value: f64) -> bool {
    parameter(key).is_some_and(|d| d.accepts(value))
}

/// Linear map from device counts to the displayed quantity.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Linear {
    pub scale: f64,
    pub offset: f64,
}

impl Linear {
    pub fn apply(self, value: f64) -> f64 {
        value * self.scale + self.offset
    }
}

/// Power detector: dBm per ADC count and the bottom of the range.
pub const POWER_FROM_COUNTS: Linear = Linear {
    scale: 3.0 / 34.0,
    offset: -70.0,
};

/// Where an acceptance target comes from.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Target {
    Value(f64),
    /// The task's value of this parameter.
    Parameter(&'static str),
}

/// Acceptance limit on a result, applied to the transformed value.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Acceptance {
    /// `|value - target|` within the absolute tolerance or the relative one,
    /// whichever is wider.
    Tolerance {
        target: Target,
        absolute: f64,
        relative: f64,
    },
    UpperLimit(f64),
}

impl Acceptance {
    /// Whether `value` passes; `None` when the target parameter is missing.
    pub fn accepts(&self, value: f64, parameters: &BTreeMap<&'static str, f64>) -> Option<bool> {
        match *self {
            Acceptance::UpperLimit(limit) => Some(value <= limit),
            Acceptance::Tolerance {
                target,
                absolute,
                relative,
            } => {
                let target = match target {
                    Target::Value(v) => v,
                    Target::Parameter(key) => *parameters.get(key)?,
                };
                let tolerance = absolute.max(relative * target.abs());
                Some((value - target).abs() <= tolerance)
            }
        }
    }
}

/// Description of one task result.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ResultDescriptor {
    pub key: &'static str,
    pub label: Localized,
    pub unit: Unit,
    pub format: DisplayFormat,
    pub transform: Option<Linear>,
    pub acceptance: Option<Acceptance>,
}

impl ResultDescriptor {
    /// Stored value mapped to the physical quantity the unit refers to.
    pub fn physical(&self, native: f64) -> f64 {
        self.transform.map_or(native, |t| t.apply(native))
    }

    /// Stored value in display units.
    pub fn to_display(&self, native: f64) -> f64 {
        self.unit.to_display(self.physical(native))
    }

    /// Formatted display value.
    pub fn render(&self, native: f64) -> String {
        self.format.render(self.to_display(native))
    }
}

static RESULTS: [ResultDescriptor; 11] = [
    ResultDescriptor {
        key: STATUS,
        label: loc!("Status", "Статус"),
        unit: Unit::One,
        format: fmt(3, 0),
        transform: None,
        acceptance: None,
    },
    ResultDescriptor {
        key: OUTPUT_POWER,
        label: loc!("Out P", "Вых. P"),
        unit: Unit::Dbm,
        format: fmt(5, 1),
        transform: Some(POWER_FROM_COUNTS),
        acceptance: Some(Acceptance::Tolerance {
            target: Target::Value(1.0),
            absolute: 0.01,
            relative: 1e-2,
        }),
    },
    ResultDescriptor {
        key: INPUT_POWER,
        label: loc!("In P", "Вх. P"),
        unit: Unit::Dbm,
        format: fmt(5, 1),
        transform: Some(POWER_FROM_COUNTS),
        acceptance: Some(Acceptance::Tolerance {
            target: Target::Value(1.0),
            absolute: 0.01,
            relative: 1e-2,
        }),
    },
    ResultDescriptor {
        key: CARRIER_FREQUENCY,
        label: loc!("Carrier f", "Несущая f"),
        unit: Unit::MHz,
        format: fmt(10, 6),
        transform: None,
        acceptance: Some(Acceptance::Tolerance {
            target: Target::Parameter(FREQUENCY),
            absolute: KHZ,
            relative: 1e-4,
        }),
    },
    ResultDescriptor {
        key: DISTORTION,
        label: loc!("INL", "КНИ"),
        unit: Unit::Percent,
        format: fmt(5, 1),
        transform: None,
        acceptance: Some(Acceptance::UpperLimit(1.0)),
    },
    ResultDescriptor {
        key: MODULATION_INDEX,
        label: loc!("Mod. index", "Индекс мод."),
        unit: Unit::One,
        format: fmt(4, 2),
        transform: None,
        acceptance: Some(Acceptance::Tolerance {
            target: Target::Value(2.0),
            absolute: 0.1,
            relative: 0.1,
        }),
    },
    ResultDescriptor {
        key: BIT_ERROR_RATE,
        label: loc!("BER", "BER"),
        unit: Unit::Percent,
        format: fmt(5, 1),
        transform: None,
        acceptance: Some(Acceptance::UpperLimit(1.0)),
    },
    ResultDescriptor {
        key: BIT_FREQUENCY_DEVIATION,
        label: loc!("\u{2206} f", "\u{2206} f"),
        unit: Unit::Hz,
        format: fmt(5, 1),
        transform: None,
        acceptance: Some(Acceptance::Tolerance {
            target: Target::Value(0.0),
            absolute: 1.0,
            relative: 0.0,
        }),
    },
    ResultDescriptor {
        key: BIT_POWER_DIFFERENCE,
        label: loc!("\u{2206} P", "\u{2206} P"),
        unit: Unit::Percent,
        format: fmt(5, 1),
        transform: None,
        acceptance: Some(Acceptance::Tolerance {
            target: Target::Value(0.0),
            absolute: 0.1,
            relative: 0.0,
        }),
    },
    ResultDescriptor {
        key: THRESHOLD_POWER,
        label: loc!("Thr. P", "Порог P"),
        unit: Unit::Dbm,
        format: fmt(5, 1),
        transform: None,
        acceptance: Some(Acceptance::UpperLimit(-10.0)),
    },
    ResultDescriptor {
        key: SEARCH_STATUS,
        label: loc!("Search status", "Статус поиска"),
        unit: Unit::One,
        format: fmt(2, 0),
        transform: None,
        acceptance: None,
    },
];

/// Descriptor of a result key.
pub fn result(key: &str) -> Option<&'static ResultDescriptor> {
    RESULTS.iter().find(|d| d.key == key)
}

/// All result descriptors.
pub fn results() -> &'static [ResultDescriptor] {
    &RESULTS
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_inclusive_and_one_step_beyond_rejected() {
        for d in parameters().iter().filter(|d| !d.read_only) {
            let (low, high) = d.bounds.expect("writable parameters have bounds");
            let step = d.step.expect("writable parameters have a step");
            assert!(d.accepts(low), "{} low bound", d.key);
            assert!(d.accepts(high), "{} high bound", d.key);
            assert!(!d.accepts(high + step), "{} above range", d.key);
            assert!(!d.accepts(low - step), "{} below range", d.key);
        }
    }

    #[test]
    fn test_integer_parameters_reject_fractions() {
        assert!(check_parameter(AVERAGING, 64.0));
        assert!(!check_parameter(AVERAGING, 64.5));
        assert!(!check_parameter(FREQUENCY, 200_000_000.5));
        assert!(check_parameter(ATTENUATION, 10.25));
    }

    #[test]
    fn test_read_only_parameters_have_no_bounds() {
        assert!(check_parameter(REF_OUTPUT_POWER, -1000.0));
        assert!(!check_parameter("bogus", 1.0));
    }

    #[test]
    fn test_display_conversion() {
        let freq = parameter(FREQUENCY).expect("known");
        assert_eq!(freq.to_display(200_000_000.0), 200.0);
        assert_eq!(freq.to_native(433.5), 433_500_000.0);
        assert_eq!(freq.render(200_000_000.0), "200.000000");

        let amp = parameter(MOD_AMPLITUDE).expect("known");
        assert!((amp.to_display(0.5) - 50.0).abs() < 1e-12);
        assert!((amp.to_native(25.0) - 0.25).abs() < 1e-12);
    }

    #[test]
    fn test_power_transform_and_acceptance() {
        let out = result(OUTPUT_POWER).expect("known");
        assert!((out.physical(340.0) - (-40.0)).abs() < 1e-9);

        let carrier = result(CARRIER_FREQUENCY).expect("known");
        let mut params = BTreeMap::new();
        params.insert(FREQUENCY, 200_000_000.0);
        let limit = carrier.acceptance.expect("has limit");
        assert_eq!(limit.accepts(200_010_000.0, &params), Some(true));
        assert_eq!(limit.accepts(200_030_000.0, &params), Some(false));
        assert_eq!(limit.accepts(200_000_000.0, &BTreeMap::new()), None);
    }
}
