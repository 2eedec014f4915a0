//! Display units and their multipliers to device-native units.
//!
//! A stored value is always device-native; `display = native / multiplier`.

use crate::i18n::{Language, Localized};

/// Hertz
pub const HZ: f64 = 1.0;
/// Kilohertz in Hz
pub const KHZ: f64 = 1_000.0;
/// Megahertz in Hz
pub const MHZ: f64 = 1_000_000.0;

/// Sampling frequency of the device ADC in Hz.
pub const ADC_SAMPLE_FREQUENCY: f64 = 120_000.0;
/// Frequency deviation of the inner DMR symbols in Hz; outer symbols use 3×.
pub const SYMBOL_DEVIATION_FREQUENCY: f64 = 648.0;

/// Physical quantity a unit measures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Quantity {
    Frequency,
    Voltage,
    Power,
    Attenuation,
    LogPower,
    Fraction,
    Dimensionless,
}

/// Display unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Unit {
    Hz,
    KHz,
    MHz,
    GHz,
    MilliVolt,
    Volt,
    MilliWatt,
    Watt,
    Db,
    Dbm,
    Percent,
    One,
}

impl Unit {
    /// Multiplier converting a display value into device-native units.
    pub fn multiplier(self) -> f64 {
        match self {
            Unit::Hz => HZ,
            Unit::KHz => KHZ,
            Unit::MHz => MHZ,
            Unit::GHz => 1_000_000_000.0,
            Unit::MilliVolt => 0.001,
            Unit::Volt => 1.0,
            Unit::MilliWatt => 1.0,
            Unit::Watt => 1000.0,
            Unit::Db | Unit::Dbm | Unit::One => 1.0,
            Unit::Percent => 0.01,
        }
    }

    /// Quantity measured by this unit.
    pub fn quantity(self) -> Quantity {
        match self {
            Unit::Hz | Unit::KHz | Unit::MHz | Unit::GHz => Quantity::Frequency,
            Unit::MilliVolt | Unit::Volt => Quantity::Voltage,
            Unit::MilliWatt | Unit::Watt => Quantity::Power,
            Unit::Db => Quantity::Attenuation,
            Unit::Dbm => Quantity::LogPower,
            Unit::Percent => Quantity::Fraction,
            Unit::One => Quantity::Dimensionless,
        }
    }

    fn localized(self) -> Localized {
        let (en, ru) = match self {
            Unit::Hz => ("Hz", "Гц"),
            Unit::KHz => ("kHz", "кГц"),
            Unit::MHz => ("MHz", "МГц"),
            Unit::GHz => ("GHz", "ГГц"),
            Unit::MilliVolt => ("mV", "мВ"),
            Unit::Volt => ("V", "В"),
            Unit::MilliWatt => ("mW", "мВт"),
            Unit::Watt => ("W", "Вт"),
            Unit::Db => ("dB", "дБ"),
            Unit::Dbm => ("dBm", "дБм"),
            Unit::Percent => ("%", "%"),
            Unit::One => ("", ""),
        };
        Localized { en, ru }
    }

    /// Unit label in the currently selected language.
    pub fn label(self) -> &'static str {
        self.localized().text()
    }

    /// Unit label in the given language.
    pub fn label_in(self, lang: Language) -> &'static str {
        self.localized().in_language(lang)
    }

    /// Convert a device-native value to this display unit.
    pub fn to_display(self, native: f64) -> f64 {
        native / self.multiplier()
    }

    /// Convert a display value to device-native units.
    pub fn to_native(self, display: f64) -> f64 {
        display * self.multiplier()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_frequency_conversion() {
        assert_eq!(Unit::MHz.to_display(200.0 * MHZ), 200.0);
        assert_eq!(Unit::KHz.to_native(10.0), 10_000.0);
        assert_eq!(Unit::MHz.quantity(), Quantity::Frequency);
    }

    #[test]
    fn test_percent_is_fraction() {
        assert!((Unit::Percent.to_display(0.05) - 5.0).abs() < 1e-12);
        assert_eq!(Unit::Percent.label_in(Language::En), "%");
        assert_eq!(Unit::Db.label_in(Language::Ru), "дБ");
    }
}
