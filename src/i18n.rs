//! Operator language selection and localized strings.
//!
//! The language is a process-wide setting read whenever a task produces an
//! operator-facing message. Stable identifiers (task kinds, parameter keys)
//! never depend on it; only presentation text does.

use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicU8, Ordering};

/// Operator language.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Language {
    /// English
    #[default]
    #[serde(alias = "english")]
    En,
    /// Russian
    #[serde(alias = "russian")]
    Ru,
}

static LANGUAGE: AtomicU8 = AtomicU8::new(0);

/// Currently selected operator language.
pub fn language() -> Language {
    match LANGUAGE.load(Ordering::Relaxed) {
        1 => Language::Ru,
        _ => Language::En,
    }
}

/// Select the operator language for all subsequent messages.
pub fn set_language(lang: Language) {
    let code = match lang {
        Language::En => 0,
        Language::Ru => 1,
    };
    LANGUAGE.store(code, Ordering::Relaxed);
}

/// A string available in both operator languages.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Localized {
    /// English text
    pub en: &'static str,
    /// Russian text
    pub ru: &'static str,
}

impl Localized {
    /// Text in the currently selected language.
    pub fn text(&self) -> &'static str {
        self.in_language(language())
    }

    /// Text in the given language.
    pub fn in_language(&self, lang: Language) -> &'static str {
        match lang {
            Language::En => self.en,
            Language::Ru => self.ru,
        }
    }
}

/// Fixed operator messages produced by the task layer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message {
    ParameterError,
    OutOfRange,
    CommunicationError,
    RebootDevice,
    StatusError,
    ModulatorPllError,
    DemodulatorPllError,
    MeasurementError,
    NoCarrierSignal,
    CarrierEvaluationError,
    InconsistentBuffer,
    LfAdcOverload,
    DistortionUndefined,
    DataLengthMismatch,
    TooFewBits,
    ModelDataError,
}

impl Message {
    fn localized(self) -> Localized {
        let (en, ru) = match self {
            Message::ParameterError => ("Parameter enter error", "Ошибка ввода параметров"),
            Message::OutOfRange => ("out of range", "вне диапазона"),
            Message::CommunicationError => ("Communication error", "Ошибка связи с устройством"),
            Message::RebootDevice => ("Reboot the device.", "Перезагрузите устройство."),
            Message::StatusError => ("Status error", "Ошибка статуса"),
            Message::ModulatorPllError => ("Modulator PLL error", "Ошибка PLL модулятора"),
            Message::DemodulatorPllError => ("Demodulator PLL error", "Ошибка PLL демодулятора"),
            Message::MeasurementError => ("Measurement error", "Ошибка измерения"),
            Message::NoCarrierSignal => ("No carrier signal", "Сигнал несущей не обнаружен"),
            Message::CarrierEvaluationError => (
                "Error in evaluating carrier frequency",
                "Ошибка в вычислении несущей частоты",
            ),
            Message::InconsistentBuffer => (
                "Inconsistent data buffer size",
                "Несогласованный размер буфера данных",
            ),
            Message::LfAdcOverload => ("LF ADC overload for range", "Перегрузка НЧ АЦП для диапазона"),
            Message::DistortionUndefined => ("INL is not defined", "КНИ не определен"),
            Message::DataLengthMismatch => (
                "Data length differs from expected",
                "Длина данных отличается от ожидаемой",
            ),
            Message::TooFewBits => ("Too small data length", "Слишком мало данных"),
            Message::ModelDataError => ("Error loading data files", "Ошибка загрузки файлов данных"),
        };
        Localized { en, ru }
    }

    /// Text in the currently selected language.
    pub fn text(self) -> &'static str {
        self.localized().text()
    }

    /// Text in the given language.
    pub fn in_language(self, lang: Language) -> &'static str {
        self.localized().in_language(lang)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;

    #[test]
    #[serial]
    fn test_language_switch() {
        set_language(Language::Ru);
        assert_eq!(language(), Language::Ru);
        assert_eq!(Message::OutOfRange.text(), "вне диапазона");
        set_language(Language::En);
        assert_eq!(Message::OutOfRange.text(), "out of range");
    }

    #[test]
    fn test_language_from_config_string() {
        let lang: Language = serde_json::from_str("\"ru\"").expect("parse");
        assert_eq!(lang, Language::Ru);
        let lang: Language = serde_json::from_str("\"english\"").expect("parse");
        assert_eq!(lang, Language::En);
    }
}
