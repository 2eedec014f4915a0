//! Bindings to the native `libdmr` numeric library.
#![allow(unsafe_code)]

use super::{
    check_range, BitErrorCount, Distortion, NumericRoutines, NumericsError, SpectralPeak,
    PLL_FREQUENCY_MAX, PLL_FREQUENCY_MIN,
};
use std::os::raw::{c_double, c_int, c_uint};

#[link(name = "dmr")]
extern "C" {
    fn getpllreg(
        setfreq: c_uint,
        maino: c_int,
        auxo: c_int,
        mltd: c_int,
        mainpow: c_int,
        auxpow: c_int,
        regs: *mut u32,
    ) -> c_int;

    fn peak_search(
        amp: *const c_double,
        fmin: c_int,
        fmax: c_int,
        ppwr: *mut c_double,
        pfpeak: *mut c_double,
    ) -> c_int;

    fn get_inl(
        amp: *const c_double,
        num: c_int,
        fm: c_double,
        pinl: *mut c_double,
        ph: *mut c_double,
    ) -> c_int;

    fn bercalc(
        i: *const c_int,
        q: *const c_int,
        size: c_int,
        numerr: *mut c_int,
        numbit: *mut c_int,
        is: *mut c_int,
        qs: *mut c_int,
        symlenload: *mut c_int,
        maxlen: c_int,
    ) -> c_int;
}

fn to_c_int(value: usize, what: &str) -> Result<c_int, NumericsError> {
    c_int::try_from(value).map_err(|_| NumericsError::InvalidInput(format!("{what} too large: {value}")))
}

/// `libdmr` linked at build time.
#[derive(Debug, Clone, Copy, Default)]
pub struct NativeNumerics;

impl NumericRoutines for NativeNumerics {
    fn synthesize_pll_registers(&self, frequency: u64) -> Result<[u32; 6], NumericsError> {
        if !(PLL_FREQUENCY_MIN..=PLL_FREQUENCY_MAX).contains(&frequency) {
            return Err(NumericsError::InvalidInput(format!(
                "PLL frequency {frequency} Hz out of range"
            )));
        }
        let setfreq = c_uint::try_from(frequency)
            .map_err(|_| NumericsError::InvalidInput(format!("frequency {frequency}")))?;
        let mut regs = [0u32; 6];
        // SAFETY: `regs` has room for the six registers the routine writes.
        let rc = unsafe { getpllreg(setfreq, 1, 1, 0, 0, 0, regs.as_mut_ptr()) };
        if rc < 0 || regs.iter().all(|&r| r == 0) {
            return Err(NumericsError::NotFound);
        }
        Ok(regs)
    }

    fn find_spectral_peak(
        &self,
        spectrum: &[f64],
        start: usize,
        end: usize,
    ) -> Result<SpectralPeak, NumericsError> {
        check_range(spectrum, start, end)?;
        let (mut power, mut index) = (0.0, 0.0);
        // SAFETY: bins start..=end lie inside `spectrum`, checked above.
        let rc = unsafe {
            peak_search(
                spectrum.as_ptr(),
                to_c_int(start, "start bin")?,
                to_c_int(end, "end bin")?,
                &mut power,
                &mut index,
            )
        };
        if rc == 0 {
            return Err(NumericsError::NotFound);
        }
        Ok(SpectralPeak { power, index })
    }

    fn distortion_and_modulation_index(
        &self,
        spectrum: &[f64],
        modulating_bin: f64,
    ) -> Result<Distortion, NumericsError> {
        if spectrum.is_empty() || !modulating_bin.is_finite() || modulating_bin <= 0.0 {
            return Err(NumericsError::InvalidInput(format!(
                "modulating bin {modulating_bin} for {} bins",
                spectrum.len()
            )));
        }
        let (mut distortion, mut modulation_index) = (0.0, 0.0);
        // SAFETY: the routine reads `num` bins of `spectrum`.
        let rc = unsafe {
            get_inl(
                spectrum.as_ptr(),
                to_c_int(spectrum.len(), "spectrum length")?,
                modulating_bin,
                &mut distortion,
                &mut modulation_index,
            )
        };
        if rc == 0 {
            return Err(NumericsError::NotFound);
        }
        Ok(Distortion {
            distortion,
            modulation_index,
        })
    }

    fn count_bit_errors(
        &self,
        i: &[i32],
        q: &[i32],
        max_len: usize,
    ) -> Result<BitErrorCount, NumericsError> {
        if i.len() != q.len() {
            return Err(NumericsError::InvalidInput(format!(
                "I/Q length mismatch: {} vs {}",
                i.len(),
                q.len()
            )));
        }
        let (mut errors, mut total): (c_int, c_int) = (0, 0);
        let mut reference_i = vec![0 as c_int; max_len];
        let mut reference_q = vec![0 as c_int; max_len];
        let mut lengths = [0 as c_int; 4];
        // SAFETY: I/Q have `size` samples, the reference buffers hold
        // `maxlen` samples and `lengths` holds the four symbol lengths.
        let rc = unsafe {
            bercalc(
                i.as_ptr(),
                q.as_ptr(),
                to_c_int(i.len(), "sample count")?,
                &mut errors,
                &mut total,
                reference_i.as_mut_ptr(),
                reference_q.as_mut_ptr(),
                lengths.as_mut_ptr(),
                to_c_int(max_len, "reference length")?,
            )
        };
        if rc == 0 {
            return Err(NumericsError::InvalidInput(format!(
                "too few samples: {}",
                i.len()
            )));
        }
        let symbol_lengths = lengths.map(|l| usize::try_from(l).unwrap_or(0));
        let used = symbol_lengths.iter().sum::<usize>().min(max_len);
        reference_i.truncate(used);
        reference_q.truncate(used);
        Ok(BitErrorCount {
            errors: usize::try_from(errors).unwrap_or(0),
            total: usize::try_from(total).unwrap_or(0),
            reference_i,
            reference_q,
            symbol_lengths,
        })
    }
}
