/// WAV input/output for glottal-fit.
///
/// Input: any PCM or float WAV, downmixed to mono f64 in [-1, 1].
/// Output: mono 24-bit PCM, clamped to full scale.
use std::path::Path;

use hound::{SampleFormat, WavReader, WavSpec, WavWriter};

/// Mono samples plus the file's sample rate.
pub struct Audio {
    pub samples: Vec<f64>,
    pub sample_rate: u32,
}

pub fn read_mono(path: &Path) -> Result<Audio, hound::Error> {
    let mut reader = WavReader::open(path)?;
    let spec = reader.spec();
    let channels = spec.channels.max(1) as usize;

    let interleaved: Vec<f64> = match spec.sample_format {
        SampleFormat::Float => reader
            .samples::<f32>()
            .map(|s| s.map(f64::from))
            .collect::<Result<_, _>>()?,
        SampleFormat::Int => {
            let scale = 1.0 / (1i64 << (spec.bits_per_sample - 1)) as f64;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f64 * scale))
                .collect::<Result<_, _>>()?
        }
    };

    let samples = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f64>() / frame.len() as f64)
        .collect();

    Ok(Audio {
        samples,
        sample_rate: spec.sample_rate,
    })
}

pub fn write_mono_24(path: &Path, samples: &[f64], sample_rate: u32) -> Result<(), hound::Error> {
    let spec = WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 24,
        sample_format: SampleFormat::Int,
    };
    let mut writer = WavWriter::create(path, spec)?;
    let scale = (1 << 23) as f64 - 1.0;
    for &s in samples {
        let clamped = if s.is_finite() { s.clamp(-1.0, 1.0) } else { 0.0 };
        writer.write_sample((clamped * scale) as i32)?;
    }
    writer.finalize()
}

/// Scale so the largest magnitude equals `target` (no-op on silence).
pub fn normalize_peak(samples: &mut [f64], target: f64) {
    let peak = samples
        .iter()
        .filter(|x| x.is_finite())
        .fold(0.0f64, |m, x| m.max(x.abs()));
    if peak > 0.0 {
        let g = target / peak;
        for s in samples.iter_mut() {
            *s *= g;
        }
    }
}

pub fn peak_dbfs(samples: &[f64]) -> f64 {
    let peak = samples.iter().fold(0.0f64, |m, x| m.max(x.abs()));
    20.0 * peak.log10()
}
