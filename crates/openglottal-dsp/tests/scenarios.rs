/// End-to-end scenarios across the library.
///
/// 1. Classic path: noise through a known resonator, LPC recovers the peak
/// 2. Classic path: residual resynthesizes the frame
/// 3. Source-filter fit from 100 Hz converges on a 130 Hz model-generated target
/// 4. The same start over a longer frame locks onto a sub-harmonic
use std::f64::consts::PI;
use std::sync::Arc;

use openglottal_dsp::filters::{forward_filter, forward_filter_checked, inverse_filter};
use openglottal_dsp::frame::remove_dc;
use openglottal_dsp::{
    AdamConfig, FitConfig, Fitter, Frame, InitialParams, LpcParams, ModelConfig, SourceFilterModel,
};
use rand::{Rng, SeedableRng};
use rand_pcg::Pcg64;

const SR: f64 = 16000.0;

/// `len` samples of uniform white noise through a two-pole resonator at
/// `freq` Hz, after a warm-up that is discarded.
fn resonator_noise(seed: u64, freq: f64, radius: f64, len: usize) -> Vec<f64> {
    let mut rng = Pcg64::seed_from_u64(seed);
    let theta = 2.0 * PI * freq / SR;
    let coeffs = [2.0 * radius * theta.cos(), -radius * radius];
    let warmup = 200;
    let noise: Vec<f64> = (0..len + warmup).map(|_| rng.gen_range(-1.0..1.0)).collect();
    let y = forward_filter(&noise, &coeffs, 1.0);
    remove_dc(&y[warmup..])
}

#[test]
fn test_lpc_recovers_resonator_peak() {
    for seed in [1, 7, 42] {
        let x = resonator_noise(seed, 1000.0, 0.99, 1024);
        let frame = Frame::new(x, SR).unwrap();
        let lpc = LpcParams::estimate(&frame, 18).unwrap();
        let peak = lpc.peak_frequency(4096, SR).unwrap();
        assert!((peak - 1000.0).abs() < 50.0, "seed {seed}: peak at {peak} Hz");
    }
}

#[test]
fn test_residual_resynthesizes_frame() {
    let x = resonator_noise(3, 1800.0, 0.97, 1024);
    let lpc = LpcParams::estimate(&Frame::new(x.clone(), SR).unwrap(), 12).unwrap();
    assert!(lpc.is_stable());

    let residual = inverse_filter(&x, &lpc.coefficients, lpc.gain);
    let (y, advisory) = forward_filter_checked(&residual, &lpc.coefficients, lpc.gain);
    assert!(advisory.is_none());
    let scale = x.iter().fold(0.0f64, |m, v| m.max(v.abs()));
    for (a, b) in x.iter().zip(&y) {
        assert!((a - b).abs() < 1e-9 * scale, "{a} vs {b}");
    }
}

fn fit_config() -> ModelConfig {
    ModelConfig {
        sample_rate: SR,
        table_size: 256,
        table_count: 20,
        lpc_order: 4,
    }
}

/// `len` samples from a 130 Hz voice and a model started at `f0` with a
/// flat filter, sharing one bank.
fn target_and_start(len: usize, f0: f64) -> (Vec<f64>, SourceFilterModel) {
    let config = fit_config();
    let bank = config.build_bank().unwrap();

    let truth = SourceFilterModel::new(
        config.clone(),
        Arc::clone(&bank),
        InitialParams {
            f0: 130.0,
            offset: 0.25,
            rd_index: 0.5,
            log_gain: 0.5f64.ln(),
            log_area_ratios: vec![0.8, -0.5, 0.3, -0.2],
        },
    )
    .unwrap();

    let model = SourceFilterModel::new(
        config,
        bank,
        InitialParams {
            f0,
            offset: 0.25,
            rd_index: 0.0,
            log_gain: 0.3f64.ln(),
            log_area_ratios: Vec::new(),
        },
    )
    .unwrap();

    (truth.predict(len), model)
}

fn adam_fitter() -> Fitter {
    Fitter::new(FitConfig {
        iterations: 2000,
        log_every: 100,
        optimizer: AdamConfig {
            learning_rate: 0.001,
            ..Default::default()
        },
    })
}

#[test]
fn test_fit_converges_from_offset_f0() {
    let (target, mut model) = target_and_start(256, 100.0);
    let report = adam_fitter().fit(&mut model, &target).unwrap();

    assert_eq!(report.iterations(), 2000);
    let initial = report.initial_loss().unwrap();
    let last = report.final_loss().unwrap();
    assert!(last < 0.1 * initial, "final loss {last} vs initial {initial}");

    let windows = report.window_means(200);
    for pair in windows.windows(2) {
        assert!(pair[1] < pair[0], "windowed loss did not decrease: {:?}", windows);
    }
    assert!((model.f0() - 130.0).abs() < 2.0, "f0 settled at {}", model.f0());
}

/// Over a longer frame the L1 landscape has a sub-harmonic basin below the
/// start: from 100 Hz the fit settles near 87 Hz instead of 130 Hz.
#[test]
fn test_long_frame_fit_falls_into_subharmonic() {
    let (target, mut model) = target_and_start(512, 100.0);
    let report = adam_fitter().fit(&mut model, &target).unwrap();

    let initial = report.initial_loss().unwrap();
    let last = report.final_loss().unwrap();
    assert!(model.f0() < 100.0, "f0 settled at {}", model.f0());
    assert!(last > 0.5 * initial, "final loss {last} vs initial {initial}");
}
