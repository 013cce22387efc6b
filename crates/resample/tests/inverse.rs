use resample::{convert, RateRatio, RateState};

fn sine(len: usize, hz: f32, rate: f32) -> Vec<f32> {
    (0..len)
        .map(|n| (2.0 * std::f32::consts::PI * hz * n as f32 / rate).sin())
        .collect()
}

#[test]
fn upsample_then_downsample_recovers_the_input() {
    for factor in [2u32, 3, 4, 8] {
        let input = sine(480, 440.0, 48_000.0);
        let mut up_state = RateState::default();
        let mut down_state = RateState::default();

        let mut upsampled = Vec::new();
        // Feed in uneven chunks to exercise state carried across calls.
        for chunk in input.chunks(37) {
            convert(
                RateRatio::Interpolate(factor),
                &mut up_state,
                chunk.iter().copied(),
                |s| upsampled.push(s),
            );
        }
        assert_eq!(upsampled.len(), input.len() * factor as usize);

        let mut recovered = Vec::new();
        for chunk in upsampled.chunks(53) {
            convert(
                RateRatio::Decimate(factor),
                &mut down_state,
                chunk.iter().copied(),
                |s| recovered.push(s),
            );
        }
        assert_eq!(recovered.len(), input.len());

        for n in 0..input.len() {
            let bound = if n == 0 {
                input[0].abs()
            } else {
                (input[n] - input[n - 1]).abs()
            };
            assert!(
                (recovered[n] - input[n]).abs() <= bound + 1e-6,
                "factor {factor} sample {n}: {} vs {}",
                recovered[n],
                input[n]
            );
        }
    }
}

#[test]
fn interpolated_stream_stays_between_neighbours() {
    let input = sine(64, 1_000.0, 8_000.0);
    let mut state = RateState {
        prev: input[0],
        phase: 0,
    };
    let mut upsampled = Vec::new();
    convert(
        RateRatio::Interpolate(4),
        &mut state,
        input[1..].iter().copied(),
        |s| upsampled.push(s),
    );
    for (n, group) in upsampled.chunks(4).enumerate() {
        let (a, b) = (input[n], input[n + 1]);
        let (lo, hi) = if a < b { (a, b) } else { (b, a) };
        for sample in group {
            assert!(*sample >= lo - 1e-6 && *sample <= hi + 1e-6);
        }
        assert_eq!(group[3], b);
    }
}
