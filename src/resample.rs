/// Convert `input` from `from_rate` to `to_rate` by linear interpolation.
///
/// Produces exactly `⌊len · to_rate / from_rate⌋` output samples. For each
/// output index the fractional source position is interpolated between the
/// two neighbouring input samples, clamping at the final sample. Low quality
/// but deterministic; intended for coercing stream input rates and for
/// rendering segment output, not for the detection path itself.
pub fn resample(input: &[f32], from_rate: u32, to_rate: u32) -> Vec<f32> {
    if from_rate == to_rate {
        return input.to_vec();
    }
    if input.is_empty() {
        return Vec::new();
    }

    let output_len = (input.len() as u64 * u64::from(to_rate) / u64::from(from_rate)) as usize;
    let ratio = f64::from(from_rate) / f64::from(to_rate);

    (0..output_len)
        .map(|i| {
            let position = i as f64 * ratio;
            let index = position as usize;
            let frac = (position - index as f64) as f32;
            let a = input[index.min(input.len() - 1)];
            let b = input[(index + 1).min(input.len() - 1)];
            a * (1.0 - frac) + b * frac
        })
        .collect()
}
