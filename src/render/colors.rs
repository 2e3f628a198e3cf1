use plotters::style::RGBColor;

/// Viridis sampled at nine evenly spaced stops.
static VIRIDIS: [(u8, u8, u8); 9] = [
    (68, 1, 84),
    (72, 40, 120),
    (62, 73, 137),
    (49, 104, 142),
    (38, 130, 142),
    (31, 158, 137),
    (53, 183, 121),
    (110, 206, 88),
    (253, 231, 37),
];

/// Viridis color at `t` in `[0, 1]`, linearly interpolated between stops.
pub fn viridis(t: f64) -> RGBColor {
    let t = if t.is_finite() { t.clamp(0.0, 1.0) } else { 0.0 };
    let scaled = t * (VIRIDIS.len() - 1) as f64;
    let lo = scaled.floor() as usize;
    let hi = (lo + 1).min(VIRIDIS.len() - 1);
    let frac = scaled - lo as f64;
    let mix = |a: u8, b: u8| (f64::from(a) + (f64::from(b) - f64::from(a)) * frac).round() as u8;
    let (a, b) = (VIRIDIS[lo], VIRIDIS[hi]);
    RGBColor(mix(a.0, b.0), mix(a.1, b.1), mix(a.2, b.2))
}

/// Color for a cluster label, normalized over the labels actually present.
pub fn cluster_color(label: usize, min_label: usize, max_label: usize) -> RGBColor {
    if max_label <= min_label {
        return viridis(0.0);
    }
    let t = (label.saturating_sub(min_label)) as f64 / (max_label - min_label) as f64;
    viridis(t)
}
