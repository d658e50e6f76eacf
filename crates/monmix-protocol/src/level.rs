/// Fader level ↔ decibel conversion.
///
/// Faders work in a normalized `0.0..=1.0` level. The console works in dB.
/// Level 0 maps to the -60 dB floor, level 1 to 0 dB, logarithmic between.

use crate::{GAIN_MAX_DB, GAIN_MIN_DB, VU_MAX_DB, VU_MIN_DB};

/// Convert a normalized fader level to dB, floored at -60.
pub fn level_to_db(level: f32) -> f32 {
    if !level.is_finite() || level <= 0.0 {
        return VU_MIN_DB;
    }
    let level = level.min(1.0);
    (20.0 * level.log10()).max(VU_MIN_DB)
}

/// Convert dB to a normalized fader level. -60 dB and below is silence.
pub fn db_to_level(db: f32) -> f32 {
    if db.is_nan() || db <= VU_MIN_DB {
        return 0.0;
    }
    let db = db.min(VU_MAX_DB);
    10f32.powf(db / 20.0).clamp(0.0, 1.0)
}

/// Clamp a gain or send value to the console's accepted range.
pub fn clamp_gain(db: f32) -> f32 {
    if db.is_nan() {
        return GAIN_MIN_DB;
    }
    db.clamp(GAIN_MIN_DB, GAIN_MAX_DB)
}

/// Clamp a meter reading to the reported range.
pub fn clamp_vu(db: f32) -> f32 {
    if db.is_nan() {
        return VU_MIN_DB;
    }
    db.clamp(VU_MIN_DB, VU_MAX_DB)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoints() {
        assert_eq!(level_to_db(0.0), -60.0);
        assert_eq!(level_to_db(1.0), 0.0);
        assert_eq!(db_to_level(-60.0), 0.0);
        assert_eq!(db_to_level(0.0), 1.0);
    }

    #[test]
    fn test_half_level_is_minus_six() {
        assert!((level_to_db(0.5) - (-6.0206)).abs() < 0.01);
    }

    #[test]
    fn test_out_of_range_inputs_clamp() {
        assert_eq!(level_to_db(-0.5), -60.0);
        assert_eq!(level_to_db(2.0), 0.0);
        assert_eq!(level_to_db(f32::NAN), -60.0);
        assert_eq!(db_to_level(-90.0), 0.0);
        assert_eq!(db_to_level(6.0), 1.0);
        // below the floor the log curve would go under -60
        assert_eq!(level_to_db(0.0001), -60.0);
    }

    #[test]
    fn test_inverse_over_domain() {
        for i in 1..=100 {
            let x = i as f32 / 100.0;
            if level_to_db(x) <= -60.0 {
                continue;
            }
            let back = db_to_level(level_to_db(x));
            assert!((back - x).abs() < 1e-4, "level {} came back as {}", x, back);
        }
    }

    #[test]
    fn test_clamp_gain() {
        assert_eq!(clamp_gain(100.0), 10.0);
        assert_eq!(clamp_gain(-100.0), -60.0);
        assert_eq!(clamp_gain(-3.5), -3.5);
        assert_eq!(clamp_gain(f32::NAN), -60.0);
        assert_eq!(clamp_vu(4.0), 0.0);
    }
}
