//! Mapping smoothed duty percentages onto the analog output's native range.

/// Native resolution of the analog output stage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputRange {
    Bits8,
    Bits10,
    Bits12,
}

impl OutputRange {
    pub const fn max_level(self) -> u16 {
        match self {
            OutputRange::Bits8 => 255,
            OutputRange::Bits10 => 1023,
            OutputRange::Bits12 => 4095,
        }
    }
}

/// How an averaged duty percentage becomes an output level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LevelMapping {
    /// `level = duty * max / 100` across the whole range.
    Linear,
    /// Open-loop threshold map: below `low` the output rests at zero, above
    /// `high` it saturates at full scale, in between it scales proportionally
    /// across the band.
    Banded { low: u32, high: u32 },
}

/// Integer map, flooring like the reference: 50 % on a 10-bit output is 511.
pub fn level_for(average_duty: u32, mapping: LevelMapping, range: OutputRange) -> u16 {
    let max = u32::from(range.max_level());
    match mapping {
        LevelMapping::Linear => {
            let duty = average_duty.min(100);
            (duty * max / 100) as u16
        }
        LevelMapping::Banded { low, high } => {
            if average_duty < low {
                0
            } else if average_duty >= high {
                range.max_level()
            } else {
                ((average_duty - low) * max / (high - low)) as u16
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn half_duty_maps_to_511_on_ten_bits() {
        assert_eq!(level_for(50, LevelMapping::Linear, OutputRange::Bits10), 511);
    }

    #[test]
    fn range_endpoints() {
        assert_eq!(level_for(0, LevelMapping::Linear, OutputRange::Bits10), 0);
        assert_eq!(
            level_for(100, LevelMapping::Linear, OutputRange::Bits10),
            1023
        );
        assert_eq!(
            level_for(100, LevelMapping::Linear, OutputRange::Bits12),
            4095
        );
        assert_eq!(level_for(100, LevelMapping::Linear, OutputRange::Bits8), 255);
    }

    #[test]
    fn linear_map_saturates_above_100() {
        // A pass-through estimator can hand values above 100 downstream.
        assert_eq!(
            level_for(120, LevelMapping::Linear, OutputRange::Bits10),
            1023
        );
    }

    #[test]
    fn banded_map_rests_below_the_band() {
        let mapping = LevelMapping::Banded { low: 30, high: 60 };
        assert_eq!(level_for(0, mapping, OutputRange::Bits10), 0);
        assert_eq!(level_for(29, mapping, OutputRange::Bits10), 0);
    }

    #[test]
    fn banded_map_saturates_above_the_band() {
        let mapping = LevelMapping::Banded { low: 30, high: 60 };
        assert_eq!(level_for(60, mapping, OutputRange::Bits10), 1023);
        assert_eq!(level_for(100, mapping, OutputRange::Bits10), 1023);
    }

    #[test]
    fn banded_map_scales_inside_the_band() {
        let mapping = LevelMapping::Banded { low: 30, high: 60 };
        assert_eq!(level_for(45, mapping, OutputRange::Bits10), 511);
    }
}
