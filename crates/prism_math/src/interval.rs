/// A closed range of ray parameters.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Interval {
    pub min: f32,
    pub max: f32,
}

impl Interval {
    pub fn new(min: f32, max: f32) -> Self {
        Self { min, max }
    }

    pub fn size(&self) -> f32 {
        self.max - self.min
    }

    /// `min <= x <= max`
    pub fn contains(&self, x: f32) -> bool {
        self.min <= x && x <= self.max
    }

    /// `min < x < max`; hit tests use this so grazing hits at the bounds are dropped.
    pub fn surrounds(&self, x: f32) -> bool {
        self.min < x && x < self.max
    }

    /// Widen to at least `delta`, padding both sides equally.
    pub fn expand(&self, delta: f32) -> Interval {
        let pad = delta * 0.5;
        Interval::new(self.min - pad, self.max + pad)
    }

    /// Same interval with the upper bound pulled in to `max`.
    pub fn until(&self, max: f32) -> Interval {
        Interval::new(self.min, self.max.min(max))
    }

    /// Smallest interval holding both.
    pub fn surrounding(a: &Interval, b: &Interval) -> Interval {
        Interval::new(a.min.min(b.min), a.max.max(b.max))
    }

    /// Contains nothing; the identity of `surrounding`.
    pub const EMPTY: Interval = Interval {
        min: f32::INFINITY,
        max: f32::NEG_INFINITY,
    };

    /// Ray parameters in front of a ray origin.
    pub const FORWARD: Interval = Interval {
        min: 0.0,
        max: f32::INFINITY,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_bounds_are_closed_for_contains_only() {
        let t = Interval::new(1.0, 3.0);
        assert!(t.contains(1.0) && t.contains(3.0));
        assert!(!t.surrounds(1.0) && !t.surrounds(3.0));
        assert!(t.surrounds(2.0));
        assert!(!t.contains(3.5));
    }

    #[test]
    fn test_interval_until() {
        let interval = Interval::FORWARD.until(4.0);
        assert_eq!(interval.max, 4.0);
        assert_eq!(interval.until(8.0).max, 4.0);
    }

    #[test]
    fn test_empty_is_surrounding_identity() {
        let t = Interval::new(-1.0, 2.0);
        assert_eq!(Interval::surrounding(&Interval::EMPTY, &t), t);
        assert!(!Interval::EMPTY.contains(0.0));
    }
}
