/// Byte progress of one transfer attempt.
///
/// `completed_unit_count` never decreases within an attempt. A retry starts
/// over from zero.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Progress {
    pub completed_unit_count: u64,

    /// `None` until the transport knows the expected size.
    pub total_unit_count: Option<u64>,
}

impl Progress {
    pub fn new(completed_unit_count: u64, total_unit_count: Option<u64>) -> Self {
        Self {
            completed_unit_count,
            total_unit_count,
        }
    }

    /// Completed fraction in `0.0..=1.0`, if the total is known and non-zero.
    pub fn fraction_completed(&self) -> Option<f64> {
        match self.total_unit_count {
            Some(total) if total > 0 => Some((self.completed_unit_count as f64 / total as f64).min(1.0)),
            _ => None,
        }
    }

    pub fn percentage(&self) -> Option<f64> { self.fraction_completed().map(|f| f * 100.0) }

    pub fn is_finished(&self) -> bool { self.total_unit_count == Some(self.completed_unit_count) }

    /// Move forward to `completed`; going backwards is ignored.
    pub(crate) fn advance_to(&mut self, completed: u64) {
        self.completed_unit_count = self.completed_unit_count.max(completed);
    }

    pub(crate) fn advance_by(&mut self, bytes: u64) {
        self.completed_unit_count = self.completed_unit_count.saturating_add(bytes);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fraction() {
        assert_eq!(Progress::new(50, Some(200)).fraction_completed(), Some(0.25));
        assert_eq!(Progress::new(50, Some(200)).percentage(), Some(25.0));
        assert_eq!(Progress::new(50, None).fraction_completed(), None);
        assert_eq!(Progress::new(0, Some(0)).fraction_completed(), None);
    }

    #[test]
    fn test_advance_is_monotonic() {
        let mut progress = Progress::default();
        progress.advance_to(10);
        progress.advance_to(4);
        assert_eq!(progress.completed_unit_count, 10);
        progress.advance_by(5);
        assert_eq!(progress.completed_unit_count, 15);
    }

    #[test]
    fn test_finished() {
        assert!(Progress::new(8, Some(8)).is_finished());
        assert!(!Progress::new(7, Some(8)).is_finished());
        assert!(!Progress::new(8, None).is_finished());
    }
}
