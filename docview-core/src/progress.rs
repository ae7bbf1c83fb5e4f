use crate::viewer::Progress;

/// Keeps the loading bar monotonic.
///
/// A percentage is applied only when it is strictly greater than the last
/// applied one. An unknown level (NaN) is always applied and switches the
/// bar to indeterminate; the next numeric level is applied unconditionally.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgressTracker {
    last: Progress,
}

impl Default for ProgressTracker {
    fn default() -> Self {
        Self {
            last: Progress::Percent(0),
        }
    }
}

impl ProgressTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the progress to display, if `level` changes it.
    pub fn update(&mut self, level: f64) -> Option<Progress> {
        let next = if level.is_nan() {
            Progress::Indeterminate
        } else {
            let percent = (level * 100.0).round().clamp(0.0, 100.0) as u8;
            match self.last {
                Progress::Percent(last) if percent <= last => return None,
                _ => Progress::Percent(percent),
            }
        };
        self.last = next;
        Some(next)
    }

    pub fn last(&self) -> Progress {
        self.last
    }

    pub fn reset(&mut self) {
        *self = Self::default();
    }
}
