//! Merge progress events.
//!
//! Stages are always reported in order, each running from 0 to 100, so a
//! caller can fold them into one progress bar with [`MergeProgress::overall_percent`].

use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum MergeStage {
    Downloading,
    Merging,
    Encoding,
    Finalizing,
}

impl MergeStage {
    /// Share of the overall bar, in percent.
    pub fn weight(self) -> u32 {
        match self {
            MergeStage::Downloading => 40,
            MergeStage::Merging => 30,
            MergeStage::Encoding => 20,
            MergeStage::Finalizing => 10,
        }
    }

    fn offset(self) -> u32 {
        match self {
            MergeStage::Downloading => 0,
            MergeStage::Merging => 40,
            MergeStage::Encoding => 70,
            MergeStage::Finalizing => 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct MergeProgress {
    pub stage: MergeStage,
    pub percent: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
}

impl MergeProgress {
    pub fn new(stage: MergeStage, percent: u8) -> Self {
        Self {
            stage,
            percent: percent.min(100),
            message: None,
        }
    }

    pub fn with_message(mut self, message: impl Into<String>) -> Self {
        self.message = Some(message.into());
        self
    }

    /// Fraction `done / total` of a stage, as a percent.
    pub fn fraction(stage: MergeStage, done: usize, total: usize) -> Self {
        let percent = if total == 0 {
            100
        } else {
            (done.min(total) * 100 / total) as u8
        };
        Self::new(stage, percent)
    }

    pub fn overall_percent(&self) -> u8 {
        let weighted = self.stage.offset() + self.stage.weight() * self.percent as u32 / 100;
        weighted.min(100) as u8
    }
}

/// Progress of one batch's merge, as broadcast to subscribers.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BatchProgress {
    pub batch_id: String,
    pub progress: MergeProgress,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overall_percent_is_monotonic_across_stages() {
        let stages = [
            MergeStage::Downloading,
            MergeStage::Merging,
            MergeStage::Encoding,
            MergeStage::Finalizing,
        ];
        let mut last = 0;
        for stage in stages {
            for percent in [0, 25, 50, 100] {
                let overall = MergeProgress::new(stage, percent).overall_percent();
                assert!(overall >= last, "{:?} {} went backwards", stage, percent);
                last = overall;
            }
        }
        assert_eq!(last, 100);
    }

    #[test]
    fn test_fraction() {
        assert_eq!(MergeProgress::fraction(MergeStage::Downloading, 1, 4).percent, 25);
        assert_eq!(MergeProgress::fraction(MergeStage::Downloading, 0, 0).percent, 100);
        assert_eq!(MergeProgress::fraction(MergeStage::Merging, 9, 3).percent, 100);
    }

    #[test]
    fn test_percent_is_capped() {
        assert_eq!(MergeProgress::new(MergeStage::Encoding, 250).percent, 100);
    }
}
