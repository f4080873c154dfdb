/// A named server-side processing phase with its relative weight
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProcessingStage {
    pub key: &'static str,
    pub label: &'static str,
    pub description: &'static str,
    pub weight: u32,
}

pub const PROCESSING_STAGES: [ProcessingStage; 6] = [
    ProcessingStage {
        key: "Starting Video",
        label: "Starting",
        description: "Initializing the video processing task",
        weight: 5,
    },
    ProcessingStage {
        key: "Splitting Video",
        label: "Splitting",
        description: "Cutting the video into short segments",
        weight: 15,
    },
    ProcessingStage {
        key: "Transcribing Audio",
        label: "Transcribing",
        description: "Extracting audio and transcribing speech",
        weight: 30,
    },
    ProcessingStage {
        key: "Processing Segments",
        label: "Analyzing",
        description: "Captioning and analyzing segment content",
        weight: 25,
    },
    ProcessingStage {
        key: "Encoding Features",
        label: "Encoding",
        description: "Extracting video feature vectors",
        weight: 20,
    },
    ProcessingStage {
        key: "One Video Completed",
        label: "Done",
        description: "A single video finished processing",
        weight: 5,
    },
];

pub fn stage_by_key(key: &str) -> Option<&'static ProcessingStage> {
    PROCESSING_STAGES.iter().find(|stage| stage.key == key)
}

/// Position of a stage on a 0-100 scale: the share of weight held by the
/// stages *before* it. Unknown stages map to 0.
pub fn calculate_stage_progress(stage_key: &str) -> u8 {
    let Some(index) = PROCESSING_STAGES.iter().position(|s| s.key == stage_key) else {
        return 0;
    };

    let total: u32 = PROCESSING_STAGES.iter().map(|s| s.weight).sum();
    let completed: u32 = PROCESSING_STAGES[..index].iter().map(|s| s.weight).sum();

    ((completed as f64 / total as f64) * 100.0).round() as u8
}

/// Seconds left, from the average time per completed video. 0 until
/// something has completed.
pub fn estimate_remaining_time(completed: usize, total: usize, elapsed_secs: f64) -> u64 {
    if completed == 0 || total == 0 {
        return 0;
    }
    let average = elapsed_secs / completed as f64;
    let remaining = total.saturating_sub(completed) as f64;
    (average * remaining).round().max(0.0) as u64
}

/// Whole-number percentage of completed among finished videos
pub fn calculate_success_rate(completed: usize, failed: usize) -> u8 {
    let total = completed + failed;
    if total == 0 {
        return 0;
    }
    ((completed as f64 / total as f64) * 100.0).round() as u8
}

pub fn format_processing_time(seconds: f64) -> String {
    let total = seconds.max(0.0).round() as u64;
    if total < 60 {
        format!("{}s", total)
    } else if total < 3600 {
        format!("{}m {}s", total / 60, total % 60)
    } else {
        format!("{}h {}m", total / 3600, (total % 3600) / 60)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_weights_sum_to_100() {
        assert_eq!(PROCESSING_STAGES.iter().map(|s| s.weight).sum::<u32>(), 100);
    }

    #[test]
    fn test_stage_progress_is_cumulative_of_preceding() {
        assert_eq!(calculate_stage_progress("Starting Video"), 0);
        assert_eq!(calculate_stage_progress("Splitting Video"), 5);
        assert_eq!(calculate_stage_progress("Transcribing Audio"), 20);
        assert_eq!(calculate_stage_progress("Processing Segments"), 50);
        assert_eq!(calculate_stage_progress("Encoding Features"), 75);
        assert_eq!(calculate_stage_progress("One Video Completed"), 95);
        assert_eq!(calculate_stage_progress("Uploading to Mars"), 0);
    }

    #[test]
    fn test_stage_lookup() {
        assert_eq!(stage_by_key("Encoding Features").unwrap().weight, 20);
        assert!(stage_by_key("").is_none());
    }

    #[test]
    fn test_estimate_remaining_time() {
        assert_eq!(estimate_remaining_time(0, 3, 120.0), 0);
        assert_eq!(estimate_remaining_time(1, 0, 120.0), 0);
        assert_eq!(estimate_remaining_time(1, 3, 120.0), 240);
        assert_eq!(estimate_remaining_time(3, 3, 120.0), 0);
    }

    #[test]
    fn test_success_rate() {
        assert_eq!(calculate_success_rate(0, 0), 0);
        assert_eq!(calculate_success_rate(2, 1), 67);
    }

    #[test]
    fn test_format_processing_time() {
        assert_eq!(format_processing_time(42.4), "42s");
        assert_eq!(format_processing_time(125.0), "2m 5s");
        assert_eq!(format_processing_time(3720.0), "1h 2m");
        assert_eq!(format_processing_time(119.6), "2m 0s");
        assert_eq!(format_processing_time(59.7), "1m 0s");
    }
}
