use std::sync::LazyLock;

use prometheus::*;

use crate::cache::ExtractionStatus;

static METRIC_SYNC_IMAGE_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "facesync_sync_image_count",
        "count of the gallery images processed by sync",
        &["status"]
    )
    .unwrap()
});

static METRIC_SYNC_FAILURE_COUNT: LazyLock<IntCounter> = LazyLock::new(|| {
    register_int_counter!("facesync_sync_failure_count", "count of the aborted sync runs").unwrap()
});

static METRIC_SYNC_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!("facesync_sync_duration", "duration of the sync runs in seconds").unwrap()
});

static METRIC_MATCH_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "facesync_match_count",
        "count of the probe images by outcome",
        &["outcome"]
    )
    .unwrap()
});

static METRIC_MATCH_DURATION: LazyLock<Histogram> = LazyLock::new(|| {
    register_histogram!(
        "facesync_match_duration",
        "duration of the per-probe match in seconds, sync included"
    )
    .unwrap()
});

static METRIC_MATCH_DISTANCE: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "facesync_match_distance",
        "best distance of the per-probe match",
        &["metric"],
        (1..=30).map(|x| x as f64 * 0.05).collect()
    )
    .unwrap()
});

pub fn inc_sync_image(status: ExtractionStatus) {
    let status = match status {
        ExtractionStatus::Success => "success",
        ExtractionStatus::NoFace => "no_face",
        ExtractionStatus::Failed => "failed",
    };
    METRIC_SYNC_IMAGE_COUNT.with_label_values(&[status]).inc();
}

pub fn inc_sync_failure() {
    METRIC_SYNC_FAILURE_COUNT.inc();
}

pub fn observe_sync_duration(duration: f32) {
    METRIC_SYNC_DURATION.observe(duration as f64);
}

/// 记录一次匹配，`outcome` 取值为 match / no_match / no_face / error
pub fn inc_match(outcome: &str, duration: f32) {
    METRIC_MATCH_COUNT.with_label_values(&[outcome]).inc();
    METRIC_MATCH_DURATION.observe(duration as f64);
}

pub fn observe_match_distance(metric: &str, distance: f32) {
    if distance.is_finite() {
        METRIC_MATCH_DISTANCE.with_label_values(&[metric]).observe(distance as f64);
    }
}
