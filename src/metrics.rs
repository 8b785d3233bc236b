use std::sync::LazyLock;

use prometheus::*;

static METRIC_EXTRACT_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "imembed_extract_duration",
        "duration of the per-image feature extraction in seconds",
        &["result"]
    )
    .unwrap()
});

static METRIC_UPSERT_COUNT: LazyLock<IntCounterVec> = LazyLock::new(|| {
    register_int_counter_vec!(
        "imembed_upsert_datapoint_count",
        "count of the datapoints sent to the vector index",
        &["result"]
    )
    .unwrap()
});

static METRIC_QUERY_DURATION: LazyLock<HistogramVec> = LazyLock::new(|| {
    register_histogram_vec!(
        "imembed_query_duration",
        "duration of the nearest neighbor query in seconds",
        &["result"]
    )
    .unwrap()
});

fn result_label(ok: bool) -> &'static str {
    if ok { "ok" } else { "error" }
}

/// 记录一次特征提取
pub fn observe_extract(ok: bool, seconds: f64) {
    METRIC_EXTRACT_DURATION.with_label_values(&[result_label(ok)]).observe(seconds);
}

/// 记录写入索引的数据点数量
pub fn inc_upsert(ok: bool, count: usize) {
    METRIC_UPSERT_COUNT.with_label_values(&[result_label(ok)]).inc_by(count as u64);
}

pub fn observe_query(ok: bool, seconds: f64) {
    METRIC_QUERY_DURATION.with_label_values(&[result_label(ok)]).observe(seconds);
}

/// 以 Prometheus 文本格式导出所有指标
pub fn gather_text() -> String {
    let encoder = TextEncoder::new();
    encoder.encode_to_string(&prometheus::gather()).unwrap_or_default()
}
