use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, Histogram, IntCounter,
    IntCounterVec,
};

lazy_static::lazy_static! {
    pub static ref EXECUTIONS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "udlf_executions_total", "UDLF executions", &["status"]
    ).unwrap();
    pub static ref EXECUTION_DURATION: Histogram = register_histogram!(
        "udlf_execution_duration_seconds", "UDLF execution wall time",
        vec![0.1, 0.5, 1.0, 2.5, 5.0, 10.0, 30.0, 60.0, 120.0, 300.0, 600.0]
    ).unwrap();
    pub static ref CACHE_LOOKUPS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "udlf_cache_lookups_total", "Cache lookups", &["cache", "result"]
    ).unwrap();
    pub static ref BLOB_DOWNLOADS_TOTAL: IntCounterVec = register_int_counter_vec!(
        "udlf_blob_downloads_total", "Bucket object downloads", &["result"]
    ).unwrap();
    pub static ref INDEX_BUILDS_TOTAL: IntCounter = register_int_counter!(
        "udlf_index_builds_total", "Dataset index builds"
    ).unwrap();
}

pub fn init() {
    lazy_static::initialize(&EXECUTIONS_TOTAL);
    lazy_static::initialize(&EXECUTION_DURATION);
    lazy_static::initialize(&CACHE_LOOKUPS_TOTAL);
    lazy_static::initialize(&BLOB_DOWNLOADS_TOTAL);
    lazy_static::initialize(&INDEX_BUILDS_TOTAL);
}
