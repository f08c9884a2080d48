//! Captured workload output for each built-in benchmark kind

pub const MLPERF_SUMMARIZATION_LOG: &str = "\
Loading model meta-llama/Llama-3.1-8B-Instruct
Loading CNN/DailyMail validation[:100]
Processed 50/100 samples
Processed 100/100 samples
==================================================
MLPerf Summarization Results
==================================================
Samples: 100 | Time: 512.30s | Throughput: 0.195 samples/s
ROUGE-1: 0.3812
ROUGE-2: 0.1604
ROUGE-L: 0.2457
Status: PASS
";

pub const MMLU_PRO_LOG: &str = "\
Loading TIGER-Lab/MMLU-Pro test[:140]
Subject: biology | Accuracy: 52.00%
Subject: law | Accuracy: 28.57%
Time: 1200.50s | Throughput: 0.117 questions/s
Overall Accuracy: 41.43%
";

pub const MMLU_LOG: &str = "\
Evaluating 285 questions across 57 subjects
Overall accuracy: 0.6842
Completion rate: 98.25%
Questions failed: 5
Average response time: 1.84s
";

pub const INFERENCE_THROUGHPUT_LOG: &str = "\
Warmup complete
Single request | Tokens: 256 | Time: 4.10s | 62.44 tok/s
Batch of 8 requests
Throughput: 480.12 tokens/s
";

/// Lines of a fixture log, as a log stream would deliver them
pub fn lines(log: &str) -> Vec<String> {
    log.lines().map(str::to_string).collect()
}

/// Fixture log for a benchmark kind
pub fn log_for_kind(kind: &str) -> Option<&'static str> {
    match kind {
        "mlperf-summarization" => Some(MLPERF_SUMMARIZATION_LOG),
        "mmlu-pro" => Some(MMLU_PRO_LOG),
        "mmlu" => Some(MMLU_LOG),
        "inference-throughput" => Some(INFERENCE_THROUGHPUT_LOG),
        _ => None,
    }
}
