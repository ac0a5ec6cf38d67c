use serde::Deserialize;
use serde_json::Value;

use logtally_types::CountError;

/// Longest body excerpt carried in a status error
const BODY_EXCERPT_CHARS: usize = 200;

/// Loki `query_range` response envelope
#[derive(Debug, Deserialize)]
struct QueryRangeResponse {
    status: String,
    data: QueryRangeData,
}

#[derive(Debug, Deserialize)]
struct QueryRangeData {
    #[serde(default)]
    result: Vec<ResultSeries>,
}

/// One labeled series of `[timestamp, value]` samples; labels are not needed
#[derive(Debug, Deserialize)]
struct ResultSeries {
    #[serde(default)]
    values: Vec<(Value, Value)>,
}

/// Turn a backend response into a single log line count.
///
/// Only the first sample of the first series is read; the query is built so
/// that exactly one bucket comes back.
pub fn parse_count(http_status: u16, body: &[u8]) -> Result<u64, CountError> {
    if !(200..300).contains(&http_status) {
        return Err(CountError::BackendStatus(format!(
            "HTTP {http_status}: {}",
            body_excerpt(body)
        )));
    }

    let response: QueryRangeResponse = serde_json::from_slice(body)
        .map_err(|e| CountError::MalformedResponse(e.to_string()))?;

    if response.status != "success" {
        return Err(CountError::BackendStatus(format!(
            "response status {:?}",
            response.status
        )));
    }

    let series = response.data.result.first().ok_or(CountError::NoData)?;
    let (_, value) = series.values.first().ok_or(CountError::NoData)?;

    match value {
        Value::String(s) => s.parse::<u64>().map_err(|_| {
            CountError::MalformedResponse(format!("sample value {s:?} is not a non-negative integer"))
        }),
        other => Err(CountError::MalformedResponse(format!(
            "sample value {other} is not a string"
        ))),
    }
}

fn body_excerpt(body: &[u8]) -> String {
    String::from_utf8_lossy(body)
        .trim()
        .chars()
        .take(BODY_EXCERPT_CHARS)
        .collect()
}
