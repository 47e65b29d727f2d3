//! Sanitization of metric query results before they are returned to customers.

use std::collections::BTreeMap;

use beacon_log::protocol::Level;
use serde_json::Value;

/// The metric key of the crash free rate in a sessions query result.
pub const CRASH_FREE_RATE_METRIC_KEY: &str = "session.crash_free_rate";

/// Replaces negative crash free rates in a sessions query result with `0`.
///
/// Corrupted session data can produce negative rates. Every replaced value is reported as a
/// diagnostic message tagged with the organization and carrying the request's query parameters.
///
/// The result has the following shape:
///
/// ```json
/// {
///   "groups": [
///     {
///       "series": {"session.crash_free_rate": [0.98, null, 0.35]},
///       "totals": {"session.crash_free_rate": 0.35}
///     }
///   ]
/// }
/// ```
///
/// Series elements are coerced to numbers, including numeric strings. Elements that are not
/// numeric are left untouched. Totals are only replaced if they are numbers. Results without
/// `groups` are left as they are.
pub fn ensure_non_negative_crash_free_rate_value(
    data: &mut Value,
    query_params: &BTreeMap<String, String>,
    organization_id: u64,
) {
    let Some(groups) = data.get_mut("groups").and_then(Value::as_array_mut) else {
        return;
    };

    for group in groups {
        let series = group
            .get_mut("series")
            .and_then(|series| series.get_mut(CRASH_FREE_RATE_METRIC_KEY))
            .and_then(Value::as_array_mut);

        for value in series.into_iter().flatten() {
            let Some(rate) = coerce_number(value) else {
                continue;
            };

            if rate < 0.0 {
                report_negative(
                    "crash_free_rate in series is negative",
                    "crash_free_rate_in_series",
                    rate,
                    query_params,
                    organization_id,
                );
                *value = Value::from(0);
            }
        }

        let negative_total = group
            .get_mut("totals")
            .and_then(|totals| totals.get_mut(CRASH_FREE_RATE_METRIC_KEY))
            .and_then(|value| {
                let rate = value.as_f64().filter(|rate| *rate < 0.0)?;
                Some((value, rate))
            });

        if let Some((value, rate)) = negative_total {
            report_negative(
                "crash_free_rate is negative",
                "crash_free_rate",
                rate,
                query_params,
                organization_id,
            );
            *value = Value::from(0);
        }
    }
}

fn coerce_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(number) => number.as_f64(),
        Value::String(string) => string.trim().parse().ok(),
        _ => None,
    }
}

fn report_negative(
    message: &str,
    extra_key: &str,
    rate: f64,
    query_params: &BTreeMap<String, String>,
    organization_id: u64,
) {
    let params = query_params
        .iter()
        .map(|(name, value)| (name.clone(), Value::from(value.as_str())))
        .collect::<serde_json::Map<_, _>>();

    beacon_log::with_scope(
        |scope| {
            scope.set_tag("organization", organization_id);
            scope.set_extra(extra_key, Value::from(rate));
            scope.set_extra("request_query_params", Value::Object(params));
        },
        || beacon_log::capture_message(message, Level::Info),
    );
}
