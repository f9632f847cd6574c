// ── Partial state normalization ──
//
// Devices report the same thing in different shapes. Before a partial
// state reaches any subscriber it is reduced to one canonical form.

use serde_json::Value;

use thingsync_api::ThingState;

/// Strings that mean "off" for the `state` action.
const FALSY_STATE_STRINGS: [&str; 3] = ["0", "false", "off"];

/// Normalize one entity's partial state.
///
/// Top-level `null` fields are removed, and a `state` of `"0"`, `"false"`
/// or `"off"` (trimmed, any case) becomes `false`. Everything else passes
/// through untouched. Returns `None` for a payload that is not an object.
pub fn normalize_partial(partial: &Value) -> Option<ThingState> {
    let Value::Object(fields) = partial else {
        return None;
    };

    Some(
        fields
            .iter()
            .filter(|(_, value)| !value.is_null())
            .map(|(key, value)| {
                let value = if key == "state" {
                    normalize_state_value(value)
                } else {
                    value.clone()
                };
                (key.clone(), value)
            })
            .collect(),
    )
}

fn normalize_state_value(value: &Value) -> Value {
    match value {
        Value::String(s) => {
            let trimmed = s.trim();
            if FALSY_STATE_STRINGS
                .iter()
                .any(|falsy| trimmed.eq_ignore_ascii_case(falsy))
            {
                Value::Bool(false)
            } else {
                value.clone()
            }
        }
        other => other.clone(),
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use serde_json::json;

    #[test]
    fn drops_nulls_and_folds_off() {
        let normalized = normalize_partial(&json!({ "state": "off", "brightness": null })).unwrap();
        assert_eq!(Value::Object(normalized), json!({ "state": false }));
    }

    #[test]
    fn falsy_strings_are_trimmed_and_case_insensitive() {
        for raw in ["0", "false", " OFF ", "False"] {
            let normalized = normalize_partial(&json!({ "state": raw })).unwrap();
            assert_eq!(normalized["state"], json!(false), "{raw:?}");
        }
    }

    #[test]
    fn other_values_pass_through() {
        let input = json!({ "state": "ON", "brightness": 0, "color": { "x": null }, "mode": "off" });
        let normalized = normalize_partial(&input).unwrap();
        assert_eq!(Value::Object(normalized), input);
    }

    #[test]
    fn empty_after_normalization_is_still_an_update() {
        let normalized = normalize_partial(&json!({ "brightness": null })).unwrap();
        assert!(normalized.is_empty());
    }

    #[test]
    fn non_objects_are_rejected() {
        assert!(normalize_partial(&json!("on")).is_none());
        assert!(normalize_partial(&json!(null)).is_none());
        assert!(normalize_partial(&json!([1, 2])).is_none());
    }
}
