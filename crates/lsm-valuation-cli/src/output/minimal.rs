use serde_json::Value;

const PRIORITY_KEYS: [&str; 5] = ["value", "rov", "npv", "wov", "investment_probability"];

/// Print the headline number: the option value for American options, the
/// real option value for investment problems. Sweeps print `level: value`
/// per scenario.
pub fn print_minimal(value: &Value) {
    if let Some(Value::Array(rows)) = value.get("results") {
        for row in rows {
            let level = row
                .get("strike")
                .or_else(|| row.get("capex"))
                .map(format_minimal)
                .unwrap_or_default();
            let head = headline(row).unwrap_or_else(|| format_minimal(row));
            println!("{}: {}", level, head);
        }
        return;
    }

    let result_obj = value
        .as_object()
        .and_then(|m| m.get("result"))
        .unwrap_or(value);

    if let Some(head) = headline(result_obj) {
        println!("{}", head);
        return;
    }
    if let Some((key, val)) = result_obj.as_object().and_then(|m| m.iter().next()) {
        println!("{}: {}", key, format_minimal(val));
        return;
    }
    println!("{}", format_minimal(result_obj));
}

fn headline(obj: &Value) -> Option<String> {
    let map = obj.as_object()?;
    PRIORITY_KEYS
        .iter()
        .filter_map(|k| map.get(*k))
        .find(|v| !v.is_null())
        .map(format_minimal)
}

fn format_minimal(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        Value::Number(n) => n.to_string(),
        Value::Bool(b) => b.to_string(),
        Value::Null => "null".to_string(),
        _ => serde_json::to_string(value).unwrap_or_default(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_headline_prefers_value_then_rov() {
        assert_eq!(headline(&json!({"npv": 1.0, "rov": 2.5})), Some("2.5".into()));
        assert_eq!(headline(&json!({"value": 4.47, "rov": 1.0})), Some("4.47".into()));
        assert_eq!(headline(&json!({"other": 1})), None);
    }
}
