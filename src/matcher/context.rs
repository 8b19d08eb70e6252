//! Per-event field extraction with caching.

use crate::error::SigmaError;
use serde_json::Value;
use std::cell::RefCell;
use std::collections::HashMap;

/// Wraps one event for the duration of its evaluation, caching extracted
/// field values so primitives sharing a field pay the path walk once.
///
/// Field paths use `.` as separator. Objects are descended by key
/// (case-sensitive), numeric segments index into arrays, and arrays hit
/// without an index are flattened: every element is a candidate value and a
/// primitive matches if any candidate matches.
///
/// Not thread-safe (interior cache); create one context per thread.
pub struct EventContext<'a> {
    pub event: &'a Value,
    cache: RefCell<HashMap<String, Option<Vec<String>>>>,
}

impl<'a> EventContext<'a> {
    pub fn new(event: &'a Value) -> Self {
        Self {
            event,
            cache: RefCell::new(HashMap::new()),
        }
    }

    /// All candidate values for a dotted field path, or `None` when the
    /// path resolves to nothing.
    pub fn get_field_values(&self, field: &str) -> Result<Option<Vec<String>>, SigmaError> {
        if let Some(cached) = self.cache.borrow().get(field) {
            return Ok(cached.clone());
        }

        if field.is_empty() {
            return Err(SigmaError::InvalidFieldPath(field.to_string()));
        }

        let segments: Vec<&str> = field.split('.').collect();
        let mut values = Vec::new();
        collect_values(self.event, &segments, &mut values);
        let result = if values.is_empty() { None } else { Some(values) };

        self.cache
            .borrow_mut()
            .insert(field.to_string(), result.clone());
        Ok(result)
    }

    /// First candidate value for a field, for callers that only need one.
    pub fn get_field(&self, field: &str) -> Result<Option<String>, SigmaError> {
        Ok(self
            .get_field_values(field)?
            .and_then(|values| values.into_iter().next()))
    }

    pub fn clear_cache(&self) {
        self.cache.borrow_mut().clear();
    }

    pub fn cache_size(&self) -> usize {
        self.cache.borrow().len()
    }
}

/// Walk `segments` down from `value`, appending every scalar reached.
fn collect_values(value: &Value, segments: &[&str], out: &mut Vec<String>) {
    let Some((segment, rest)) = segments.split_first() else {
        // Path exhausted: scalars are candidates, composites are not.
        if let Some(text) = scalar_to_string(value) {
            out.push(text);
        } else if let Value::Array(items) = value {
            for item in items {
                if let Some(text) = scalar_to_string(item) {
                    out.push(text);
                }
            }
        }
        return;
    };

    match value {
        Value::Object(map) => {
            if let Some(next) = map.get(*segment) {
                collect_values(next, rest, out);
            }
        }
        Value::Array(items) => {
            if let Ok(index) = segment.parse::<usize>() {
                if let Some(item) = items.get(index) {
                    collect_values(item, rest, out);
                }
            } else {
                // No index given: fan the same path out over every element.
                for item in items {
                    collect_values(item, segments, out);
                }
            }
        }
        _ => {}
    }
}

fn scalar_to_string(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        Value::Bool(b) => Some(b.to_string()),
        Value::Null | Value::Array(_) | Value::Object(_) => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_simple_fields() {
        let event = json!({"EventID": "4624", "LogonType": 2, "Elevated": true, "Gone": null});
        let context = EventContext::new(&event);

        assert_eq!(
            context.get_field("EventID").unwrap(),
            Some("4624".to_string())
        );
        assert_eq!(context.get_field("LogonType").unwrap(), Some("2".to_string()));
        assert_eq!(
            context.get_field("Elevated").unwrap(),
            Some("true".to_string())
        );
        assert_eq!(context.get_field("Gone").unwrap(), None);
        assert_eq!(context.get_field("Missing").unwrap(), None);
    }

    #[test]
    fn test_nested_fields() {
        let event = json!({
            "Event": {"System": {"EventID": "4688"}},
            "Process": {"Name": "powershell.exe"}
        });
        let context = EventContext::new(&event);

        assert_eq!(
            context.get_field("Event.System.EventID").unwrap(),
            Some("4688".to_string())
        );
        assert_eq!(
            context.get_field("Process.Name").unwrap(),
            Some("powershell.exe".to_string())
        );
        assert_eq!(context.get_field("Event.System.Missing").unwrap(), None);
        assert_eq!(context.get_field("Missing.Path").unwrap(), None);
    }

    #[test]
    fn test_key_lookup_is_case_sensitive() {
        let event = json!({"EventID": "1"});
        let context = EventContext::new(&event);
        assert_eq!(context.get_field("eventid").unwrap(), None);
    }

    #[test]
    fn test_array_indexing() {
        let event = json!({"Users": [{"Name": "alice"}, {"Name": "bob"}]});
        let context = EventContext::new(&event);

        assert_eq!(
            context.get_field("Users.0.Name").unwrap(),
            Some("alice".to_string())
        );
        assert_eq!(
            context.get_field("Users.1.Name").unwrap(),
            Some("bob".to_string())
        );
        assert_eq!(context.get_field("Users.5.Name").unwrap(), None);
    }

    #[test]
    fn test_array_flattening() {
        let event = json!({"Hashes": ["aa11", "bb22"], "Users": [{"Name": "alice"}, {"Name": "bob"}]});
        let context = EventContext::new(&event);

        // Terminal array: all elements are candidates.
        assert_eq!(
            context.get_field_values("Hashes").unwrap(),
            Some(vec!["aa11".to_string(), "bb22".to_string()])
        );
        // Unindexed array mid-path fans out over elements.
        assert_eq!(
            context.get_field_values("Users.Name").unwrap(),
            Some(vec!["alice".to_string(), "bob".to_string()])
        );
    }

    #[test]
    fn test_composite_terminal_is_not_found() {
        let event = json!({"Nested": {"a": 1}});
        let context = EventContext::new(&event);
        assert_eq!(context.get_field("Nested").unwrap(), None);
    }

    #[test]
    fn test_empty_path_rejected() {
        let event = json!({});
        let context = EventContext::new(&event);
        assert!(matches!(
            context.get_field(""),
            Err(SigmaError::InvalidFieldPath(_))
        ));
    }

    #[test]
    fn test_caching() {
        let event = json!({"EventID": "4624"});
        let context = EventContext::new(&event);

        assert_eq!(context.cache_size(), 0);
        context.get_field("EventID").unwrap();
        assert_eq!(context.cache_size(), 1);
        context.get_field("EventID").unwrap();
        assert_eq!(context.cache_size(), 1);

        context.clear_cache();
        assert_eq!(context.cache_size(), 0);
    }
}
