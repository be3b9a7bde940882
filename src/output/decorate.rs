use crate::config::DecorationKind;
use crate::model::lorawan::DevEui;
use serde_json::{json, Map, Value};

/// Fields copied next to the decoded `output` by the minimal decoration
const POSITION_FIELDS: [&str; 4] = ["latitude", "longitude", "accuracy", "positionTimestamp"];

pub trait Decorator: Send + Sync {
    fn name(&self) -> &'static str;

    fn decorate(&self, document: &Map<String, Value>, dev_eui: &DevEui) -> Value;
}

/// Publishes the document unchanged
pub struct NoDecoration;

impl Decorator for NoDecoration {
    fn name(&self) -> &'static str {
        "none"
    }

    fn decorate(&self, document: &Map<String, Value>, _dev_eui: &DevEui) -> Value {
        Value::Object(document.clone())
    }
}

/// Current decoded values plus the last known position
pub struct MinimalDecoration;

impl Decorator for MinimalDecoration {
    fn name(&self) -> &'static str {
        "minimal"
    }

    fn decorate(&self, document: &Map<String, Value>, _dev_eui: &DevEui) -> Value {
        let mut result = match document.get("output") {
            Some(Value::Object(output)) => output.clone(),
            _ => Map::new(),
        };

        for key in POSITION_FIELDS {
            if let Some(value) = document.get(key) {
                result.insert(key.to_string(), value.clone());
            }
        }

        let app_name = document
            .get("vsm")
            .and_then(|vsm| vsm.get("appName"))
            .and_then(Value::as_str)
            .filter(|name| !name.is_empty())
            .unwrap_or("unknown");
        result.insert("appName".to_string(), json!(app_name));

        Value::Object(result)
    }
}

/// Wraps the document the way Yggio push notifications look
pub struct YggioPushDecoration;

impl Decorator for YggioPushDecoration {
    fn name(&self) -> &'static str {
        "yggio-push"
    }

    fn decorate(&self, document: &Map<String, Value>, dev_eui: &DevEui) -> Value {
        let mut iotnode = Map::with_capacity(document.len() + 1);
        iotnode.insert("_id".to_string(), json!(dev_eui.normalized()));
        for (key, value) in document {
            iotnode.insert(key.clone(), value.clone());
        }
        json!({"payload": {"iotnode": iotnode}})
    }
}

pub fn build_decorator(kind: DecorationKind) -> Box<dyn Decorator> {
    match kind {
        DecorationKind::None => Box::new(NoDecoration),
        DecorationKind::Minimal => Box::new(MinimalDecoration),
        DecorationKind::YggioPush => Box::new(YggioPushDecoration),
    }
}
