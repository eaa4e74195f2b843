#[cfg(feature = "serde")]
mod serde_tests {
    use stencil::{Context, StencilError, Value};

    #[test]
    fn test_value_serialization() {
        let value = Value::Bool(true);
        let serialized = serde_json::to_string(&value).unwrap();
        assert_eq!(serialized, r#"{"Bool":true}"#);

        let deserialized: Value = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, value);
    }

    #[test]
    fn test_value_round_trip() {
        let value = Value::Array(vec![
            Value::Null,
            Value::Number(2.5),
            Value::from("text"),
            Value::from(serde_json::json!({"nested": [1, 2]})),
        ]);

        let serialized = serde_json::to_string(&value).unwrap();
        let deserialized: Value = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, value);
    }

    #[test]
    fn test_context_round_trip() {
        let mut context = Context::new();
        context.insert("name", "John");
        context.insert("active", true);
        context.insert("items", Value::Array(vec![Value::from("one"), Value::from("two")]));

        let serialized = serde_json::to_string(&context).unwrap();
        let deserialized: Context = serde_json::from_str(&serialized).unwrap();

        assert_eq!(deserialized, context);
        assert_eq!(
            deserialized.get("name").and_then(Value::as_str),
            Some("John")
        );
    }

    #[test]
    fn test_error_round_trip() {
        let error = StencilError::Evaluation {
            template_name: "profile".to_string(),
            message: "'user' is not defined".to_string(),
        };

        let serialized = serde_json::to_string(&error).unwrap();
        let deserialized: StencilError = serde_json::from_str(&serialized).unwrap();
        assert_eq!(deserialized, error);
    }
}
