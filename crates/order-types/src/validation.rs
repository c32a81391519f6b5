//! Configuration schema validation.
//!
//! Every pluggable implementation (store, cache, broker, sink, pricing)
//! receives its own raw TOML section. Implementations describe the shape of
//! that section with a [`Schema`] and validate it in their factory before
//! building anything.

use thiserror::Error;

/// Errors that can occur during schema validation.
#[derive(Debug, Error)]
pub enum SchemaError {
	/// A required field is missing.
	#[error("Missing required field: {0}")]
	MissingField(String),
	/// A field has an invalid value.
	#[error("Invalid value for field '{field}': {message}")]
	InvalidValue { field: String, message: String },
	/// A field has the wrong type.
	#[error("Type mismatch for field '{field}': expected {expected}, got {actual}")]
	TypeMismatch {
		field: String,
		expected: String,
		actual: String,
	},
}

/// The type of a configuration field.
#[derive(Debug)]
pub enum FieldType {
	String,
	/// An integer with optional inclusive bounds.
	Integer { min: Option<i64>, max: Option<i64> },
	Boolean,
	/// A nested table with its own schema.
	Table(Schema),
	/// A table with arbitrary keys whose values all share one type.
	Map(Box<FieldType>),
}

/// Custom check run after the type check passed.
pub type FieldValidator = Box<dyn Fn(&toml::Value) -> Result<(), String> + Send + Sync>;

/// A named field in a schema.
pub struct Field {
	pub name: String,
	pub field_type: FieldType,
	pub validator: Option<FieldValidator>,
}

impl std::fmt::Debug for Field {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Field")
			.field("name", &self.name)
			.field("field_type", &self.field_type)
			.field("validator", &self.validator.is_some())
			.finish()
	}
}

impl Field {
	pub fn new(name: impl Into<String>, field_type: FieldType) -> Self {
		Self {
			name: name.into(),
			field_type,
			validator: None,
		}
	}

	/// Adds a custom validator to this field.
	pub fn with_validator<F>(mut self, validator: F) -> Self
	where
		F: Fn(&toml::Value) -> Result<(), String> + Send + Sync + 'static,
	{
		self.validator = Some(Box::new(validator));
		self
	}
}

/// Required and optional fields of a TOML table.
///
/// Keys not named by the schema are ignored.
#[derive(Debug)]
pub struct Schema {
	pub required: Vec<Field>,
	pub optional: Vec<Field>,
}

impl Schema {
	pub fn new(required: Vec<Field>, optional: Vec<Field>) -> Self {
		Self { required, optional }
	}

	/// Validates a TOML value against this schema.
	///
	/// Checks presence of required fields, the type of every present field,
	/// custom validators, and recurses into nested tables.
	pub fn validate(&self, config: &toml::Value) -> Result<(), SchemaError> {
		let table = config.as_table().ok_or_else(|| SchemaError::TypeMismatch {
			field: "root".to_string(),
			expected: "table".to_string(),
			actual: config.type_str().to_string(),
		})?;

		for field in &self.required {
			let value = table
				.get(&field.name)
				.ok_or_else(|| SchemaError::MissingField(field.name.clone()))?;
			validate_field(field, value)?;
		}

		for field in &self.optional {
			if let Some(value) = table.get(&field.name) {
				validate_field(field, value)?;
			}
		}

		Ok(())
	}
}

fn validate_field(field: &Field, value: &toml::Value) -> Result<(), SchemaError> {
	validate_field_type(&field.name, value, &field.field_type)?;
	if let Some(validator) = &field.validator {
		validator(value).map_err(|message| SchemaError::InvalidValue {
			field: field.name.clone(),
			message,
		})?;
	}
	Ok(())
}

fn type_mismatch(field_name: &str, expected: &str, value: &toml::Value) -> SchemaError {
	SchemaError::TypeMismatch {
		field: field_name.to_string(),
		expected: expected.to_string(),
		actual: value.type_str().to_string(),
	}
}

/// Prefixes the field path of a nested error with its parent field.
fn nest(parent: &str, error: SchemaError) -> SchemaError {
	match error {
		SchemaError::MissingField(f) => SchemaError::MissingField(format!("{}.{}", parent, f)),
		SchemaError::InvalidValue { field, message } => SchemaError::InvalidValue {
			field: format!("{}.{}", parent, field),
			message,
		},
		SchemaError::TypeMismatch {
			field,
			expected,
			actual,
		} => SchemaError::TypeMismatch {
			field: format!("{}.{}", parent, field),
			expected,
			actual,
		},
	}
}

fn validate_field_type(
	field_name: &str,
	value: &toml::Value,
	expected_type: &FieldType,
) -> Result<(), SchemaError> {
	match expected_type {
		FieldType::String => {
			if !value.is_str() {
				return Err(type_mismatch(field_name, "string", value));
			}
		},
		FieldType::Integer { min, max } => {
			let int_val = value
				.as_integer()
				.ok_or_else(|| type_mismatch(field_name, "integer", value))?;

			if let Some(min_val) = min.filter(|min_val| int_val < *min_val) {
				return Err(SchemaError::InvalidValue {
					field: field_name.to_string(),
					message: format!("Value {} is less than minimum {}", int_val, min_val),
				});
			}
			if let Some(max_val) = max.filter(|max_val| int_val > *max_val) {
				return Err(SchemaError::InvalidValue {
					field: field_name.to_string(),
					message: format!("Value {} is greater than maximum {}", int_val, max_val),
				});
			}
		},
		FieldType::Boolean => {
			if !value.is_bool() {
				return Err(type_mismatch(field_name, "boolean", value));
			}
		},
		FieldType::Table(schema) => {
			schema.validate(value).map_err(|e| nest(field_name, e))?;
		},
		FieldType::Map(inner_type) => {
			let table = value
				.as_table()
				.ok_or_else(|| type_mismatch(field_name, "table", value))?;
			for (key, item) in table {
				validate_field_type(&format!("{}.{}", field_name, key), item, inner_type)?;
			}
		},
	}

	Ok(())
}

/// A configuration schema that can validate a TOML section.
pub trait ConfigSchema: Send + Sync {
	fn validate(&self, config: &toml::Value) -> Result<(), SchemaError>;
}

#[cfg(test)]
mod tests {
	use super::*;

	fn products_schema() -> Schema {
		Schema::new(
			vec![Field::new(
				"products",
				FieldType::Map(Box::new(FieldType::Table(Schema::new(
					vec![Field::new("price", FieldType::String)],
					vec![Field::new(
						"stock",
						FieldType::Integer {
							min: Some(0),
							max: None,
						},
					)],
				)))),
			)],
			vec![],
		)
	}

	#[test]
	fn test_nested_map_validation() {
		let config: toml::Value = toml::from_str(
			r#"
[products.LAPTOP-001]
price = "500.00"
stock = 3
"#,
		)
		.unwrap();
		assert!(products_schema().validate(&config).is_ok());
	}

	#[test]
	fn test_nested_error_carries_path() {
		let config: toml::Value = toml::from_str(
			r#"
[products.LAPTOP-001]
stock = -1
price = "1"
"#,
		)
		.unwrap();
		let err = products_schema().validate(&config).unwrap_err();
		assert!(err.to_string().contains("products.LAPTOP-001.stock"));
	}

	#[test]
	fn test_missing_required_field() {
		let config: toml::Value = toml::from_str("other = 1").unwrap();
		let err = products_schema().validate(&config).unwrap_err();
		assert!(matches!(err, SchemaError::MissingField(ref f) if f == "products"));
	}

	#[test]
	fn test_custom_validator() {
		let schema = Schema::new(
			vec![],
			vec![Field::new("topic", FieldType::String).with_validator(|v| {
				if v.as_str().is_some_and(str::is_empty) {
					Err("must not be empty".into())
				} else {
					Ok(())
				}
			})],
		);
		let config: toml::Value = toml::from_str("topic = \"\"").unwrap();
		assert!(schema.validate(&config).is_err());
	}
}
