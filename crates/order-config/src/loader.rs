//! Loader for configurations split across several files.
//!
//! A root file may name other files with `include = [...]`. Included files
//! contribute whole top-level sections; a section defined twice is an error,
//! as is a file included more than once.

use crate::{resolve_env_vars, Config, ConfigError};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

/// Configuration loader that resolves includes relative to a base directory.
pub struct ConfigLoader {
	base_path: PathBuf,
	/// Canonical paths already read, to detect include cycles.
	loaded_files: HashSet<PathBuf>,
	/// Top-level section name to the file that defined it.
	section_sources: HashMap<String, PathBuf>,
}

impl ConfigLoader {
	pub fn new(base_path: impl AsRef<Path>) -> Self {
		Self {
			base_path: base_path.as_ref().to_path_buf(),
			loaded_files: HashSet::new(),
			section_sources: HashMap::new(),
		}
	}

	/// Loads a configuration file together with everything it includes.
	pub async fn load_config(
		&mut self,
		config_path: impl AsRef<Path>,
	) -> Result<Config, ConfigError> {
		let root_path = self.resolve_path(config_path)?;
		let root_content = self.read_file(&root_path).await?;
		let mut root: toml::Value = toml::from_str(&root_content)?;

		let includes = extract_includes(&root)?;
		if includes.is_empty() {
			return root_content.parse();
		}

		let root_table = root
			.as_table_mut()
			.ok_or_else(|| ConfigError::Parse("Configuration root must be a table".into()))?;
		root_table.remove("include");
		for key in root_table.keys() {
			self.section_sources.insert(key.clone(), root_path.clone());
		}

		for include in includes {
			let include_path = self.resolve_path(&include)?;
			let content = self.read_file(&include_path).await?;
			let included: toml::Value = toml::from_str(&content)?;
			let Some(sections) = included.as_table() else {
				continue;
			};
			for (key, value) in sections {
				self.claim_section(key, &include_path)?;
				root_table.insert(key.clone(), value.clone());
			}
		}

		let combined = toml::to_string(&root).map_err(|e| {
			ConfigError::Parse(format!("Failed to serialize combined config: {}", e))
		})?;
		combined.parse()
	}

	/// Records that `section` comes from `source`, rejecting a second owner.
	fn claim_section(&mut self, section: &str, source: &Path) -> Result<(), ConfigError> {
		if let Some(existing) = self.section_sources.get(section) {
			return Err(ConfigError::Validation(format!(
				"Duplicate section '{}' found in {} and {}. \
				Each top-level section must be unique across all configuration files.",
				section,
				existing.display(),
				source.display()
			)));
		}
		self.section_sources
			.insert(section.to_string(), source.to_path_buf());
		Ok(())
	}

	/// Reads a file once and resolves environment variables in it.
	async fn read_file(&mut self, path: &Path) -> Result<String, ConfigError> {
		let canonical = tokio::fs::canonicalize(path).await.map_err(|e| {
			ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Cannot resolve path {}: {}", path.display(), e),
			))
		})?;

		if !self.loaded_files.insert(canonical.clone()) {
			return Err(ConfigError::Validation(format!(
				"Circular include detected: {} was already loaded",
				canonical.display()
			)));
		}

		let content = tokio::fs::read_to_string(path).await?;
		resolve_env_vars(&content)
	}

	fn resolve_path(&self, path: impl AsRef<Path>) -> Result<PathBuf, ConfigError> {
		let path = path.as_ref();
		let resolved = if path.is_absolute() {
			path.to_path_buf()
		} else {
			self.base_path.join(path)
		};

		if !resolved.exists() {
			return Err(ConfigError::Io(std::io::Error::new(
				std::io::ErrorKind::NotFound,
				format!("Configuration file not found: {}", resolved.display()),
			)));
		}
		Ok(resolved)
	}
}

/// Reads the `include` directive, a string or an array of strings.
fn extract_includes(root: &toml::Value) -> Result<Vec<PathBuf>, ConfigError> {
	match root.get("include") {
		None => Ok(Vec::new()),
		Some(toml::Value::String(path)) => Ok(vec![PathBuf::from(path)]),
		Some(toml::Value::Array(items)) => items
			.iter()
			.map(|item| {
				item.as_str().map(PathBuf::from).ok_or_else(|| {
					ConfigError::Validation("Include array must contain only strings".into())
				})
			})
			.collect(),
		Some(_) => Err(ConfigError::Validation(
			"Include must be a string or array of strings".into(),
		)),
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::fs;
	use tempfile::TempDir;

	const BACKENDS: &str = r#"
[store]
primary = "memory"
[store.implementations.memory]

[cache]
primary = "memory"
order_ttl_seconds = 60
[cache.implementations.memory]

[broker]
primary = "memory"
[broker.implementations.memory]

[notification]
primary = "log"
[notification.implementations.log]
"#;

	const PRICING: &str = r#"
[pricing]
primary = "catalog"
[pricing.implementations.catalog.products.LAPTOP-001]
price = "500"
stock = 10
"#;

	#[tokio::test]
	async fn test_single_file_config() {
		let temp_dir = TempDir::new().unwrap();
		let config_path = temp_dir.path().join("config.toml");
		let content = format!("[service]\nid = \"single\"\n{}{}", BACKENDS, PRICING);
		fs::write(&config_path, content).unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let config = loader.load_config(&config_path).await.unwrap();

		assert_eq!(config.service.id, "single");
		assert_eq!(config.cache.order_ttl_seconds, 60);
	}

	#[tokio::test]
	async fn test_config_with_includes() {
		let temp_dir = TempDir::new().unwrap();
		let main_config = r#"
include = ["backends.toml", "pricing.toml"]

[service]
id = "split"
"#;
		fs::write(temp_dir.path().join("main.toml"), main_config).unwrap();
		fs::write(temp_dir.path().join("backends.toml"), BACKENDS).unwrap();
		fs::write(temp_dir.path().join("pricing.toml"), PRICING).unwrap();

		let config = Config::from_file(temp_dir.path().join("main.toml").to_str().unwrap())
			.await
			.unwrap();

		assert_eq!(config.service.id, "split");
		assert_eq!(config.store.primary, "memory");
		assert!(config.pricing.implementations.contains_key("catalog"));
	}

	#[tokio::test]
	async fn test_duplicate_section_error() {
		let temp_dir = TempDir::new().unwrap();
		let main_config = r#"
include = ["duplicate.toml"]

[service]
id = "first"
"#;
		let duplicate_config = r#"
[service]
id = "second"
"#;
		fs::write(temp_dir.path().join("main.toml"), main_config).unwrap();
		fs::write(temp_dir.path().join("duplicate.toml"), duplicate_config).unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let error_msg = loader
			.load_config("main.toml")
			.await
			.unwrap_err()
			.to_string();

		assert!(error_msg.contains("Duplicate section 'service'"));
	}

	#[tokio::test]
	async fn test_self_include_detection() {
		let temp_dir = TempDir::new().unwrap();
		let config = r#"
include = ["self.toml"]

[service]
id = "loop"
"#;
		fs::write(temp_dir.path().join("self.toml"), config).unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let error_msg = loader
			.load_config("self.toml")
			.await
			.unwrap_err()
			.to_string();

		assert!(error_msg.contains("already loaded"));
	}

	#[tokio::test]
	async fn test_missing_include_reported() {
		let temp_dir = TempDir::new().unwrap();
		fs::write(
			temp_dir.path().join("main.toml"),
			"include = \"absent.toml\"\n[service]\nid = \"x\"\n",
		)
		.unwrap();

		let mut loader = ConfigLoader::new(temp_dir.path());
		let err = loader.load_config("main.toml").await.unwrap_err();
		assert!(matches!(err, ConfigError::Io(_)));
	}
}
