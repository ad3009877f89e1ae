//! Obfuscation options
//!
//! Options come either from a JSON request or from a `moonveil.toml` file.
//! Every table is optional; missing feature flags are off.

use std::fs;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::target::Target;

/// Default file name written by `moonveil init`
pub const CONFIG_FILE_NAME: &str = "moonveil.toml";

/// Everything one `obfuscate` call needs besides the source text
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub struct ObfuscateOptions {
    #[serde(default)]
    pub target: Target,
    #[serde(default)]
    pub seed: u64,
    #[serde(default)]
    pub features: Features,
    #[serde(default)]
    pub tuning: Tuning,
}

/// Requested feature set; filtered through the target profile before use
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct Features {
    pub vm_obfuscation: bool,
    pub string_encryption: bool,
    pub control_flow: bool,
    pub junk_code: bool,
    pub variable_renaming: bool,
    pub constant_encryption: bool,
    pub integrity_check: bool,
    pub environment_check: bool,
    pub watermark: bool,
    pub minify: bool,
}

/// Feature names as accepted on the command line and in JSON
pub const FEATURE_NAMES: &[&str] = &[
    "vmObfuscation",
    "stringEncryption",
    "controlFlow",
    "junkCode",
    "variableRenaming",
    "constantEncryption",
    "integrityCheck",
    "environmentCheck",
    "watermark",
    "minify",
];

impl Features {
    /// The source-level passes plus minification; what `init` writes
    pub fn recommended() -> Self {
        Self {
            vm_obfuscation: false,
            string_encryption: true,
            control_flow: true,
            junk_code: true,
            variable_renaming: true,
            constant_encryption: true,
            integrity_check: false,
            environment_check: false,
            watermark: true,
            minify: true,
        }
    }

    pub fn all() -> Self {
        Self {
            vm_obfuscation: true,
            string_encryption: true,
            control_flow: true,
            junk_code: true,
            variable_renaming: true,
            constant_encryption: true,
            integrity_check: true,
            environment_check: true,
            watermark: true,
            minify: true,
        }
    }

    /// Drop whatever the target does not allow
    pub fn resolve(mut self, target: Target) -> Self {
        let profile = target.profile();
        if !profile.allows_environment_check {
            self.environment_check = false;
        }
        self
    }

    /// Toggle a feature by its camelCase name
    pub fn set(&mut self, name: &str, enabled: bool) -> std::result::Result<(), String> {
        let flag = match name {
            "vmObfuscation" => &mut self.vm_obfuscation,
            "stringEncryption" => &mut self.string_encryption,
            "controlFlow" => &mut self.control_flow,
            "junkCode" => &mut self.junk_code,
            "variableRenaming" => &mut self.variable_renaming,
            "constantEncryption" => &mut self.constant_encryption,
            "integrityCheck" => &mut self.integrity_check,
            "environmentCheck" => &mut self.environment_check,
            "watermark" => &mut self.watermark,
            "minify" => &mut self.minify,
            other => {
                return Err(format!(
                    "unknown feature '{}' (expected one of: {})",
                    other,
                    FEATURE_NAMES.join(", ")
                ))
            }
        };
        *flag = enabled;
        Ok(())
    }
}

/// What the integrity check does when the seal does not match
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FailAction {
    #[default]
    Error,
    Loop,
    Silent,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatermarkStyle {
    /// `--[[! ... ]]` block comment
    #[default]
    Comment,
    /// An unused local holding the encoded mark
    Hidden,
    /// A local that decodes the mark at runtime
    Encoded,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum WatermarkPosition {
    #[default]
    Top,
    Bottom,
    Both,
}

/// Knobs for individual passes
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Tuning {
    /// Probability of inserting junk after each statement
    #[serde(default = "default_junk_density")]
    pub junk_density: f64,
    /// Upper bound of junk statements added to one block
    #[serde(default = "default_junk_max_per_block")]
    pub junk_max_per_block: usize,
    /// Wrap flattened `if` conditions in opaque predicates
    #[serde(default = "default_true")]
    pub opaque_predicates: bool,
    /// Blocks shorter than this are not flattened
    #[serde(default = "default_flatten_min_statements")]
    pub flatten_min_statements: usize,
    #[serde(default)]
    pub integrity_fail_action: FailAction,
    #[serde(default)]
    pub watermark_style: WatermarkStyle,
    #[serde(default)]
    pub watermark_position: WatermarkPosition,
    /// Extra text embedded in the watermark
    #[serde(default)]
    pub watermark_text: Option<String>,
    /// Decoy instructions per real instruction
    #[serde(default = "default_vm_decoy_ratio")]
    pub vm_decoy_ratio: f64,
    /// Unused constants appended to the pool
    #[serde(default = "default_vm_constant_padding")]
    pub vm_constant_padding: usize,
    #[serde(default = "default_true")]
    pub vm_shuffle_opcodes: bool,
    /// Instructions the emitted interpreter executes before giving up
    #[serde(default = "default_vm_iteration_cap")]
    pub vm_iteration_cap: u64,
}

impl Default for Tuning {
    fn default() -> Self {
        Self {
            junk_density: default_junk_density(),
            junk_max_per_block: default_junk_max_per_block(),
            opaque_predicates: true,
            flatten_min_statements: default_flatten_min_statements(),
            integrity_fail_action: FailAction::default(),
            watermark_style: WatermarkStyle::default(),
            watermark_position: WatermarkPosition::default(),
            watermark_text: None,
            vm_decoy_ratio: default_vm_decoy_ratio(),
            vm_constant_padding: default_vm_constant_padding(),
            vm_shuffle_opcodes: true,
            vm_iteration_cap: default_vm_iteration_cap(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_junk_density() -> f64 {
    0.3
}

fn default_junk_max_per_block() -> usize {
    3
}

fn default_flatten_min_statements() -> usize {
    2
}

fn default_vm_decoy_ratio() -> f64 {
    0.25
}

fn default_vm_constant_padding() -> usize {
    4
}

fn default_vm_iteration_cap() -> u64 {
    100_000_000
}

impl ObfuscateOptions {
    pub fn new(target: Target, seed: u64, features: Features) -> Self {
        Self {
            target,
            seed,
            features,
            tuning: Tuning::default(),
        }
    }

    /// Parse options from TOML text
    pub fn from_toml_str(content: &str) -> std::result::Result<Self, ConfigError> {
        Ok(toml::from_str(content)?)
    }

    pub fn to_toml_string(&self) -> std::result::Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Load options from a TOML file
    pub fn from_config_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        Self::from_toml_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    /// Write options as TOML, creating or replacing the file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml_string().context("Failed to serialize config")?;
        fs::write(path, content)
            .with_context(|| format!("Failed to write config file: {}", path.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_missing_features_default_off() {
        let options: ObfuscateOptions =
            serde_json::from_str(r#"{"features": {"constantEncryption": true}}"#).unwrap();
        assert!(options.features.constant_encryption);
        assert!(!options.features.minify);
        assert_eq!(options.target, Target::Standard);
        assert_eq!(options.tuning, Tuning::default());
    }

    #[test]
    fn test_json_shape_uses_camel_case() {
        let json = r#"{
            "target": "roblox",
            "seed": 42,
            "features": {"vmObfuscation": true, "environmentCheck": true},
            "tuning": {"junkDensity": 0.5, "integrityFailAction": "loop"}
        }"#;
        let options: ObfuscateOptions = serde_json::from_str(json).unwrap();
        assert_eq!(options.target, Target::Roblox);
        assert_eq!(options.seed, 42);
        assert!(options.features.vm_obfuscation);
        assert_eq!(options.tuning.junk_density, 0.5);
        assert_eq!(options.tuning.integrity_fail_action, FailAction::Loop);
        assert_eq!(options.tuning.junk_max_per_block, 3);
    }

    #[test]
    fn test_resolve_forces_environment_check_off_on_roblox() {
        let resolved = Features::all().resolve(Target::Roblox);
        assert!(!resolved.environment_check);
        assert!(resolved.vm_obfuscation);
        assert!(Features::all().resolve(Target::Loadstring).environment_check);
    }

    #[test]
    fn test_set_by_name() {
        let mut features = Features::default();
        features.set("junkCode", true).unwrap();
        assert!(features.junk_code);
        let err = features.set("turbo", true).unwrap_err();
        assert!(err.contains("unknown feature 'turbo'"));
    }

    #[test]
    fn test_toml_round_trip_through_file() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join(CONFIG_FILE_NAME);
        let mut options = ObfuscateOptions::new(Target::Loadstring, 7, Features::recommended());
        options.tuning.watermark_text = Some("build 12".to_string());
        options.save(&path).unwrap();

        let loaded = ObfuscateOptions::from_config_file(&path).unwrap();
        assert_eq!(loaded, options);
    }

    #[test]
    fn test_bad_toml_reports_path() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("broken.toml");
        fs::write(&path, "target = [").unwrap();
        let err = ObfuscateOptions::from_config_file(&path).unwrap_err();
        assert!(format!("{:#}", err).contains("broken.toml"));
    }

    #[test]
    fn test_partial_toml() {
        let options = ObfuscateOptions::from_toml_str(
            "target = \"loadstring\"\n\n[features]\nminify = true\n\n[tuning]\nvmIterationCap = 500\n",
        )
        .unwrap();
        assert_eq!(options.target, Target::Loadstring);
        assert!(options.features.minify);
        assert_eq!(options.tuning.vm_iteration_cap, 500);
        assert_eq!(options.tuning.vm_constant_padding, 4);
    }
}
