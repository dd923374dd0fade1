//! Staff and food preset directories
//!
//! Both directories are read-only to the core. The in-memory implementations
//! load from JSON files (`~/.coolsafe/staff.json`, `~/.coolsafe/presets.json`
//! by default); a missing presets file falls back to the built-in list.

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use crate::cooling::FoodCategory;

/// Directory error types
#[derive(Debug, thiserror::Error)]
pub enum DirectoryError {
    #[error("Failed to read {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid directory JSON: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("Staff code {0} is assigned to more than one active member")]
    DuplicateCode(u32),
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StaffMember {
    pub id: String,
    pub name: String,
    #[serde(default)]
    pub initials: String,
    #[serde(default)]
    pub role: String,
    #[serde(default = "default_active")]
    pub active: bool,
    /// Spoken identification number
    #[serde(default)]
    pub code: Option<u32>,
}

fn default_active() -> bool {
    true
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FoodPreset {
    pub name: String,
    #[serde(default)]
    pub category: FoodCategory,
}

impl FoodPreset {
    pub fn new(name: impl Into<String>, category: FoodCategory) -> Self {
        Self {
            name: name.into(),
            category,
        }
    }
}

/// Lookup of staff by spoken code
pub trait StaffDirectory: Send + Sync {
    /// Active member holding `code`, if any
    fn find_by_code(&self, code: u32) -> Option<StaffMember>;

    fn active_staff(&self) -> Vec<StaffMember>;
}

/// Known food items offered when starting a session by voice
pub trait PresetCatalog: Send + Sync {
    fn presets(&self) -> Vec<FoodPreset>;
}

pub fn get_staff_path() -> PathBuf {
    crate::config::get_config_dir().join("staff.json")
}

pub fn get_presets_path() -> PathBuf {
    crate::config::get_config_dir().join("presets.json")
}

fn read_file(path: &Path) -> Result<String, DirectoryError> {
    fs::read_to_string(path).map_err(|source| DirectoryError::Read {
        path: path.to_path_buf(),
        source,
    })
}

// =============================================================================
// Staff
// =============================================================================

#[derive(Debug, Default)]
pub struct InMemoryStaffDirectory {
    members: RwLock<Vec<StaffMember>>,
}

impl InMemoryStaffDirectory {
    pub fn new(members: Vec<StaffMember>) -> Result<Self, DirectoryError> {
        check_unique_codes(&members)?;
        Ok(Self {
            members: RwLock::new(members),
        })
    }

    pub fn from_json(content: &str) -> Result<Self, DirectoryError> {
        let members: Vec<StaffMember> = serde_json::from_str(content)?;
        Self::new(members)
    }

    /// Loads staff from `path`. A missing file yields an empty directory.
    pub fn load(path: &Path) -> Result<Self, DirectoryError> {
        if !path.exists() {
            tracing::warn!("No staff file at {:?}; voice close will not identify staff", path);
            return Ok(Self::default());
        }
        let directory = Self::from_json(&read_file(path)?)?;
        tracing::info!(
            "Loaded {} staff member(s) from {:?}",
            directory.members.read().len(),
            path
        );
        Ok(directory)
    }

    /// Replaces the member list
    pub fn replace(&self, members: Vec<StaffMember>) -> Result<(), DirectoryError> {
        check_unique_codes(&members)?;
        *self.members.write() = members;
        Ok(())
    }
}

fn check_unique_codes(members: &[StaffMember]) -> Result<(), DirectoryError> {
    let mut seen = HashSet::new();
    for code in members.iter().filter(|m| m.active).filter_map(|m| m.code) {
        if !seen.insert(code) {
            return Err(DirectoryError::DuplicateCode(code));
        }
    }
    Ok(())
}

impl StaffDirectory for InMemoryStaffDirectory {
    fn find_by_code(&self, code: u32) -> Option<StaffMember> {
        self.members
            .read()
            .iter()
            .find(|m| m.active && m.code == Some(code))
            .cloned()
    }

    fn active_staff(&self) -> Vec<StaffMember> {
        self.members
            .read()
            .iter()
            .filter(|m| m.active)
            .cloned()
            .collect()
    }
}

// =============================================================================
// Presets
// =============================================================================

/// Built-in presets used when no presets file exists
pub fn default_presets() -> Vec<FoodPreset> {
    vec![
        FoodPreset::new("Chicken Stock", FoodCategory::Stock),
        FoodPreset::new("Beef Stock", FoodCategory::Stock),
        FoodPreset::new("Tomato Soup", FoodCategory::Soup),
        FoodPreset::new("Vegetable Soup", FoodCategory::Soup),
        FoodPreset::new("Bolognese Sauce", FoodCategory::Sauce),
        FoodPreset::new("Gravy", FoodCategory::Sauce),
        FoodPreset::new("Beef Stew", FoodCategory::Meat),
        FoodPreset::new("Pulled Pork", FoodCategory::Meat),
        FoodPreset::new("Roast Chicken", FoodCategory::Poultry),
        FoodPreset::new("Fish Pie", FoodCategory::Seafood),
        FoodPreset::new("Rice", FoodCategory::Rice),
        FoodPreset::new("Pasta", FoodCategory::Pasta),
        FoodPreset::new("Roast Vegetables", FoodCategory::Vegetables),
        FoodPreset::new("Custard", FoodCategory::Dessert),
    ]
}

#[derive(Debug)]
pub struct InMemoryPresetCatalog {
    presets: RwLock<Vec<FoodPreset>>,
}

impl Default for InMemoryPresetCatalog {
    fn default() -> Self {
        Self::new(default_presets())
    }
}

impl InMemoryPresetCatalog {
    pub fn new(presets: Vec<FoodPreset>) -> Self {
        Self {
            presets: RwLock::new(presets),
        }
    }

    pub fn from_json(content: &str) -> Result<Self, DirectoryError> {
        let presets: Vec<FoodPreset> = serde_json::from_str(content)?;
        Ok(Self::new(
            presets
                .into_iter()
                .filter(|p| !p.name.trim().is_empty())
                .collect(),
        ))
    }

    /// Loads presets from `path`, or the built-in list if the file is missing
    pub fn load(path: &Path) -> Result<Self, DirectoryError> {
        if !path.exists() {
            tracing::debug!("No presets file at {:?}, using built-in presets", path);
            return Ok(Self::default());
        }
        Self::from_json(&read_file(path)?)
    }
}

impl PresetCatalog for InMemoryPresetCatalog {
    fn presets(&self) -> Vec<FoodPreset> {
        self.presets.read().clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn member(id: &str, name: &str, code: Option<u32>, active: bool) -> StaffMember {
        StaffMember {
            id: id.to_string(),
            name: name.to_string(),
            initials: String::new(),
            role: "chef".to_string(),
            active,
            code,
        }
    }

    #[test]
    fn test_find_by_code_ignores_inactive() {
        let directory = InMemoryStaffDirectory::new(vec![
            member("s1", "Tom", Some(1), false),
            member("s2", "Jane", Some(2), true),
        ])
        .unwrap();

        assert_eq!(directory.find_by_code(2).unwrap().name, "Jane");
        assert!(directory.find_by_code(1).is_none());
        assert_eq!(directory.active_staff().len(), 1);
    }

    #[test]
    fn test_duplicate_active_codes_rejected() {
        let result = InMemoryStaffDirectory::new(vec![
            member("s1", "Tom", Some(4), true),
            member("s2", "Jane", Some(4), true),
        ]);
        assert!(matches!(result, Err(DirectoryError::DuplicateCode(4))));
    }

    #[test]
    fn test_staff_json_defaults() {
        let directory =
            InMemoryStaffDirectory::from_json(r#"[{"id": "s7", "name": "Ana", "code": 7}]"#)
                .unwrap();
        let ana = directory.find_by_code(7).unwrap();
        assert!(ana.active);
        assert_eq!(ana.role, "");
    }

    #[test]
    fn test_load_presets_from_file() {
        let mut file = NamedTempFile::new().unwrap();
        write!(
            file,
            r#"[{{"name": "Lentil Dahl", "category": "vegetables"}}, {{"name": " "}}]"#
        )
        .unwrap();

        let catalog = InMemoryPresetCatalog::load(file.path()).unwrap();
        let presets = catalog.presets();
        assert_eq!(presets.len(), 1);
        assert_eq!(presets[0].category, FoodCategory::Vegetables);
    }

    #[test]
    fn test_missing_presets_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let catalog = InMemoryPresetCatalog::load(&dir.path().join("presets.json")).unwrap();
        assert_eq!(catalog.presets(), default_presets());
    }
}
