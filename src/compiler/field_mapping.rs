//! Field name normalization.
//!
//! The compiler runs every field name it sees through a [`FieldMapping`],
//! which translates source-specific names into the canonical field names the
//! rules and events are expected to share. Mappings come from taxonomy
//! presets, custom additions, or both.

use std::collections::HashMap;

/// Built-in taxonomy tables, source field to canonical field.
const SYSMON_TAXONOMY: &[(&str, &str)] = &[
    ("ProcessImage", "Image"),
    ("ProcessCommandLine", "CommandLine"),
    ("ParentProcessImage", "ParentImage"),
    ("ParentProcessCommandLine", "ParentCommandLine"),
    ("SourceProcessImage", "SourceImage"),
    ("TargetProcessImage", "TargetImage"),
];

const ECS_TAXONOMY: &[(&str, &str)] = &[
    ("event.code", "EventID"),
    ("process.executable", "Image"),
    ("process.command_line", "CommandLine"),
    ("process.parent.executable", "ParentImage"),
    ("user.name", "User"),
    ("source.ip", "SourceIp"),
    ("destination.ip", "DestinationIp"),
    ("file.path", "TargetFilename"),
];

const WINDOWS_TAXONOMY: &[(&str, &str)] = &[
    ("Event_ID", "EventID"),
    ("EventCode", "EventID"),
    ("Account_Name", "User"),
    ("TargetUserName", "TargetUser"),
    ("Workstation_Name", "Workstation"),
];

/// Translates rule field names to canonical field names.
///
/// Lookup is case-insensitive by default; exact-case matches always win.
///
/// # Examples
///
/// ```
/// use sigma_dag::compiler::FieldMapping;
///
/// let mut mapping = FieldMapping::with_taxonomy("windows");
/// mapping.add_mapping("Process_Name".to_string(), "Image".to_string());
///
/// assert_eq!(mapping.normalize_field("Event_ID"), "EventID");
/// assert_eq!(mapping.normalize_field("event_id"), "EventID");
/// assert_eq!(mapping.normalize_field("Process_Name"), "Image");
/// assert_eq!(mapping.normalize_field("Unmapped"), "Unmapped");
/// ```
#[derive(Debug, Clone)]
pub struct FieldMapping {
    /// Exact-case source field to canonical field.
    field_map: HashMap<String, String>,
    /// Lowercased source field to canonical field, for insensitive lookup.
    field_map_lower: HashMap<String, String>,
    taxonomy: String,
    case_sensitive: bool,
}

impl FieldMapping {
    /// An empty mapping under the default "sigma" taxonomy.
    pub fn new() -> Self {
        Self {
            field_map: HashMap::new(),
            field_map_lower: HashMap::new(),
            taxonomy: "sigma".to_string(),
            case_sensitive: false,
        }
    }

    /// Create a mapping preloaded with a taxonomy preset ("sysmon", "ecs" or
    /// "windows"). Unknown taxonomy names start empty.
    pub fn with_taxonomy(taxonomy: &str) -> Self {
        let mut mapping = Self::new();
        mapping.taxonomy = taxonomy.to_string();
        let preset = match taxonomy {
            "sysmon" => SYSMON_TAXONOMY,
            "ecs" => ECS_TAXONOMY,
            "windows" => WINDOWS_TAXONOMY,
            _ => &[],
        };
        for (source, target) in preset {
            mapping.add_mapping(source.to_string(), target.to_string());
        }
        mapping
    }

    pub fn taxonomy(&self) -> &str {
        &self.taxonomy
    }

    /// Switch between exact-case and case-insensitive source lookup.
    pub fn set_case_sensitive(&mut self, case_sensitive: bool) {
        self.case_sensitive = case_sensitive;
    }

    pub fn is_case_sensitive(&self) -> bool {
        self.case_sensitive
    }

    pub fn add_mapping(&mut self, source_field: String, target_field: String) {
        self.field_map_lower
            .insert(source_field.to_lowercase(), target_field.clone());
        self.field_map.insert(source_field, target_field);
    }

    /// Merge a table of mappings, e.g. loaded from deployment configuration.
    pub fn load_taxonomy_mappings(&mut self, mappings: HashMap<String, String>) {
        for (source, target) in mappings {
            self.add_mapping(source, target);
        }
    }

    pub fn has_mapping(&self, field_name: &str) -> bool {
        if self.field_map.contains_key(field_name) {
            return true;
        }
        !self.case_sensitive && self.field_map_lower.contains_key(&field_name.to_lowercase())
    }

    /// Translate a field name, returning it unchanged when unmapped.
    pub fn normalize_field(&self, field_name: &str) -> String {
        if let Some(target) = self.field_map.get(field_name) {
            return target.clone();
        }
        if !self.case_sensitive {
            if let Some(target) = self.field_map_lower.get(&field_name.to_lowercase()) {
                return target.clone();
            }
        }
        field_name.to_string()
    }

    pub fn mappings(&self) -> &HashMap<String, String> {
        &self.field_map
    }
}

impl Default for FieldMapping {
    fn default() -> Self {
        Self::new()
    }
}
