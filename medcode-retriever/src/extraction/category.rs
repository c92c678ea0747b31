//! UMLS semantic type (TUI) to coarse category mapping.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::sync::LazyLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Category {
    AnatomicalStructure,
    Chemical,
    Disease,
    Injury,
    MentalDisorder,
    Finding,
    Symptom,
    Physiology,
    Procedure,
    LivingBeing,
    Object,
    MedicalDevice,
    Concept,
    Activity,
    Organization,
    GeographicArea,
    Other,
}

impl Category {
    pub const ALL: [Category; 17] = [
        Self::AnatomicalStructure,
        Self::Chemical,
        Self::Disease,
        Self::Injury,
        Self::MentalDisorder,
        Self::Finding,
        Self::Symptom,
        Self::Physiology,
        Self::Procedure,
        Self::LivingBeing,
        Self::Object,
        Self::MedicalDevice,
        Self::Concept,
        Self::Activity,
        Self::Organization,
        Self::GeographicArea,
        Self::Other,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::AnatomicalStructure => "ANATOMICAL_STRUCTURE",
            Self::Chemical => "CHEMICAL",
            Self::Disease => "DISEASE",
            Self::Injury => "INJURY",
            Self::MentalDisorder => "MENTAL_DISORDER",
            Self::Finding => "FINDING",
            Self::Symptom => "SYMPTOM",
            Self::Physiology => "PHYSIOLOGY",
            Self::Procedure => "PROCEDURE",
            Self::LivingBeing => "LIVING_BEING",
            Self::Object => "OBJECT",
            Self::MedicalDevice => "MEDICAL_DEVICE",
            Self::Concept => "CONCEPT",
            Self::Activity => "ACTIVITY",
            Self::Organization => "ORGANIZATION",
            Self::GeographicArea => "GEOGRAPHIC_AREA",
            Self::Other => "OTHER",
        }
    }

    /// Semantic type codes assigned to this category, in table order.
    pub fn semantic_types(self) -> &'static [&'static str] {
        GROUPS
            .iter()
            .find(|(category, _)| *category == self)
            .map(|(_, codes)| *codes)
            .unwrap_or(&[])
    }
}

impl fmt::Display for Category {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

const GROUPS: &[(Category, &[&str])] = &[
    (
        Category::AnatomicalStructure,
        &[
            "T017", "T029", "T023", "T030", "T031", "T022", "T025", "T026", "T018", "T021",
            "T024",
        ],
    ),
    (
        Category::Chemical,
        &[
            "T116", "T195", "T123", "T122", "T103", "T120", "T104", "T200", "T196", "T126",
            "T131", "T125", "T129", "T130", "T197", "T114", "T109", "T121", "T192", "T127",
        ],
    ),
    (
        Category::Disease,
        &["T020", "T190", "T049", "T019", "T047", "T050", "T191", "T046"],
    ),
    (Category::Injury, &["T037"]),
    (Category::MentalDisorder, &["T048"]),
    (Category::Finding, &["T033"]),
    (Category::Symptom, &["T184"]),
    (
        Category::Physiology,
        &["T039", "T040", "T041", "T042", "T043", "T044", "T045"],
    ),
    (
        Category::Procedure,
        &["T060", "T065", "T058", "T059", "T063", "T062", "T061"],
    ),
    (
        Category::LivingBeing,
        &[
            "T008", "T007", "T099", "T013", "T004", "T096", "T016", "T015", "T001", "T101",
            "T002", "T098", "T097", "T014", "T011", "T005",
        ],
    ),
    (Category::Object, &["T071", "T073", "T168", "T072", "T075"]),
    (Category::MedicalDevice, &["T074"]),
    (
        Category::Concept,
        &[
            "T169", "T102", "T078", "T170", "T171", "T080", "T081", "T089", "T082", "T079",
        ],
    ),
    (
        Category::Activity,
        &[
            "T052", "T053", "T056", "T051", "T064", "T055", "T066", "T057", "T054",
        ],
    ),
    (Category::Organization, &["T093", "T092", "T094", "T095"]),
    (Category::GeographicArea, &["T083"]),
];

static TUI_TO_CATEGORY: LazyLock<HashMap<&'static str, Category>> = LazyLock::new(|| {
    GROUPS
        .iter()
        .flat_map(|(category, codes)| codes.iter().map(move |code| (*code, *category)))
        .collect()
});

/// Category for a single semantic type code, if it is in the table.
pub fn lookup(semantic_type: &str) -> Option<Category> {
    TUI_TO_CATEGORY.get(semantic_type.trim()).copied()
}

/// First code (in input order) found in the table decides; none gives
/// [`Category::Other`].
pub fn resolve<S: AsRef<str>>(semantic_types: &[S]) -> Category {
    semantic_types
        .iter()
        .find_map(|code| lookup(code.as_ref()))
        .unwrap_or(Category::Other)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_match_wins() {
        assert_eq!(resolve(&["T047", "T184"]), Category::Disease);
        assert_eq!(resolve(&["T184", "T047"]), Category::Symptom);
        assert_eq!(resolve(&["T999", "T037"]), Category::Injury);
    }

    #[test]
    fn test_unknown_or_empty_is_other() {
        assert_eq!(resolve(&["T999"]), Category::Other);
        assert_eq!(resolve::<&str>(&[]), Category::Other);
        assert_eq!(lookup("t047"), None);
    }

    #[test]
    fn test_every_code_maps_once() {
        let total: usize = GROUPS.iter().map(|(_, codes)| codes.len()).sum();
        assert_eq!(TUI_TO_CATEGORY.len(), total);
        assert_eq!(total, 103);
    }

    #[test]
    fn test_reverse_listing() {
        assert_eq!(Category::MedicalDevice.semantic_types(), &["T074"]);
        assert!(Category::Other.semantic_types().is_empty());
        for category in Category::ALL {
            for code in category.semantic_types() {
                assert_eq!(lookup(code), Some(category));
            }
        }
    }

    #[test]
    fn test_display_matches_serde() {
        for category in Category::ALL {
            let json = serde_json::to_string(&category).unwrap();
            assert_eq!(json, format!("\"{category}\""));
        }
    }
}
