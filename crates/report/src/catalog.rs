use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::path::Path;

/// Project scenario a question asks about.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scenario {
    NoAction,
    WithAction,
}

impl Scenario {
    pub fn label(self) -> &'static str {
        match self {
            Scenario::NoAction => "No Action",
            Scenario::WithAction => "With Action",
        }
    }
}

impl fmt::Display for Scenario {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// Retrieval strategy a question group was written for. Both currently run
/// the same retrieval and extraction; the tag only shows up in logs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    Fusion,
    Single,
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Strategy::Fusion => f.write_str("fusion"),
            Strategy::Single => f.write_str("single"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct QuestionEntry {
    pub category: String,
    pub component: String,
    pub question: String,
    pub scenario: Scenario,
    pub strategy: Strategy,
}

#[derive(Debug, Clone)]
pub struct QueryGroup {
    pub strategy: Strategy,
    pub scenario: Scenario,
    pub entries: Vec<QuestionEntry>,
}

/// Every question asked of a directory, plus the unit of each component.
#[derive(Debug, Clone)]
pub struct QuestionCatalog {
    groups: Vec<QueryGroup>,
    units: HashMap<String, String>,
}

#[derive(Debug, thiserror::Error)]
pub enum CatalogError {
    #[error("Query group {strategy}/{scenario} appears more than once")]
    DuplicateGroup { strategy: Strategy, scenario: Scenario },
    #[error("Category {category:?} must be a list of {{component: question}} objects")]
    MalformedCategory { category: String },
    #[error("Question for {component:?} in category {category:?} must be a non-empty string")]
    MalformedQuestion { category: String, component: String },
    #[error("Unit for {component:?} must be a string")]
    MalformedUnit { component: String },
}

#[derive(Deserialize)]
struct CatalogFile {
    groups: Vec<GroupFile>,
    #[serde(default)]
    units: serde_json::Map<String, serde_json::Value>,
}

#[derive(Deserialize)]
struct GroupFile {
    strategy: Strategy,
    scenario: Scenario,
    categories: serde_json::Map<String, serde_json::Value>,
}

impl QuestionCatalog {
    /// Groups are put in their fixed run order: fusion before single,
    /// no-action before with-action.
    pub fn new(mut groups: Vec<QueryGroup>, units: HashMap<String, String>) -> Result<Self, CatalogError> {
        groups.sort_by_key(|g| (g.strategy, g.scenario));
        for pair in groups.windows(2) {
            if (pair[0].strategy, pair[0].scenario) == (pair[1].strategy, pair[1].scenario) {
                return Err(CatalogError::DuplicateGroup {
                    strategy: pair[1].strategy,
                    scenario: pair[1].scenario,
                });
            }
        }
        Ok(Self { groups, units })
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let file: CatalogFile = serde_json::from_str(raw).context("Catalog is not valid JSON")?;

        let mut groups = Vec::with_capacity(file.groups.len());
        for group in file.groups {
            let mut entries = Vec::new();
            for (category, value) in group.categories {
                let lists = value
                    .as_array()
                    .ok_or_else(|| CatalogError::MalformedCategory { category: category.clone() })?;
                for item in lists {
                    let questions = item
                        .as_object()
                        .ok_or_else(|| CatalogError::MalformedCategory { category: category.clone() })?;
                    for (component, question) in questions {
                        let question = question
                            .as_str()
                            .map(str::trim)
                            .filter(|q| !q.is_empty())
                            .ok_or_else(|| CatalogError::MalformedQuestion {
                                category: category.clone(),
                                component: component.clone(),
                            })?;
                        entries.push(QuestionEntry {
                            category: category.clone(),
                            component: component.clone(),
                            question: question.to_string(),
                            scenario: group.scenario,
                            strategy: group.strategy,
                        });
                    }
                }
            }
            groups.push(QueryGroup {
                strategy: group.strategy,
                scenario: group.scenario,
                entries,
            });
        }

        let mut units = HashMap::new();
        for (component, unit) in file.units {
            let unit = unit
                .as_str()
                .ok_or_else(|| CatalogError::MalformedUnit { component: component.clone() })?;
            units.insert(component, unit.to_string());
        }

        let catalog = Self::new(groups, units)?;
        for component in catalog.missing_units() {
            tracing::warn!(component = %component, "No unit configured for component");
        }
        Ok(catalog)
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read catalog {}", path.display()))?;
        Self::from_json(&raw).with_context(|| format!("Invalid catalog {}", path.display()))
    }

    /// The question set and units of the environmental review reports.
    pub fn builtin() -> Self {
        let group = |strategy: Strategy,
                     scenario: Scenario,
                     categories: &[(&str, &[(&str, &str)])]| QueryGroup {
            strategy,
            scenario,
            entries: categories
                .iter()
                .flat_map(|(category, questions)| {
                    questions.iter().map(move |(component, question)| QuestionEntry {
                        category: category.to_string(),
                        component: component.to_string(),
                        question: question.to_string(),
                        scenario,
                        strategy,
                    })
                })
                .collect(),
        };

        let groups = vec![
            group(Strategy::Fusion, Scenario::NoAction, &[("Project Description", FUSION_NO_ACTION)]),
            group(Strategy::Fusion, Scenario::WithAction, &[("Project Description", FUSION_WITH_ACTION)]),
            group(Strategy::Single, Scenario::NoAction, &[("Open Space", OPEN_SPACE_NO_ACTION)]),
            group(
                Strategy::Single,
                Scenario::WithAction,
                &[
                    ("Socioeconomic", SOCIOECONOMIC_WITH_ACTION),
                    ("Open Space", OPEN_SPACE_WITH_ACTION),
                    ("SolidWaste", SOLID_WASTE_WITH_ACTION),
                    ("GreenHouse Gas", GREENHOUSE_GAS_WITH_ACTION),
                ],
            ),
        ];

        let units = COMPONENT_UNITS
            .iter()
            .map(|(component, unit)| (component.to_string(), unit.to_string()))
            .collect();

        Self { groups, units }
    }

    pub fn groups(&self) -> &[QueryGroup] {
        &self.groups
    }

    /// All questions in run order.
    pub fn entries(&self) -> impl Iterator<Item = &QuestionEntry> {
        self.groups.iter().flat_map(|g| g.entries.iter())
    }

    pub fn len(&self) -> usize {
        self.groups.iter().map(|g| g.entries.len()).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn unit_for(&self, component: &str) -> Option<&str> {
        self.units.get(component).map(String::as_str)
    }

    /// Components asked about that have no unit entry, in run order.
    pub fn missing_units(&self) -> Vec<&str> {
        let mut missing: Vec<&str> = Vec::new();
        for entry in self.entries() {
            let component = entry.component.as_str();
            if !self.units.contains_key(component) && !missing.contains(&component) {
                missing.push(component);
            }
        }
        missing
    }
}

impl Default for QuestionCatalog {
    fn default() -> Self {
        Self::builtin()
    }
}

const FUSION_NO_ACTION: &[(&str, &str)] = &[
    (
        "Affordable residential (low AMI - supportive)",
        "How many units of Affordable Residential Low AMI supportive units are present with no action? \
         Look for the values in RWCDS Summary table, if the table is present.\n\
         When answering, use this format:\n\
         Format:\n\
         Affordable residential (low AMI - supportive) With No Action: [number]",
    ),
    (
        "Office Space",
        "How much is the retail Gross square footage with No Action Condition for commercial land use?. \
         When answering, use this format:\n\
         Format:\n\
         Total GSF With No Action: [number]",
    ),
    (
        "Healthcare facilities",
        "How many square feet of space is designated exclusively for healthcare facilities, such as \
         hospitals, clinics, or medical offices, explicitly mentioned under the NO-ACTION CONDITION?\n\
         When answering, use this format:\n\
         Format: Healthcare facilities With No Action: [number]",
    ),
    (
        "Community Space",
        "How many gross square feet (GSF) of Community Facility Space is present under No Action Condition?\n\
         When answering, use this format:\n\
         Format: Community Space With No Action: [number]",
    ),
    (
        "Cultural Space",
        "How many square feet of space is designated exclusively for cultural facilities under the \
         NO-ACTION CONDITION?\n\
         When answering, use this format:\n\
         Format: Cultural Space With No Action: [number]",
    ),
    (
        "Affordable Residential (high AMI)",
        "How many units of affordable residential greater than or equal to 80% AMI are present with no \
         action condition? Total Affordable Units- Affordable units earning upto 80% of AMI = Affordable \
         Residential (high AMI).\n\
         When answering, use this format:\n\
         Format: Affordable Residential (high AMI) With No Action: [number]",
    ),
    (
        "Parking Space",
        "How many Parking Spaces are available in No-Action Condition? Focus only on the development \
         Site/Buildings under the \"No-Action\" condition. Look for values in tables describing parking \
         conditions specific to the No-Action scenario. Avoid total parking supply for the entire study \
         area unless explicitly part of the No-Action condition. Parking Spaces With Action - Increment = \
         Parking Space without action. If parking spaces are displaced or unavailable, reflect the \
         adjusted value as zero.\n\
         When answering, use this format:\n\
         Format:\n\
         Parking Space With No Action: [number]",
    ),
    (
        "Market Rate Residential",
        "What is the total number of occupied Dwelling Units (DU) present specifically under No\u{2010}Action \
         Condition, in table mentioning Increment, for Residential Land Use? All values are explicitly in \
         a table. This value is also known as Total Dwelling Units (DU) or approximately how many DUs?\n\
         When answering, use this format:\n\
         Format: Market Rate With No Action: [number]",
    ),
    (
        "Building Total GSF",
        "What is the total gsf or total gross square footage (GSF) of development under the No-Action \
         scenario specifically for all projected sites combined, as explicitly stated in a summary table \
         or paragraph? It is also known as the maximum amount of floor area that can be developed in the \
         zoning classification under No-Action Condition\n\
         Ensure the value includes only the total GSF under the \"No-Action\" scenario.\n\
         When answering, use this format:\n\
         Format: Building Total GSF (no action): [number]",
    ),
];

const FUSION_WITH_ACTION: &[(&str, &str)] = &[
    (
        "Affordable residential (low AMI - supportive)",
        "How many affordable residential units designated for low AMI (such as up to 80% of AMI) or \
         supportive housing are included in the proposed action?. Look for the values in RWCDS Summary \
         if the table is present.\n\
         When answering, use this format:\n\
         Format:\n\
         Affordable residential (low AMI - supportive) With Action: [number]",
    ),
    (
        "Office Space",
        "What is the total square footage or Gross Floor Area of office or commercial space under the \
         'With Action' condition?\n\
         - Prefer values explicitly labeled as \"Commercial GSF,\" \"Office GSF,\" or \"Gross floor area \
         (sq. ft.) under With Action.\"\n\
         - Look for terms like \"Development Site,\" \"With Action Condition,\" or \"Total GSF\" nearby.\n\
         - Ignore values under \"No Action\" or \"Increment.\"\n\
         When answering, use this format:\n\
         Format:\n\
         Total GSF With Action: [number]",
    ),
    (
        "Healthcare facilities",
        "How many square feet of space is designated exclusively for healthcare facilities, such as \
         hospitals, clinics, or medical offices, explicitly mentioned under the WITH-ACTION CONDITION?\n\
         When answering, use this format:\n\
         Format: Healthcare facilities With Action: [number]",
    ),
    (
        "Community Space",
        "How many gross square feet (GSF) of Community Facility Space, including medical if available, \
         is present under With Action Condition?\n\
         When answering, use this format:\n\
         Format: Community Space With Action: [number]",
    ),
    (
        "Cultural Space",
        "How many square feet of space is designated for cultural facilities explicitly mentioned under \
         the WITH-ACTION CONDITION?\n\
         When answering, use this format:\n\
         Format: Cultural Space With Action: [number]",
    ),
    (
        "Affordable Residential (high AMI)",
        "How many units of affordable residential with AMI greater than or equal to 80% are proposed \
         with action condition? Total Affordable Units- Affordable units earning upto 80% of AMI = \
         Affordable Residential (high AMI).\n\
         When answering, use this format:\n\
         Format: Affordable Residential (high AMI) With Action: [number]",
    ),
    (
        "Parking Space",
        "How many Parking Spaces are available With-Action condition on the development Site/Buildings? \
         Look explicitly for values in tables summarizing parking availability or parking provision \
         under the \"With-Action\" condition. Ignore values that represent total parking capacity in \
         study areas or broader regions unless explicitly tied to the With-Action condition. For cases \
         involving parking loss or displacement, subtract the number of spaces lost explicitly from any \
         prior totals.\n\
         When answering, use this format:\n\
         Format:\n\
         Parking Space With Action: [number]",
    ),
    (
        "Market Rate Residential",
        "What is the total number of occupied Dwelling Units (DU) present specifically under \
         With\u{2010}Action Condition, in table mentioning Increment, for Residential Land Use? All values \
         are explicitly in a table. This value is also known as Total Dwelling Units (DU) or \
         approximately how many DUs?\n\
         When answering, use this format:\n\
         Format: Market Rate With Action: [number]",
    ),
    (
        "Commercial Space",
        "How many square feet of large commercial spaces are available with action condition? These \
         are the spaces used for Cinema, Supermarket and Physical Culture Establishment etc. and not \
         office, retail or other centers.\n\
         When answering, use this format:\n\
         Format: Commercial Space With Action: [number]",
    ),
    (
        "Building Total GSF",
        "What is the  total gsf or total gross square footage (GSF) of development under the \
         With-Action scenario? Give the exact number. \"\n\
         When answering, use this format:\n\
         Format: Building Total GSF (with action): [number]",
    ),
];

const OPEN_SPACE_NO_ACTION: &[(&str, &str)] = &[(
    "Open Space Ratio",
    "\"What is the open space ratio (OSR) or total open space available in the study area under the \
     no action condition?\"\n\
     When answering, use this format:\n\
     Format: Open Space With No Action: [number]",
)];

const SOCIOECONOMIC_WITH_ACTION: &[(&str, &str)] = &[
    (
        "Displacement Residential",
        "\"How many existing residential units will be displaced due to the proposed development?\"\n\
         When answering, use this format:\n\
         Format: Displacement Residential With Action: [number]",
    ),
    (
        "Displacement Commercial",
        "\"What is the total square footage of commercial spaces that will be displaced with the \
         proposed actions?\"\n\
         When answering, use this format:\n\
         Format: Displacement Commercial With Action: [number]",
    ),
    (
        "Displacement Vacant",
        "\"How many vacant lots or properties will be displaced due to the proposed development?\"\n\
         Format: Displacement Vacant With Action: [number]",
    ),
];

const OPEN_SPACE_WITH_ACTION: &[(&str, &str)] = &[(
    "Open Space Ratio",
    "\"What is the open space ratio (OSR) of the study area resulting from with action condition?\" \
     When answering, use this format:\n\
     Format: Open Space With Action: [number]",
)];

const SOLID_WASTE_WITH_ACTION: &[(&str, &str)] = &[(
    "Solid Waste Generation",
    "\"How many tons of solid waste per week are expected to be generated by the proposed development \
     under action?\" When answering, use this format:\n\
     Format: Solid Waste With Action: [number]",
)];

const GREENHOUSE_GAS_WITH_ACTION: &[(&str, &str)] = &[(
    "Greenhouse Gas Emissions",
    "\"What is the estimated annual greenhouse gas emission in tons from building operations after \
     the proposed development?\" When answering, use this format:\n\
     Format: Greenhouse Gas Emissions With Action: [number]",
)];

const COMPONENT_UNITS: &[(&str, &str)] = &[
    ("Office Space", "SF"),
    ("Healthcare facilities", "SF"),
    ("Community Space", "SF"),
    ("Cultural Space", "SF"),
    ("Commercial Space", "GSF"),
    ("Building Total GSF", "SF"),
    ("Parking Space", "Spaces"),
    ("Market Rate Residential", "Units"),
    ("Affordable residential (low AMI - supportive)", "Units"),
    ("Affordable Residential (high AMI)", "Units"),
    ("Open Space Ratio", "Acre/Person"),
    ("Displacement Residential", "units"),
    ("Displacement Vacant", "SF"),
    ("Displacement Commercial", "Jobs"),
    ("Solid Waste Generation", "weekly tons"),
    ("Greenhouse Gas Emissions", "annual tons"),
];
