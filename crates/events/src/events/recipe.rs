use serde::{Deserialize, Serialize};

/// Recipe lookup and evaluation events
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum RecipeEvent {
    /// Recipe source located in a back-end
    Located { name: String, backend: String },

    /// Recipe evaluated and identified
    Loaded { name: String, id: String },

    /// Sums recorded for a recipe's inputs
    SumsRecorded { name: String, count: usize },
}
