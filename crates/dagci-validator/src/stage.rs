//! Validation stage definitions.

use serde::{Deserialize, Serialize};
use std::fmt;

/// The fixed validation stages, in execution order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum Stage {
    /// Each changed file compiles in isolation.
    Syntax,

    /// The whole task-definition folder loads without import errors.
    Imports,

    /// Each changed file defines a graph with no dependency cycle.
    Structure,
}

impl Stage {
    /// All stages in execution order.
    pub const ALL: [Stage; 3] = [Stage::Syntax, Stage::Imports, Stage::Structure];

    /// Get the stage name as used in report keys.
    pub fn name(&self) -> &'static str {
        match self {
            Stage::Syntax => "syntax",
            Stage::Imports => "imports",
            Stage::Structure => "structure",
        }
    }

    /// Report message when this stage has failures.
    pub fn failure_message(&self) -> &'static str {
        match self {
            Stage::Syntax => "Syntax validation failed",
            Stage::Imports => "Import validation failed",
            Stage::Structure => "Structure validation failed",
        }
    }
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stage_names() {
        assert_eq!(Stage::Syntax.name(), "syntax");
        assert_eq!(Stage::Imports.name(), "imports");
        assert_eq!(Stage::Structure.name(), "structure");
    }

    #[test]
    fn test_stage_order_is_fixed() {
        assert_eq!(
            Stage::ALL,
            [Stage::Syntax, Stage::Imports, Stage::Structure]
        );
        assert!(Stage::Syntax < Stage::Imports);
        assert!(Stage::Imports < Stage::Structure);
    }

    #[test]
    fn test_stage_serializes_as_name() {
        let json = serde_json::to_string(&Stage::Structure).unwrap();
        assert_eq!(json, "\"structure\"");
    }
}
