use serde::{Deserialize, Serialize};

/// Identifies the function that handled a message: a command handler, a
/// projection, a saga step.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FunctionInfo {
    pub processor_name: String,
    pub function_name: String,
}

impl FunctionInfo {
    pub fn new(processor_name: impl Into<String>, function_name: impl Into<String>) -> Self {
        Self {
            processor_name: processor_name.into(),
            function_name: function_name.into(),
        }
    }
}

impl std::fmt::Display for FunctionInfo {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}", self.processor_name, self.function_name)
    }
}
