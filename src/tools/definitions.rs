use std::fmt;
use std::str::FromStr;

use serde_json::json;

use crate::core::errors::ApiError;
use crate::llm::ToolSpec;

/// The fixed tool registry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ToolName {
    SearchDocuments,
    GenerateQuiz,
    CreateStudyGuide,
    GenerateVisualization,
    GenerateFlashcards,
}

impl ToolName {
    pub const ALL: [ToolName; 5] = [
        ToolName::SearchDocuments,
        ToolName::GenerateQuiz,
        ToolName::CreateStudyGuide,
        ToolName::GenerateVisualization,
        ToolName::GenerateFlashcards,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            ToolName::SearchDocuments => "search_documents",
            ToolName::GenerateQuiz => "generate_quiz",
            ToolName::CreateStudyGuide => "create_study_guide",
            ToolName::GenerateVisualization => "generate_visualization",
            ToolName::GenerateFlashcards => "generate_flashcards",
        }
    }

    /// Generation tools return an instruction + context payload.
    pub fn is_generation(self) -> bool {
        !matches!(self, ToolName::SearchDocuments)
    }
}

impl fmt::Display for ToolName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ToolName {
    type Err = ApiError;

    fn from_str(name: &str) -> Result<Self, Self::Err> {
        ToolName::ALL
            .into_iter()
            .find(|tool| tool.as_str() == name)
            .ok_or_else(|| ApiError::UnknownTool(name.to_string()))
    }
}

pub fn tool_definitions() -> Vec<ToolSpec> {
    ToolName::ALL.into_iter().map(definition).collect()
}

pub fn definition(tool: ToolName) -> ToolSpec {
    let (description, parameters) = match tool {
        ToolName::SearchDocuments => (
            "Search the user's uploaded documents for information relevant to a query. Use this to find specific facts, passages, or data from the documents.",
            json!({
                "type": "object",
                "properties": {
                    "query": {
                        "type": "string",
                        "description": "The search query to find relevant document passages"
                    },
                    "n_results": {
                        "type": "integer",
                        "description": "Number of results to return (default 5, max 12)",
                        "default": 5
                    }
                },
                "required": ["query"]
            }),
        ),
        ToolName::GenerateQuiz => (
            "Generate a quiz with multiple-choice questions based on document content. Returns a structured quiz artifact.",
            json!({
                "type": "object",
                "properties": {
                    "topic": {
                        "type": "string",
                        "description": "The topic or section to generate quiz questions about"
                    },
                    "num_questions": {
                        "type": "integer",
                        "description": "Number of questions to generate (default 5)",
                        "default": 5
                    }
                },
                "required": ["topic"]
            }),
        ),
        ToolName::CreateStudyGuide => (
            "Create a structured study guide from the document content. Returns a study guide artifact with sections, key points, and review questions.",
            json!({
                "type": "object",
                "properties": {
                    "topic": {
                        "type": "string",
                        "description": "The topic or focus area for the study guide"
                    },
                    "depth": {
                        "type": "string",
                        "enum": ["brief", "standard", "comprehensive"],
                        "description": "Level of detail (default: standard)",
                        "default": "standard"
                    }
                },
                "required": ["topic"]
            }),
        ),
        ToolName::GenerateVisualization => (
            "Generate a visual representation of concepts. Supports Mermaid diagrams, tables, and structured data. Returns a visualization artifact.",
            json!({
                "type": "object",
                "properties": {
                    "description": {
                        "type": "string",
                        "description": "What to visualize (e.g., 'flowchart of the process', 'comparison table of methods')"
                    },
                    "type": {
                        "type": "string",
                        "enum": ["mermaid", "table", "code"],
                        "description": "Visualization type",
                        "default": "mermaid"
                    }
                },
                "required": ["description"]
            }),
        ),
        ToolName::GenerateFlashcards => (
            "Generate flashcards for spaced repetition study. Creates question-answer pairs based on document content. Returns a flashcard artifact.",
            json!({
                "type": "object",
                "properties": {
                    "topic": {
                        "type": "string",
                        "description": "The topic or section to create flashcards about"
                    },
                    "num_cards": {
                        "type": "integer",
                        "description": "Number of flashcards to generate (default 10, max 20)",
                        "default": 10
                    },
                    "card_type": {
                        "type": "string",
                        "enum": ["definition", "concept", "fact", "mixed"],
                        "description": "Type of flashcards to generate (default: mixed)",
                        "default": "mixed"
                    }
                },
                "required": ["topic"]
            }),
        ),
    };

    ToolSpec {
        name: tool.as_str().to_string(),
        description: description.to_string(),
        parameters,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn names_round_trip_and_unknown_is_typed() {
        for tool in ToolName::ALL {
            assert_eq!(tool.as_str().parse::<ToolName>().unwrap(), tool);
        }
        assert!(matches!(
            "delete_everything".parse::<ToolName>(),
            Err(ApiError::UnknownTool(_))
        ));
    }

    #[test]
    fn every_definition_requires_its_primary_argument() {
        let specs = tool_definitions();
        assert_eq!(specs.len(), 5);

        let required: Vec<&str> = specs
            .iter()
            .map(|spec| spec.parameters["required"][0].as_str().unwrap())
            .collect();
        assert_eq!(required, vec!["query", "topic", "topic", "description", "topic"]);
    }
}
