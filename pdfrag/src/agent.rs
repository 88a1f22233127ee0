//! Typed configuration of the PDF assistant.
//!
//! The language model, the conversation store and the chat front end live
//! outside this crate. What they need from us is an [`AssistantProfile`]:
//! who the assistant is, what it is told to do, which capabilities are
//! switched on and where its sessions are kept.

use serde::{Deserialize, Serialize};

use crate::config::Settings;
use crate::tool::TOOL_NAME;

/// Instruction text of the PDF assistant, one instruction per line.
const PDF_ASSISTANT_INSTRUCTIONS: &str = include_str!("../assets/pdf_assistant_instructions.txt");

const PDF_ASSISTANT_NAME: &str = "PDF Document Assistant";

const PDF_ASSISTANT_DESCRIPTION: &str = "You are a helpful PDF Document Assistant. Your goal is \
    to extract and provide information from the PDF documents in your knowledge base. Always \
    cite your sources and provide direct references to the documents you're pulling \
    information from.";

/// Behaviour switches of the assistant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Capabilities {
    /// Expose the knowledge search tool.
    pub search_knowledge: bool,
    /// Format replies as markdown.
    pub markdown: bool,
    /// Show tool calls in the chat transcript.
    pub show_tool_calls: bool,
    /// Let the assistant read earlier turns of the conversation.
    pub read_chat_history: bool,
}

/// Where conversations are persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionStorage {
    /// Table name.
    pub table_name: String,
    /// Database file.
    pub db_file: String,
}

/// Everything the agent runtime needs to host the assistant.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssistantProfile {
    /// Display name.
    pub name: String,
    /// Language model name.
    pub llm_model: String,
    /// Persona description, sent first in the system prompt.
    pub description: String,
    /// Instructions, in order.
    pub instructions: Vec<String>,
    /// Enabled capabilities.
    pub capabilities: Capabilities,
    /// Session persistence.
    pub storage: SessionStorage,
}

impl AssistantProfile {
    /// The PDF document assistant: always searches the knowledge base, cites
    /// document and page, and says so when the documents hold no answer.
    pub fn pdf_assistant(llm_model: impl Into<String>) -> Self {
        Self {
            name: PDF_ASSISTANT_NAME.to_string(),
            llm_model: llm_model.into(),
            description: PDF_ASSISTANT_DESCRIPTION.to_string(),
            instructions: PDF_ASSISTANT_INSTRUCTIONS
                .lines()
                .filter(|l| !l.trim().is_empty())
                .map(str::to_string)
                .collect(),
            capabilities: Capabilities {
                search_knowledge: true,
                markdown: true,
                show_tool_calls: true,
                read_chat_history: true,
            },
            storage: SessionStorage {
                table_name: "pdf_rag".to_string(),
                db_file: "pdf_rag_agent.db".to_string(),
            },
        }
    }

    /// The PDF assistant with model and storage taken from `settings`.
    pub fn from_settings(settings: &Settings) -> Self {
        let mut profile = Self::pdf_assistant(settings.llm_model.clone());
        profile.storage = SessionStorage {
            table_name: settings.session_table.clone(),
            db_file: settings.session_db.clone(),
        };
        profile
    }

    /// Names of the tools the runtime must register.
    pub fn tools(&self) -> Vec<&'static str> {
        let mut tools = Vec::new();
        if self.capabilities.search_knowledge {
            tools.push(TOOL_NAME);
        }
        if self.capabilities.read_chat_history {
            tools.push("get_chat_history");
        }
        tools
    }

    /// Description followed by the instructions, as sent to the model.
    pub fn system_prompt(&self) -> String {
        let mut prompt = self.description.clone();
        if !self.instructions.is_empty() {
            prompt.push_str("\n\n## Instructions\n");
            for line in &self.instructions {
                prompt.push_str(line);
                prompt.push('\n');
            }
        }
        if self.capabilities.markdown {
            prompt.push_str("\nUse markdown to format your answers.\n");
        }
        prompt
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::retrieval::INSUFFICIENT_INFORMATION;

    #[test]
    fn pdf_assistant_carries_the_full_policy() {
        let profile = AssistantProfile::pdf_assistant("llama3.1");
        assert_eq!(profile.name, "PDF Document Assistant");
        assert_eq!(profile.llm_model, "llama3.1");
        assert_eq!(profile.instructions.len(), 25);
        assert_eq!(profile.instructions[0], "1. PDF Knowledge Retrieval:");
        assert!(profile.instructions.iter().any(|l| l.contains(INSUFFICIENT_INFORMATION)));
        assert_eq!(profile.storage.table_name, "pdf_rag");
    }

    #[test]
    fn system_prompt_starts_with_description() {
        let prompt = AssistantProfile::pdf_assistant("llama3.1").system_prompt();
        assert!(prompt.starts_with("You are a helpful PDF Document Assistant."));
        assert!(prompt.contains("search_knowledge_base"));
        assert!(prompt.contains("markdown"));
    }

    #[test]
    fn tools_follow_capabilities() {
        let mut profile = AssistantProfile::pdf_assistant("m");
        assert_eq!(profile.tools(), ["search_knowledge_base", "get_chat_history"]);
        profile.capabilities.read_chat_history = false;
        assert_eq!(profile.tools(), ["search_knowledge_base"]);
    }
}
