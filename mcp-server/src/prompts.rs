//! Prompt registry. The set is fixed at construction; content generation
//! beyond simple argument interpolation is out of scope.

use std::collections::HashMap;

use mcp_types::ContentBlock;
use mcp_types::GetPromptResult;
use mcp_types::Prompt;
use mcp_types::PromptArgument;
use mcp_types::PromptMessage;
use mcp_types::Role;
use mcp_types::TextContent;
use morfx_core::MorfxErr;

struct PromptEntry {
    prompt: Prompt,
    template: &'static str,
}

pub(crate) struct PromptRegistry {
    prompts: Vec<PromptEntry>,
}

impl PromptRegistry {
    pub(crate) fn builtin() -> Self {
        let prompts = vec![
            PromptEntry {
                prompt: Prompt {
                    name: "review-stage".to_string(),
                    title: Some("Review a staged transformation".to_string()),
                    description: Some(
                        "Walk through a pending stage's diff and decide whether to apply it"
                            .to_string(),
                    ),
                    arguments: Some(vec![PromptArgument {
                        name: "stage_id".to_string(),
                        description: Some("Id of the pending stage".to_string()),
                        required: Some(true),
                    }]),
                },
                template: "Review the staged transformation {stage_id}. Read its diff and \
                           confidence factors, then call the `apply` tool with this id if the \
                           change is sound, or explain why it is not.",
            },
            PromptEntry {
                prompt: Prompt {
                    name: "plan-transform".to_string(),
                    title: Some("Plan a structural transformation".to_string()),
                    description: Some(
                        "Turn an informal request into query and transform tool calls".to_string(),
                    ),
                    arguments: Some(vec![
                        PromptArgument {
                            name: "language".to_string(),
                            description: Some("Source language".to_string()),
                            required: Some(true),
                        },
                        PromptArgument {
                            name: "request".to_string(),
                            description: Some("What should change".to_string()),
                            required: Some(true),
                        },
                    ]),
                },
                template: "For {language} code, plan the minimal sequence of `query` and \
                           `transform` calls that implements: {request}. Prefer a query first to \
                           count matches.",
            },
        ];
        Self { prompts }
    }

    pub(crate) fn list(&self) -> Vec<Prompt> {
        self.prompts.iter().map(|e| e.prompt.clone()).collect()
    }

    pub(crate) fn get(
        &self,
        name: &str,
        arguments: Option<&HashMap<String, String>>,
    ) -> Result<GetPromptResult, MorfxErr> {
        let entry = self
            .prompts
            .iter()
            .find(|e| e.prompt.name == name)
            .ok_or_else(|| MorfxErr::InvalidParams(format!("unknown prompt: {name}")))?;

        let mut text = entry.template.to_string();
        if let Some(arguments) = arguments {
            for (key, value) in arguments {
                text = text.replace(&format!("{{{key}}}"), value);
            }
        }

        Ok(GetPromptResult {
            description: entry.prompt.description.clone(),
            messages: vec![PromptMessage {
                role: Role::User,
                content: ContentBlock::TextContent(TextContent::new(text)),
            }],
        })
    }
}
