//! Prompt assembly for generation requests.

use crate::stage::Stage;

/// Everything the worker needs to generate one unit.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Name of the unit being generated.
    pub unit_name: String,
    /// The unit's description of intent.
    pub description: String,
    /// The unit's current signature, if designed.
    pub definition: String,
    /// The unit's current body, if written.
    pub content: String,
    /// The run's user instruction.
    pub instruction: String,
    /// Sibling context: briefs or bodies of the other units.
    pub siblings: Vec<String>,
    /// Which operation this generation is for.
    pub stage: Stage,
    /// Error or feedback text from a failed prior attempt, if any.
    pub amendment: Option<String>,
}

/// Builds the text sent to the generator. The construction of good prompt
/// wording is a collaborator concern; the pipeline only requires that the
/// unit, its context, and any amendment appear in the payload.
pub trait PromptBuilder: Send + Sync {
    /// Render the request into a prompt.
    fn build(&self, request: &GenerationRequest) -> String;
}

/// Default template-based builder.
#[derive(Debug, Default)]
pub struct TemplatePromptBuilder;

impl TemplatePromptBuilder {
    /// Create a builder.
    pub fn new() -> Self {
        Self
    }

    fn task_line(stage: Stage) -> &'static str {
        match stage {
            Stage::Design => {
                "Design the signature of the following function. Respond with a single \
                 Python function whose body is `pass`, inside one ```python code block."
            }
            Stage::Write => {
                "Write the full body of the following function. Respond with exactly one \
                 Python function inside one ```python code block."
            }
            Stage::Review => {
                "Review the following function and rewrite it if needed. Respond with \
                 exactly one Python function inside one ```python code block."
            }
            Stage::Check => {
                "Fix the reported error in the following function. Respond with exactly \
                 one Python function inside one ```python code block."
            }
        }
    }
}

impl PromptBuilder for TemplatePromptBuilder {
    fn build(&self, request: &GenerationRequest) -> String {
        let mut prompt = String::new();
        prompt.push_str(Self::task_line(request.stage));
        prompt.push_str("\n\nUser instruction: ");
        prompt.push_str(&request.instruction);
        prompt.push_str(&format!(
            "\n\nFunction: {}\nDescription: {}\n",
            request.unit_name, request.description
        ));
        if !request.definition.is_empty() {
            prompt.push_str(&format!("Signature:\n{}\n", request.definition));
        }
        if !request.content.is_empty() {
            prompt.push_str(&format!("Current body:\n```python\n{}\n```\n", request.content));
        }
        if !request.siblings.is_empty() {
            prompt.push_str("\nOther functions in this program:\n");
            for sibling in &request.siblings {
                prompt.push_str(sibling);
                prompt.push_str("\n\n");
            }
        }
        if let Some(amendment) = &request.amendment {
            prompt.push_str("\nYour previous attempt had a problem that must be fixed:\n");
            prompt.push_str(amendment);
            prompt.push('\n');
        }
        prompt
    }
}
