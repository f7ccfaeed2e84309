use super::gateway::is_reasoning_model;

const BASE_PROMPT: &str = "You are a friendly assistant! Keep your responses concise and helpful.";

const TOOL_GUIDANCE: &str = "When a request needs live data or document changes, call the \
matching tool instead of guessing. Wait for the tool result before answering.";

/// System prompt selected per model identity. Reasoning models get the base
/// prompt only; tool guidance would interfere with their extended thinking.
pub fn system_prompt(selected_chat_model: &str) -> String {
    if is_reasoning_model(selected_chat_model) {
        BASE_PROMPT.to_string()
    } else {
        format!("{}\n\n{}", BASE_PROMPT, TOOL_GUIDANCE)
    }
}

/// Prompt for the detached title-generation task.
pub fn title_prompt(first_user_message: &str) -> String {
    format!(
        "Generate a concise, descriptive title (maximum 6 words) for a conversation that starts \
with this message: \"{}\"\n\nRespond with only the title, no quotes or additional text.",
        first_user_message.chars().take(200).collect::<String>()
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reasoning_models_skip_tool_guidance() {
        assert!(!system_prompt("model-thinking").contains("tool"));
        assert!(system_prompt("google/gemini-1.5-flash").contains("tool"));
    }

    #[test]
    fn test_title_prompt_truncates_long_messages() {
        let long = "x".repeat(500);
        let prompt = title_prompt(&long);
        assert!(prompt.len() < 500);
    }
}
