//! Prompt rendering for each workflow.

use std::fmt::Write as _;

use crate::transcript::{ChatTurn, Role};
use crate::{ChatContext, ItemRequest, SubmissionRequest};

/// Turns of history rendered into a chat prompt.
pub const CHAT_PROMPT_TURNS: usize = 5;

pub fn question_batch(request: &ItemRequest) -> String {
    let topic = request.topic.as_deref().unwrap_or("programming");
    let language = request.language.as_deref().unwrap_or("general");
    let difficulty = request.difficulty.as_str();
    format!(
        "Write {quantity} multiple-choice questions about {topic} using real {language} syntax.\n\
         Difficulty: {difficulty}. Avoid generic or pseudocode questions.\n\
         Reply with JSON only, in this shape:\n\
         {{\"questions\": [{{\"text\": \"...\", \"difficulty\": \"{difficulty}\", \
         \"options\": [{{\"text\": \"...\", \"is_correct\": true, \"explanation\": \"...\"}}, \
         three more options with \"is_correct\": false], \
         \"correct_feedback\": \"...\", \"incorrect_feedback\": \"...\", \"key_concept\": \"{topic}\"}}]}}\n\
         Every question has exactly 4 options and exactly 1 correct option.",
        quantity = request.quantity,
    )
}

pub fn submission_review(request: &SubmissionRequest) -> String {
    let language = request.language.as_deref().unwrap_or("");
    let statement = request.statement.as_deref().unwrap_or("Not specified");
    let tests = serde_json::to_string_pretty(&request.test_cases).unwrap_or_else(|_| "[]".into());
    format!(
        "Review the student's code and give constructive, educational feedback.\n\n\
         Code:\n```{language}\n{code}\n```\n\n\
         Exercise statement:\n{statement}\n\n\
         Test cases:\n{tests}\n\n\
         Reply with JSON only:\n\
         {{\"verdict\": \"correct\" | \"incorrect\" | \"error\", \"issues\": [\"...\"], \
         \"tests_passed\": <number>, \"tests_total\": {total}, \
         \"feedback\": \"step by step explanation\", \"suggestions\": [\"...\"]}}",
        code = request.code,
        total = request.test_cases.len(),
    )
}

pub fn chat(message: &str, history: &[ChatTurn], context: Option<&ChatContext>) -> String {
    let mut prompt = String::from(
        "You are a friendly programming tutor. Guide the student with questions and hints \
         rather than full solutions.\n",
    );
    if let Some(context) = context {
        let _ = write!(
            prompt,
            "\nContext:\n- Topic: {}\n- Subtopic: {}\n",
            context.topic.as_deref().unwrap_or("Not specified"),
            context.subtopic.as_deref().unwrap_or("Not specified"),
        );
    }
    prompt.push_str("\nConversation:\n");
    let skip = history.len().saturating_sub(CHAT_PROMPT_TURNS);
    for turn in &history[skip..] {
        let speaker = match turn.role {
            Role::User => "Student",
            Role::Assistant => "Tutor",
        };
        let _ = writeln!(prompt, "{speaker}: {}", turn.content);
    }
    let _ = write!(prompt, "\nCurrent message:\n{message}\n");
    prompt
}

/// Follow-up prompts offered next to a chat reply, at most three.
pub fn suggestions(context: Option<&ChatContext>) -> Vec<String> {
    let mut suggestions = Vec::new();
    if let Some(topic) = context.and_then(|context| context.topic.as_deref()) {
        suggestions.push(format!("Can you explain more about {topic}?"));
    }
    if let Some(subtopic) = context.and_then(|context| context.subtopic.as_deref()) {
        suggestions.push(format!("Show me an example of {subtopic}"));
    }
    if suggestions.is_empty() {
        suggestions.push("Which topics can I study?".into());
        suggestions.push("Give me a practical example".into());
    }
    suggestions.truncate(3);
    suggestions
}
