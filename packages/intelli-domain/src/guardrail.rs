use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::patterns::{any_match, compile};

pub const HINTS_ONLY_RESPONSE: &str = "I started to write out a full solution, which would skip the part where you learn it. Let's work through it in steps instead:\n\n1. Restate what the code needs to do in one sentence.\n2. List the inputs and outputs, and which sensor or actuator each one talks to.\n3. Sketch the smallest piece you can test on its own, then tell me what you expect it to do.\n\nShare your attempt at step 3 and I'll give you targeted hints on it.";

/// Instructions prepended to every generation so the model coaches instead of solving.
pub const TUTOR_SYSTEM_PROMPT: &str = "You are the IntelliStack robotics tutor. Teach with the Socratic method: ask guiding questions, explain concepts, and give hints or short illustrative snippets, but never hand over a complete solution or finished code for an exercise. Ground your answers in the course passages provided and cite them as [stage, title]. If the passages do not cover the question, say so.";

static DIRECT_ANSWER_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
	compile(&[
		r"(?i)\b(give|tell|show)\s+me\s+the\s+(answer|solution)s?\b",
		r"(?i)\bwhat\s*(is|'s)\s+the\s+(correct\s+)?answer\b",
		r"(?i)\bjust\s+(the\s+)?answer\b",
	])
});
static DO_IT_FOR_ME_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
	compile(&[
		r"(?i)\b(do|solve|finish|complete)\s+(it|this|that|my\s+\w+)\s+for\s+me\b",
		r"(?i)\bwrite\s+(the|my|this|all\s+the)\s+(code|program|assignment|homework)\s+for\s+me\b",
		r"(?i)\bdo\s+my\s+(homework|assignment|lab)\b",
	])
});
static COMPLETE_SOLUTION_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
	compile(&[
		r"(?i)\b(send|give|write|need)\s+(me\s+)?the\s+(full|complete|entire|whole)\s+(code|solution|program|implementation)\b",
	])
});
static SOLUTION_PHRASE_PATTERNS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
	compile(&[
		r"(?i)here\s*(is|'s|\x{2019}s)\s+(the\s+|your\s+|a\s+)?(complete|full|entire|finished|final|working)\s+(code|solution|implementation|program)",
		r"(?i)here\s*(is|'s|\x{2019}s)\s+your\s+solution",
	])
});

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum AnswerRequestIntent {
	DirectAnswer,
	DoItForMe,
	CompleteSolution,
}
impl AnswerRequestIntent {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::DirectAnswer => "direct_answer",
			Self::DoItForMe => "do_it_for_me",
			Self::CompleteSolution => "complete_solution",
		}
	}

	pub fn redirect_message(self) -> &'static str {
		match self {
			Self::DirectAnswer =>
				"I could hand you the answer, but you'll remember it far better if you reach it yourself. Let's start here: what do you already know about the problem, and where exactly do you get stuck? Tell me your current idea, even if you're unsure, and we'll build on it together.",
			Self::DoItForMe =>
				"I can't do the work for you, but I can help you do it. Let's break it into smaller steps. What is the first thing the solution needs to accomplish, and what have you tried so far for that step?",
			Self::CompleteSolution =>
				"Rather than a complete solution, let's build yours piece by piece. Which part are you most unsure about: the overall structure, a specific algorithm, or how to wire it to the hardware? Pick one and show me what you have.",
		}
	}
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SolutionLeak {
	SolutionPhrase,
	LongCodeBlock { lines: usize },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum GuardrailKind {
	SocraticRedirect,
	SolutionBlocked,
	Escalation,
}
impl GuardrailKind {
	pub fn as_str(self) -> &'static str {
		match self {
			Self::SocraticRedirect => "socratic_redirect",
			Self::SolutionBlocked => "solution_blocked",
			Self::Escalation => "escalation",
		}
	}
}

/// Pre-generation check on the learner's message.
pub fn detect_answer_request(message: &str) -> Option<AnswerRequestIntent> {
	if any_match(&DO_IT_FOR_ME_PATTERNS, message) {
		return Some(AnswerRequestIntent::DoItForMe);
	}
	if any_match(&COMPLETE_SOLUTION_PATTERNS, message) {
		return Some(AnswerRequestIntent::CompleteSolution);
	}
	if any_match(&DIRECT_ANSWER_PATTERNS, message) {
		return Some(AnswerRequestIntent::DirectAnswer);
	}

	None
}

/// Post-generation check on the accumulated model response.
pub fn detect_solution_leak(response: &str, max_code_lines: usize) -> Option<SolutionLeak> {
	if any_match(&SOLUTION_PHRASE_PATTERNS, response) {
		return Some(SolutionLeak::SolutionPhrase);
	}

	let longest = longest_code_block(response);

	if longest > max_code_lines {
		return Some(SolutionLeak::LongCodeBlock { lines: longest });
	}

	None
}

/// Counts non-empty lines inside fenced blocks. An unterminated fence runs to the end.
pub fn longest_code_block(text: &str) -> usize {
	let mut longest = 0;
	let mut current: Option<usize> = None;

	for line in text.lines() {
		if line.trim_start().starts_with("```") {
			current = match current {
				Some(lines) => {
					longest = longest.max(lines);

					None
				},
				None => Some(0),
			};

			continue;
		}
		if let Some(lines) = current.as_mut()
			&& !line.trim().is_empty()
		{
			*lines += 1;
		}
	}

	longest.max(current.unwrap_or(0))
}
