use std::sync::LazyLock;

use regex::Regex;
use serde::Serialize;

use crate::patterns;

pub const INITIAL_UNDERSTANDING: f32 = 0.5;

const UNDERSTANDING_SMOOTHING: f32 = 0.3;

static HUMAN_HELP: LazyLock<Vec<Regex>> = LazyLock::new(|| {
	patterns::compile(&[
		r"(?i)\b(talk|speak|chat)\s+(to|with)\s+(a\s+|my\s+|an\s+)?(human|person|instructor|teacher|ta)\b|\breal\s+person\b|\bhuman\s+help\b|\bcontact\s+(my\s+|an\s+|the\s+)?instructor\b",
	])
});
static CONFUSION_MARKERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
	patterns::compile(&[
		r"(?i)\b(i\s+don'?t\s+(get|understand)|still\s+(confused|stuck|lost)|confused|makes\s+no\s+sense|doesn'?t\s+make\s+sense|no\s+idea|i'?m\s+lost)\b",
	])
});
static PROGRESS_MARKERS: LazyLock<Vec<Regex>> = LazyLock::new(|| {
	patterns::compile(&[
		r"(?i)\b(got\s+it|makes\s+sense|i\s+understand|that\s+(works|worked|helps|helped)|now\s+i\s+see|it\s+works)\b",
	])
});

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
#[serde(rename_all = "snake_case", tag = "reason")]
pub enum EscalationReason {
	HumanHelpRequested,
	PersistentConfusion { turns: u32, understanding: f32 },
}
impl EscalationReason {
	pub fn as_str(&self) -> &'static str {
		match self {
			Self::HumanHelpRequested => "human_help_requested",
			Self::PersistentConfusion { .. } => "persistent_confusion",
		}
	}

	pub fn offer_message(&self) -> &'static str {
		match self {
			Self::HumanHelpRequested =>
				"You can hand this conversation to an instructor at any time. Use \"Request instructor help\" and they will see this thread.",
			Self::PersistentConfusion { .. } =>
				"We've been at this for a while. If you'd like, an instructor can review this thread and help you directly. Use \"Request instructor help\" to send it to them.",
		}
	}
}

pub fn requests_human_help(message: &str) -> bool {
	patterns::any_match(&HUMAN_HELP, message)
}

/// Moves the tracked understanding level toward the signal carried by the learner's message.
/// Messages without confusion or progress markers leave it unchanged.
pub fn update_understanding(previous: f32, message: &str) -> f32 {
	let confused = patterns::any_match(&CONFUSION_MARKERS, message);
	let progressing = patterns::any_match(&PROGRESS_MARKERS, message);
	let signal = match (confused, progressing) {
		(true, false) => 0.0,
		(false, true) => 1.0,
		_ => return previous.clamp(0.0, 1.0),
	};

	(previous + UNDERSTANDING_SMOOTHING * (signal - previous)).clamp(0.0, 1.0)
}

/// `user_turns` counts learner messages in the thread, including the current one.
pub fn check_escalation(
	user_turns: u32,
	understanding: f32,
	message: &str,
	cfg: &intelli_config::Tutor,
) -> Option<EscalationReason> {
	if requests_human_help(message) {
		return Some(EscalationReason::HumanHelpRequested);
	}
	if user_turns > cfg.escalation_turn_threshold
		&& understanding < cfg.low_understanding_threshold
	{
		return Some(EscalationReason::PersistentConfusion { turns: user_turns, understanding });
	}

	None
}
