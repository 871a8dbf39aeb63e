use unicode_segmentation::UnicodeSegmentation;

const ELLIPSIS: &str = "...";
// Longest first so "how do i" wins over "how".
const QUESTION_PREFIXES: [&str; 14] = [
	"could you please",
	"can you please",
	"how do i",
	"how can i",
	"how should i",
	"what are",
	"what is",
	"what's",
	"can you",
	"could you",
	"help me",
	"explain",
	"please",
	"how to",
];

/// Derives a thread title from the first user message.
pub fn derive_title(message: &str, max_chars: usize, default_title: &str) -> String {
	let stripped = strip_question_prefix(message.trim());
	let truncated = truncate_graphemes(stripped, max_chars);
	let title = capitalize_first(&truncated);

	if title.is_empty() { default_title.to_string() } else { title }
}

fn strip_question_prefix(text: &str) -> &str {
	let lowered = text.to_lowercase();

	// Lowercasing can change byte lengths outside ASCII; only strip when offsets line up.
	if lowered.len() != text.len() {
		return text;
	}

	for prefix in QUESTION_PREFIXES {
		if !lowered.starts_with(prefix) {
			continue;
		}

		let rest = &text[prefix.len()..];
		let at_word_boundary =
			rest.chars().next().map(|ch| ch.is_whitespace() || ch.is_ascii_punctuation()).unwrap_or(true);

		if at_word_boundary {
			return rest.trim_start_matches(|ch: char| ch.is_whitespace() || ch == ',' || ch == ':');
		}
	}

	text
}

fn truncate_graphemes(text: &str, max_chars: usize) -> String {
	let graphemes: Vec<&str> = text.graphemes(true).collect();

	if graphemes.len() <= max_chars {
		return text.to_string();
	}

	let keep = max_chars.saturating_sub(ELLIPSIS.len());
	let head: String = graphemes[..keep].concat();

	format!("{}{ELLIPSIS}", head.trim_end())
}

fn capitalize_first(text: &str) -> String {
	let mut chars = text.chars();

	match chars.next() {
		Some(first) => first.to_uppercase().chain(chars).collect(),
		None => String::new(),
	}
}
