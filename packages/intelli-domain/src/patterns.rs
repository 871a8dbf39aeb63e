use regex::Regex;

/// Patterns are literals in this crate; one that fails to compile is dropped rather than
/// taking the request path down.
pub(crate) fn compile(patterns: &[&str]) -> Vec<Regex> {
	patterns.iter().filter_map(|pattern| Regex::new(pattern).ok()).collect()
}

pub(crate) fn any_match(patterns: &[Regex], text: &str) -> bool {
	patterns.iter().any(|re| re.is_match(text))
}
