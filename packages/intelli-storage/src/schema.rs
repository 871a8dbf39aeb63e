pub fn render_schema() -> String {
	expand_includes(include_str!("../../../sql/init.sql"))
}

fn expand_includes(sql: &str) -> String {
	let mut out = String::new();

	for line in sql.lines() {
		let trimmed = line.trim();

		if let Some(path) = trimmed.strip_prefix("\\ir ") {
			match path.trim() {
				"tables/001_conversation_threads.sql" =>
					out.push_str(include_str!("../../../sql/tables/001_conversation_threads.sql")),
				"tables/002_thread_items.sql" =>
					out.push_str(include_str!("../../../sql/tables/002_thread_items.sql")),
				"tables/003_rate_limits.sql" =>
					out.push_str(include_str!("../../../sql/tables/003_rate_limits.sql")),
				"tables/004_tutor_usage_daily.sql" =>
					out.push_str(include_str!("../../../sql/tables/004_tutor_usage_daily.sql")),
				"tables/005_guardrail_events.sql" =>
					out.push_str(include_str!("../../../sql/tables/005_guardrail_events.sql")),
				"tables/006_content_index_state.sql" =>
					out.push_str(include_str!("../../../sql/tables/006_content_index_state.sql")),
				_ => out.push_str(line),
			}
		} else if !trimmed.starts_with("--") {
			out.push_str(line);
		}

		out.push('\n');
	}

	out
}
