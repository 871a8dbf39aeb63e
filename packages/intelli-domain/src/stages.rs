use intelli_config::STAGE_CEILING;

/// Stages are unlocked strictly in order, so access is the closed range `1..=current_stage`.
/// Stage 1 is always readable, even for accounts that have not started the curriculum.
/// The range never extends past [`STAGE_CEILING`].
pub fn accessible_stage_ids(current_stage: i32) -> Vec<i32> {
	(1..=current_stage.clamp(1, STAGE_CEILING)).collect()
}

/// Whether `current_stage` is a stage a learner can actually report.
pub fn is_valid_current_stage(current_stage: i32, max_stage: i32) -> bool {
	(1..=max_stage.min(STAGE_CEILING)).contains(&current_stage)
}

pub fn is_stage_accessible(stage_id: i32, current_stage: i32) -> bool {
	stage_id >= 1 && stage_id <= current_stage.max(1)
}
