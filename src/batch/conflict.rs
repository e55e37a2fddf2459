/// Message fragments the backend uses when the requested change is already
/// in place. Compared case-insensitively against the normalized message.
pub const CONFLICT_PATTERNS: &[&str] = &[
    "ya existe",
    "ya está inscrito",
    "ya esta inscrito",
    "ya inscrito",
    "duplicad",
    "already exists",
    "already enrolled",
    "already inactive",
    "duplicate",
];

const CONFLICT_STATUS: u16 = 400;

/// True when a failed mutation means "already satisfied" rather than an
/// error. This is the only place that inspects message text; swap it for a
/// structured error code once the backend sends one.
pub fn is_conflict(status: u16, message: &str) -> bool {
    if status != CONFLICT_STATUS {
        return false;
    }
    let lowered = message.to_lowercase();
    CONFLICT_PATTERNS.iter().any(|p| lowered.contains(p))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_fragments_case_insensitively() {
        assert!(is_conflict(400, "Student ALREADY ENROLLED in group"));
        assert!(is_conflict(400, "La inscripción ya existe"));
        assert!(is_conflict(400, "Registro duplicado | otro"));
    }

    #[test]
    fn other_statuses_never_conflict() {
        assert!(!is_conflict(409, "already exists"));
        assert!(!is_conflict(500, "duplicate key"));
    }

    #[test]
    fn unrelated_validation_messages_are_not_conflicts() {
        assert!(!is_conflict(400, "studentId must be a UUID"));
    }
}
