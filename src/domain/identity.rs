//! Controller identity matching.

/// Device names recognized as Wii remote controllers, as reported over
/// inquiry. The `-TR` form is the later hardware revision. This table is
/// versioned with the crate; it is not user-configurable.
pub const CONTROLLER_NAMES: &[&str] = &["Nintendo RVL-CNT-01", "Nintendo RVL-CNT-01-TR"];

/// Exact, case-sensitive match against the known controller names.
pub fn is_controller_device(name: &str) -> bool {
    CONTROLLER_NAMES.iter().any(|known| *known == name)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn matches_known_names_exactly() {
        assert!(is_controller_device("Nintendo RVL-CNT-01"));
        assert!(is_controller_device("Nintendo RVL-CNT-01-TR"));
    }

    #[test]
    fn rejects_case_variants() {
        assert!(!is_controller_device("nintendo rvl-cnt-01"));
        assert!(!is_controller_device("NINTENDO RVL-CNT-01"));
    }

    #[test]
    fn rejects_near_misses() {
        assert!(!is_controller_device("Nintendo RVL-CNT-02"));
        assert!(!is_controller_device("Nintendo RVL-CNT-01 "));
        assert!(!is_controller_device(" Nintendo RVL-CNT-01"));
        assert!(!is_controller_device("Nintendo RVL-CNT-0"));
        assert!(!is_controller_device("RVL-CNT-01"));
        assert!(!is_controller_device(""));
    }
}
