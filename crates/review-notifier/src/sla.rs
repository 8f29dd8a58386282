//! SLA percentage math and label rendering (§4.8).

/// `elapsed / allowed * 100`, or `None` when the repo has no SLA configured
/// for this state (`allowed_hours <= 0`).
#[must_use]
pub fn percent(elapsed_hours: f64, allowed_hours: i64) -> Option<f64> {
    if allowed_hours <= 0 {
        None
    } else {
        Some(elapsed_hours / allowed_hours as f64 * 100.0)
    }
}

/// `N/A`, `NN%`, `NN% ⚠️` (≥80), `NN% ❌` (exceeded), with ` ⏸` appended if
/// the MR is currently blocked.
#[must_use]
pub fn label(percent: Option<f64>, blocked: bool) -> String {
    let mut s = match percent {
        None => "N/A".to_string(),
        Some(p) if p > 100.0 => format!("{:.0}% \u{274c}", p),
        Some(p) if p >= 80.0 => format!("{:.0}% \u{26a0}\u{fe0f}", p),
        Some(p) => format!("{:.0}%", p),
    };
    if blocked {
        s.push_str(" \u{23f8}");
    }
    s
}

/// Sort key for descending-by-SLA-percentage ordering: `None` sorts last.
#[must_use]
pub fn sort_key(percent: Option<f64>) -> f64 {
    percent.unwrap_or(f64::NEG_INFINITY)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_allowance_is_not_applicable() {
        assert_eq!(percent(10.0, 0), None);
        assert_eq!(label(None, false), "N/A");
    }

    #[test]
    fn under_warning_threshold_is_plain_percent() {
        assert_eq!(label(Some(42.0), false), "42%");
    }

    #[test]
    fn at_or_above_eighty_warns() {
        assert_eq!(label(Some(80.0), false), "80% \u{26a0}\u{fe0f}");
    }

    #[test]
    fn over_hundred_is_exceeded() {
        assert_eq!(label(Some(133.0), false), "133% \u{274c}");
    }

    #[test]
    fn blocked_appends_pause_glyph() {
        assert_eq!(label(Some(10.0), true), "10% \u{23f8}");
        assert_eq!(label(None, true), "N/A \u{23f8}");
    }

    #[test]
    fn sort_key_places_none_last_descending() {
        let mut values = vec![None, Some(90.0), Some(10.0)];
        values.sort_by(|a, b| sort_key(*b).partial_cmp(&sort_key(*a)).unwrap());
        assert_eq!(values, vec![Some(90.0), Some(10.0), None]);
    }
}
