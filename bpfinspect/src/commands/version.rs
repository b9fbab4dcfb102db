pub const VERSION: &str = env!("CARGO_PKG_VERSION");

/// Set at build time, e.g. `BPFINSPECT_GIT_COMMIT=$(git rev-parse --short HEAD)`.
const GIT_COMMIT: Option<&str> = option_env!("BPFINSPECT_GIT_COMMIT");
const BUILD_DATE: Option<&str> = option_env!("BPFINSPECT_BUILD_DATE");

pub fn version() -> String {
    render(GIT_COMMIT, BUILD_DATE)
}

fn render(commit: Option<&str>, date: Option<&str>) -> String {
    let mut out = format!("bpfinspect version {VERSION}");
    if let Some(commit) = commit.filter(|c| !c.is_empty()) {
        out.push_str(&format!("\n  git commit: {commit}"));
    }
    if let Some(date) = date.filter(|d| !d.is_empty()) {
        out.push_str(&format!("\n  build date: {date}"));
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn optional_build_details() {
        assert_eq!(render(None, None), format!("bpfinspect version {VERSION}"));
        assert_eq!(
            render(Some("abc123"), Some("")),
            format!("bpfinspect version {VERSION}\n  git commit: abc123")
        );
        assert!(render(None, Some("2025-01-01")).ends_with("build date: 2025-01-01"));
    }
}
