use chrono::Utc;
use std::path::{Path, PathBuf};

/// Directory for one iteration's save files, stamped with the run time.
pub fn save_slot_dir(base: &Path, scenario: &str, seed: u64) -> PathBuf {
    let ts = Utc::now().format("%Y%m%dT%H%M%S%f");
    base.join(scenario).join(format!("seed-{seed}")).join(ts.to_string())
}

pub fn split_csv(s: &str) -> Vec<String> {
    s.split(',')
        .map(|x| x.trim().to_string())
        .filter(|x| !x.is_empty())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn split_csv_trims_and_filters() {
        let parts = split_csv(" alpha, ,beta,  gamma ");
        assert_eq!(parts, vec!["alpha", "beta", "gamma"]);
    }

    #[test]
    fn save_slot_dir_includes_key_segments() {
        let dir = save_slot_dir(Path::new("target/saves"), "smoke", 42);
        let text = dir.to_string_lossy();
        assert!(text.contains("smoke"));
        assert!(text.contains("seed-42"));
        assert!(dir.starts_with("target/saves/smoke"));
    }
}
