//! `tabmux recordings`: list, show and delete saved recordings.

use std::path::PathBuf;
use std::time::SystemTime;

use anyhow::{Context, Result};
use tabmux_client::{FsRecordingStore, PlaybackEngine, RecordingStore};

use crate::config::Config;

/// Open the recordings store, defaulting to `<data-dir>/tabmux/recordings`.
pub fn open_store(dir: Option<PathBuf>) -> Result<FsRecordingStore> {
    match dir {
        Some(dir) => Ok(FsRecordingStore::new(dir)),
        None => FsRecordingStore::default_location().context("failed to locate recordings directory"),
    }
}

pub fn store(cfg: &Config) -> Result<FsRecordingStore> {
    open_store(cfg.recordings_dir())
}

/// List one tab's recordings, or every tab that has some.
pub fn run_list(store: &FsRecordingStore, tab: Option<&str>) -> Result<()> {
    let tabs = match tab {
        Some(tab) => vec![tab.to_string()],
        None => store.tabs().context("failed to list tabs")?,
    };

    println!("{:<16} {:<28} {:>10} {}", "TAB", "NAME", "SIZE", "MODIFIED");
    println!("{:<16} {:<28} {:>10} {}", "───", "────", "────", "────────");

    let mut total = 0;
    for tab in &tabs {
        let recordings = store
            .list(tab)
            .with_context(|| format!("failed to list recordings of '{tab}'"))?;
        for rec in &recordings {
            println!(
                "{:<16} {:<28} {:>10} {}",
                tab,
                rec.name,
                rec.size,
                age(rec.modified)
            );
        }
        total += recordings.len();
    }

    if total == 0 {
        println!("(no recordings)");
    } else {
        println!("\n{total} recording(s) found.");
    }
    Ok(())
}

/// Print a recording's summary and its final screen.
pub fn run_show(store: &FsRecordingStore, tab: &str, name: &str) -> Result<()> {
    let text = store
        .load(tab, name)
        .with_context(|| format!("failed to load '{name}'"))?;
    let mut engine = PlaybackEngine::from_cast_text(&text)
        .with_context(|| format!("recording '{name}' is malformed"))?;
    let geometry = engine.geometry();
    println!(
        "{name}: {} event(s), {:.1}s, {}x{}",
        engine.events().len(),
        engine.duration(),
        geometry.cols,
        geometry.rows
    );
    engine.seek_to(engine.duration());
    println!("{}", engine.buffer().text());
    Ok(())
}

pub fn run_delete(store: &mut FsRecordingStore, tab: &str, name: &str) -> Result<()> {
    store
        .delete(tab, name)
        .with_context(|| format!("failed to delete '{name}'"))?;
    println!("Deleted recording '{name}' of tab '{tab}'.");
    Ok(())
}

/// Coarse "how long ago" for listings.
fn age(modified: SystemTime) -> String {
    let secs = SystemTime::now()
        .duration_since(modified)
        .map(|d| d.as_secs())
        .unwrap_or(0);
    match secs {
        0..=59 => format!("{secs}s ago"),
        60..=3599 => format!("{}m ago", secs / 60),
        3600..=86_399 => format!("{}h ago", secs / 3600),
        _ => format!("{}d ago", secs / 86_400),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn age_buckets() {
        let now = SystemTime::now();
        assert_eq!(age(now + Duration::from_secs(5)), "0s ago");
        assert_eq!(age(now - Duration::from_secs(120)), "2m ago");
        assert_eq!(age(now - Duration::from_secs(7200)), "2h ago");
        assert_eq!(age(now - Duration::from_secs(3 * 86_400)), "3d ago");
    }

    #[test]
    fn show_and_delete_against_a_store() {
        let tmp = tempfile::tempdir().unwrap();
        let mut store = open_store(Some(tmp.path().to_path_buf())).unwrap();
        let cast = "{\"version\":2,\"width\":80,\"height\":24}\n[1.0,\"o\",\"hi\\r\\n\"]\n";
        store.save("main", "rec-1", cast).unwrap();

        run_list(&store, None).unwrap();
        run_show(&store, "main", "rec-1").unwrap();
        assert!(run_show(&store, "main", "missing").is_err());
        run_delete(&mut store, "main", "rec-1").unwrap();
        assert!(store.list("main").unwrap().is_empty());
    }
}
