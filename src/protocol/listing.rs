use crate::domain::model::{EntryKind, RemoteEntry};
use chrono::{DateTime, NaiveDateTime, TimeZone, Utc};

const TIMESTAMP_FORMAT: &str = "%Y%m%d%H%M%S";

pub fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.format(TIMESTAMP_FORMAT).to_string()
}

/// Parses an RFC 3659 time-val; fractional seconds are dropped.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    let whole = value.split('.').next()?;
    NaiveDateTime::parse_from_str(whole, TIMESTAMP_FORMAT)
        .ok()
        .map(|naive| Utc.from_utc_datetime(&naive))
}

pub fn format_mlsd_line(entry: &RemoteEntry) -> String {
    let mut facts = format!("type={};size={};", entry.kind, entry.size);
    if let Some(modified) = entry.modified {
        facts.push_str(&format!("modify={};", format_timestamp(modified)));
    }
    format!("{} {}", facts, entry.name)
}

/// Parses one MLSD line. `cdir`/`pdir` entries and unknown types yield `None`.
pub fn parse_mlsd_line(line: &str) -> Option<RemoteEntry> {
    let line = line.trim_end_matches(['\r', '\n']);
    let (facts, name) = line.split_once(' ')?;
    if name.is_empty() {
        return None;
    }

    let mut kind = None;
    let mut size = 0;
    let mut modified = None;
    for fact in facts.split(';').filter(|f| !f.is_empty()) {
        let Some((key, value)) = fact.split_once('=') else {
            continue;
        };
        match key.to_ascii_lowercase().as_str() {
            "type" => {
                kind = match value.to_ascii_lowercase().as_str() {
                    "file" => Some(EntryKind::File),
                    "dir" => Some(EntryKind::Dir),
                    _ => None,
                }
            }
            "size" => size = value.parse().unwrap_or(0),
            "modify" => modified = parse_timestamp(value),
            _ => {}
        }
    }

    Some(RemoteEntry {
        name: name.to_string(),
        kind: kind?,
        size,
        modified,
    })
}

/// `ls -l` style line for LIST; only meant for humans.
pub fn format_list_line(entry: &RemoteEntry) -> String {
    let mode = match entry.kind {
        EntryKind::Dir => "drwxr-xr-x",
        EntryKind::File => "-rw-r--r--",
    };
    let when = entry
        .modified
        .map(|m| m.format("%b %d %H:%M").to_string())
        .unwrap_or_else(|| "Jan 01 00:00".to_string());
    format!(
        "{} 1 owner group {:>12} {} {}",
        mode, entry.size, when, entry.name
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mlsd_line_parses_facts() {
        let entry = parse_mlsd_line("type=file;size=8;modify=20240102030405; new file.txt").unwrap();
        assert_eq!(entry.name, "new file.txt");
        assert_eq!(entry.kind, EntryKind::File);
        assert_eq!(entry.size, 8);
        assert_eq!(
            entry.modified.map(format_timestamp).as_deref(),
            Some("20240102030405")
        );
    }

    #[test]
    fn test_mlsd_skips_cdir_and_pdir() {
        assert!(parse_mlsd_line("type=cdir;modify=20240102030405; .").is_none());
        assert!(parse_mlsd_line("type=pdir; ..").is_none());
    }

    #[test]
    fn test_mlsd_format_is_parseable() {
        let entry = RemoteEntry {
            name: "sub".to_string(),
            kind: EntryKind::Dir,
            size: 0,
            modified: parse_timestamp("20230405060708"),
        };
        let line = format_mlsd_line(&entry);
        assert_eq!(line, "type=dir;size=0;modify=20230405060708; sub");
        assert_eq!(parse_mlsd_line(&line), Some(entry));
    }

    #[test]
    fn test_timestamp_with_fraction() {
        assert!(parse_timestamp("20240102030405.123").is_some());
        assert!(parse_timestamp("yesterday").is_none());
    }

    #[test]
    fn test_list_line_marks_directories() {
        let entry = RemoteEntry {
            name: "docs".to_string(),
            kind: EntryKind::Dir,
            size: 0,
            modified: None,
        };
        assert!(format_list_line(&entry).starts_with('d'));
        assert!(format_list_line(&entry).ends_with(" docs"));
    }
}
