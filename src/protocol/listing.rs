//! Directory listing parsers
//!
//! Turns the payload of `MLSD` and `LIST` data transfers into `RemoteEntry`
//! values. `MLSD` (RFC 3659) is machine readable; `LIST` output is not
//! standardised, so the UNIX `ls -l` and DOS/IIS layouts are parsed on a
//! best-effort basis and unrecognised lines are skipped.

use chrono::{DateTime, Datelike, Duration, NaiveDate, NaiveDateTime, NaiveTime, Utc};
use log::debug;

/// Kind of a remote directory entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryKind {
    File,
    Directory,
    Link,
    /// Pipes, sockets and devices.
    Special,
}

/// One entry of a remote directory listing.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteEntry {
    pub name: String,
    pub kind: EntryKind,
    pub size: Option<u64>,
    pub modified_time: Option<DateTime<Utc>>,
    pub link_target: Option<String>,
}

impl RemoteEntry {
    pub fn is_file(&self) -> bool {
        self.kind == EntryKind::File
    }

    pub fn is_directory(&self) -> bool {
        self.kind == EntryKind::Directory
    }
}

/// Which command produced a listing payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingFormat {
    Mlsd,
    List,
}

/// Parsed view over a listing payload.
///
/// The bytes have already been received; entries are parsed as the iterator
/// is advanced. The sequence is finite and can be consumed only once.
#[derive(Debug)]
pub struct Listing {
    lines: std::vec::IntoIter<String>,
    format: ListingFormat,
    now: DateTime<Utc>,
}

impl Listing {
    pub fn new(payload: &[u8], format: ListingFormat) -> Self {
        let lines: Vec<String> = String::from_utf8_lossy(payload)
            .lines()
            .map(|l| l.trim_end_matches('\r').to_string())
            .filter(|l| !l.trim().is_empty())
            .collect();
        Self {
            lines: lines.into_iter(),
            format,
            now: Utc::now(),
        }
    }

    pub fn format(&self) -> ListingFormat {
        self.format
    }
}

impl Iterator for Listing {
    type Item = RemoteEntry;

    fn next(&mut self) -> Option<RemoteEntry> {
        for line in self.lines.by_ref() {
            let parsed = match self.format {
                ListingFormat::Mlsd => parse_mlsd_line(&line),
                ListingFormat::List => parse_list_line_at(&line, self.now),
            };
            match parsed {
                Some(entry) => return Some(entry),
                None => debug!("Skipping listing line: {}", line),
            }
        }
        None
    }
}

/// Parses one `MLSD` line: `fact=value;fact=value; name`.
///
/// Returns `None` for `cdir`/`pdir` entries and malformed lines.
pub fn parse_mlsd_line(line: &str) -> Option<RemoteEntry> {
    let (facts, name) = line.split_once(' ')?;
    if name.is_empty() {
        return None;
    }

    let mut kind = None;
    let mut size = None;
    let mut modified_time = None;
    let mut link_target = None;

    for fact in facts.split(';').filter(|f| !f.is_empty()) {
        let (key, value) = fact.split_once('=')?;
        match key.to_ascii_lowercase().as_str() {
            "type" => {
                let value_lc = value.to_ascii_lowercase();
                kind = match value_lc.as_str() {
                    "file" => Some(EntryKind::File),
                    "dir" => Some(EntryKind::Directory),
                    "cdir" | "pdir" => return None,
                    v if v.starts_with("os.unix=symlink") => Some(EntryKind::Link),
                    v if v.starts_with("os.unix=slink") => {
                        link_target = value.split_once(':').map(|(_, t)| t.to_string());
                        Some(EntryKind::Link)
                    }
                    _ => Some(EntryKind::Special),
                };
            }
            "size" | "sizd" => size = value.parse().ok(),
            "modify" => modified_time = parse_mlsd_time(value),
            _ => {}
        }
    }

    Some(RemoteEntry {
        name: name.to_string(),
        kind: kind?,
        size,
        modified_time,
        link_target,
    })
}

/// Parses an RFC 3659 time value `YYYYMMDDHHMMSS[.sss]` (always UTC).
pub fn parse_mlsd_time(value: &str) -> Option<DateTime<Utc>> {
    let whole = value.get(..14)?;
    NaiveDateTime::parse_from_str(whole, "%Y%m%d%H%M%S")
        .ok()
        .map(|t| t.and_utc())
}

/// Formats a time the way `MFMT` and `MDTM` expect it.
pub fn format_mlsd_time(time: &DateTime<Utc>) -> String {
    time.format("%Y%m%d%H%M%S").to_string()
}

/// Parses one `LIST` line using the current time for year inference.
pub fn parse_list_line(line: &str) -> Option<RemoteEntry> {
    parse_list_line_at(line, Utc::now())
}

/// Parses one `LIST` line; `now` resolves UNIX dates that omit the year.
pub fn parse_list_line_at(line: &str, now: DateTime<Utc>) -> Option<RemoteEntry> {
    let first = line.chars().next()?;
    if first.is_ascii_digit() {
        parse_dos_line(line)
    } else {
        parse_unix_line(line, now)
    }
}

/// Whitespace separated tokens together with their byte offsets.
fn tokens(line: &str) -> Vec<(usize, &str)> {
    let mut out = Vec::new();
    let mut start = None;
    for (i, c) in line.char_indices() {
        match (c.is_whitespace(), start) {
            (true, Some(s)) => {
                out.push((s, &line[s..i]));
                start = None;
            }
            (false, None) => start = Some(i),
            _ => {}
        }
    }
    if let Some(s) = start {
        out.push((s, &line[s..]));
    }
    out
}

fn month_number(name: &str) -> Option<u32> {
    const MONTHS: [&str; 12] = [
        "jan", "feb", "mar", "apr", "may", "jun", "jul", "aug", "sep", "oct", "nov", "dec",
    ];
    let lower = name.to_ascii_lowercase();
    MONTHS
        .iter()
        .position(|m| *m == lower)
        .map(|i| i as u32 + 1)
}

fn parse_unix_line(line: &str, now: DateTime<Utc>) -> Option<RemoteEntry> {
    let toks = tokens(line);
    let perms = toks.first()?.1;
    if perms.len() < 10 {
        // "total 42" and friends
        return None;
    }

    let kind = match perms.chars().next()? {
        '-' => EntryKind::File,
        'd' => EntryKind::Directory,
        'l' => EntryKind::Link,
        'p' | 's' | 'c' | 'b' | 'D' => EntryKind::Special,
        _ => return None,
    };

    // Locate "<size> <month>"; the group column is missing on some servers.
    let size_idx = (3..toks.len().saturating_sub(4)).find(|&i| {
        toks[i].1.parse::<u64>().is_ok() && month_number(toks[i + 1].1).is_some()
    })?;

    let size = toks[size_idx].1.parse::<u64>().ok();
    let month = month_number(toks[size_idx + 1].1)?;
    let day: u32 = toks[size_idx + 2].1.parse().ok()?;
    let year_or_time = toks[size_idx + 3].1;
    let name_offset = toks[size_idx + 4].0;
    let raw_name = &line[name_offset..];

    let modified_time = unix_time(month, day, year_or_time, now);

    let (name, link_target) = match kind {
        EntryKind::Link => match raw_name.split_once(" -> ") {
            Some((n, t)) => (n.to_string(), Some(t.to_string())),
            None => (raw_name.to_string(), None),
        },
        _ => (raw_name.to_string(), None),
    };

    if name == "." || name == ".." {
        return None;
    }

    Some(RemoteEntry {
        name,
        kind,
        size,
        modified_time,
        link_target,
    })
}

fn unix_time(month: u32, day: u32, year_or_time: &str, now: DateTime<Utc>) -> Option<DateTime<Utc>> {
    if let Some((h, m)) = year_or_time.split_once(':') {
        let time = NaiveTime::from_hms_opt(h.parse().ok()?, m.parse().ok()?, 0)?;
        let this_year = NaiveDate::from_ymd_opt(now.year(), month, day)?.and_time(time).and_utc();
        // Recent files omit the year; a date in the future belongs to last year.
        if this_year > now + Duration::days(1) {
            NaiveDate::from_ymd_opt(now.year() - 1, month, day)
                .map(|d| d.and_time(time).and_utc())
        } else {
            Some(this_year)
        }
    } else {
        let year: i32 = year_or_time.parse().ok()?;
        NaiveDate::from_ymd_opt(year, month, day)?
            .and_hms_opt(0, 0, 0)
            .map(|t| t.and_utc())
    }
}

fn parse_dos_line(line: &str) -> Option<RemoteEntry> {
    let toks = tokens(line);
    if toks.len() < 4 {
        return None;
    }
    let date = NaiveDate::parse_from_str(toks[0].1, "%m-%d-%y")
        .or_else(|_| NaiveDate::parse_from_str(toks[0].1, "%m-%d-%Y"))
        .ok()?;
    let time = NaiveTime::parse_from_str(&toks[1].1.to_ascii_uppercase(), "%I:%M%p")
        .or_else(|_| NaiveTime::parse_from_str(toks[1].1, "%H:%M"))
        .ok()?;
    let name = line[toks[3].0..].to_string();

    let (kind, size) = if toks[2].1.eq_ignore_ascii_case("<DIR>") {
        (EntryKind::Directory, None)
    } else {
        (EntryKind::File, Some(toks[2].1.parse::<u64>().ok()?))
    };

    Some(RemoteEntry {
        name,
        kind,
        size,
        modified_time: Some(date.and_time(time).and_utc()),
        link_target: None,
    })
}
