// src/version/mod.rs

//! RPM version ordering
//!
//! Versions are compared the way rpm itself compares them: epoch first, then
//! version, then release. Version and release strings are compared segment
//! by segment with [`rpmvercmp`]:
//!
//! - separators (anything that is not alphanumeric, `~` or `^`) only delimit
//!   segments and are otherwise ignored
//! - numeric segments compare by value and always beat alphabetic ones
//! - `~` sorts before everything, including the end of the string
//!   (`1.0~rc1 < 1.0`)
//! - `^` sorts after the end of the string but before any other segment
//!   (`1.0 < 1.0^git1 < 1.0.1`)

use crate::error::{Error, Result};
use std::cmp::Ordering;
use std::fmt;

/// A parsed RPM version with epoch, version, and release components
#[derive(Debug, Clone, Eq)]
pub struct RpmVersion {
    pub epoch: u64,
    pub version: String,
    pub release: Option<String>,
}

impl RpmVersion {
    pub fn new(epoch: u64, version: impl Into<String>, release: impl Into<String>) -> Self {
        Self {
            epoch,
            version: version.into(),
            release: Some(release.into()),
        }
    }

    /// Parse an RPM version string
    ///
    /// Format: `[epoch:]version[-release]`
    /// - `"1.2.3"` → epoch=0, version="1.2.3", release=None
    /// - `"1:2.3.4-5.el8"` → epoch=1, version="2.3.4", release=Some("5.el8")
    pub fn parse(s: &str) -> Result<Self> {
        let (epoch, rest) = match s.split_once(':') {
            Some(("", rest)) => (0, rest),
            Some((e, rest)) => {
                let epoch = e.parse::<u64>().map_err(|err| {
                    Error::ParseError(format!("Invalid epoch in version '{}': {}", s, err))
                })?;
                (epoch, rest)
            }
            None => (0, s),
        };

        let (version, release) = match rest.rsplit_once('-') {
            Some((v, r)) => (v.to_string(), Some(r.to_string())),
            None => (rest.to_string(), None),
        };

        if version.is_empty() {
            return Err(Error::ParseError(format!(
                "Empty version component in '{}'",
                s
            )));
        }

        Ok(Self {
            epoch,
            version,
            release,
        })
    }

    /// Compare two RPM versions
    pub fn compare(&self, other: &RpmVersion) -> Ordering {
        self.epoch
            .cmp(&other.epoch)
            .then_with(|| rpmvercmp(&self.version, &other.version))
            .then_with(|| match (&self.release, &other.release) {
                (Some(a), Some(b)) => rpmvercmp(a, b),
                (None, None) => Ordering::Equal,
                (None, Some(_)) => Ordering::Less,
                (Some(_), None) => Ordering::Greater,
            })
    }
}

impl fmt::Display for RpmVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.epoch > 0 {
            write!(f, "{}:", self.epoch)?;
        }
        write!(f, "{}", self.version)?;
        if let Some(ref release) = self.release {
            write!(f, "-{}", release)?;
        }
        Ok(())
    }
}

impl PartialEq for RpmVersion {
    fn eq(&self, other: &Self) -> bool {
        self.compare(other) == Ordering::Equal
    }
}

impl Ord for RpmVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.compare(other)
    }
}

impl PartialOrd for RpmVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

fn is_separator(b: u8) -> bool {
    !b.is_ascii_alphanumeric() && b != b'~' && b != b'^'
}

/// Compare two version (or release) strings with rpm's segment rules
pub fn rpmvercmp(a: &str, b: &str) -> Ordering {
    if a == b {
        return Ordering::Equal;
    }

    let one = a.as_bytes();
    let two = b.as_bytes();
    let (mut i, mut j) = (0usize, 0usize);

    while i < one.len() || j < two.len() {
        while i < one.len() && is_separator(one[i]) {
            i += 1;
        }
        while j < two.len() && is_separator(two[j]) {
            j += 1;
        }

        let c1 = one.get(i).copied();
        let c2 = two.get(j).copied();

        // Tilde sorts before everything else
        if c1 == Some(b'~') || c2 == Some(b'~') {
            if c1 != Some(b'~') {
                return Ordering::Greater;
            }
            if c2 != Some(b'~') {
                return Ordering::Less;
            }
            i += 1;
            j += 1;
            continue;
        }

        // Caret sorts after end of string but before anything else
        if c1 == Some(b'^') || c2 == Some(b'^') {
            if c1.is_none() {
                return Ordering::Less;
            }
            if c2.is_none() {
                return Ordering::Greater;
            }
            if c1 != Some(b'^') {
                return Ordering::Greater;
            }
            if c2 != Some(b'^') {
                return Ordering::Less;
            }
            i += 1;
            j += 1;
            continue;
        }

        if c1.is_none() || c2.is_none() {
            break;
        }

        let numeric = one[i].is_ascii_digit();
        let in_segment = |c: u8| {
            if numeric {
                c.is_ascii_digit()
            } else {
                c.is_ascii_alphabetic()
            }
        };
        let seg_end = |s: &[u8], start: usize| {
            let mut end = start;
            while end < s.len() && in_segment(s[end]) {
                end += 1;
            }
            end
        };
        let end1 = seg_end(one, i);
        let end2 = seg_end(two, j);

        // Segment types differ: numeric wins over alphabetic
        if end2 == j {
            return if numeric {
                Ordering::Greater
            } else {
                Ordering::Less
            };
        }

        let mut seg1 = &one[i..end1];
        let mut seg2 = &two[j..end2];

        if numeric {
            while seg1.first() == Some(&b'0') {
                seg1 = &seg1[1..];
            }
            while seg2.first() == Some(&b'0') {
                seg2 = &seg2[1..];
            }
            match seg1.len().cmp(&seg2.len()) {
                Ordering::Equal => {}
                ord => return ord,
            }
        }

        match seg1.cmp(seg2) {
            Ordering::Equal => {}
            ord => return ord,
        }

        i = end1;
        j = end2;
    }

    match (i >= one.len(), j >= two.len()) {
        (true, true) => Ordering::Equal,
        (true, false) => Ordering::Less,
        _ => Ordering::Greater,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn lt(a: &str, b: &str) {
        assert_eq!(rpmvercmp(a, b), Ordering::Less, "{a} < {b}");
        assert_eq!(rpmvercmp(b, a), Ordering::Greater, "{b} > {a}");
    }

    #[test]
    fn test_basic_ordering() {
        assert_eq!(rpmvercmp("1.0", "1.0"), Ordering::Equal);
        lt("1.0", "2.0");
        lt("2.0", "2.0.1");
        lt("2.0.1", "2.0.1a");
        lt("5.5p1", "5.5p2");
        lt("5.5p1", "5.5p10");
    }

    #[test]
    fn test_numeric_beats_lexical() {
        lt("1.9", "1.10");
        lt("10xyz", "10.1xyz");
        lt("xyz10", "xyz10.1");
        lt("a", "1");
        lt("1.a", "1.1");
    }

    #[test]
    fn test_leading_zeros_ignored() {
        assert_eq!(rpmvercmp("1.001", "1.1"), Ordering::Equal);
        assert_eq!(rpmvercmp("1.0010", "1.10"), Ordering::Equal);
    }

    #[test]
    fn test_separators_equivalent() {
        assert_eq!(rpmvercmp("1.0", "1_0"), Ordering::Equal);
        assert_eq!(rpmvercmp("2.0.1", "2..0.1"), Ordering::Equal);
        assert_eq!(rpmvercmp("2_0", "2.0"), Ordering::Equal);
    }

    #[test]
    fn test_tilde_sorts_before_release() {
        lt("1.0~rc1", "1.0");
        lt("1.0~rc1", "1.0~rc2");
        lt("1.0~rc1~git123", "1.0~rc1");
        lt("1.0~", "1.0");
    }

    #[test]
    fn test_caret_sorts_after_release() {
        lt("1.0", "1.0^");
        lt("1.0", "1.0^git1");
        lt("1.0^git1", "1.0^git2");
        lt("1.0^git1", "1.01");
        lt("1.0^20160101", "1.0.1");
        lt("1.0~rc1", "1.0~rc1^git1");
        lt("1.0^git1~pre", "1.0^git1");
    }

    #[test]
    fn test_rpm_version_compare() {
        let a = RpmVersion::new(0, "1.0", "1.fc39");
        let b = RpmVersion::new(0, "1.0", "2.fc39");
        let c = RpmVersion::new(1, "0.1", "1");
        assert!(a < b);
        assert!(b < c, "epoch dominates");
        assert_eq!(RpmVersion::new(0, "1.01", "1"), RpmVersion::new(0, "1.1", "1"));
    }

    #[test]
    fn test_parse() {
        let v = RpmVersion::parse("2:1.2.3-4.el8").unwrap();
        assert_eq!(v.epoch, 2);
        assert_eq!(v.version, "1.2.3");
        assert_eq!(v.release.as_deref(), Some("4.el8"));
        assert_eq!(v.to_string(), "2:1.2.3-4.el8");

        let v = RpmVersion::parse("1.0").unwrap();
        assert_eq!(v.epoch, 0);
        assert!(v.release.is_none());

        assert!(RpmVersion::parse("x:1.0").is_err());
        assert!(RpmVersion::parse("1:").is_err());
    }
}
