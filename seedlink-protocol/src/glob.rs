//! POSIX-style glob matching for station-id wildcard subscriptions.
//!
//! `*` matches any run of bytes (including none); `?` matches exactly one
//! byte; `[abc]`/`[a-z]` are character classes (ascending ranges only);
//! `[!...]`/`[^...]` negate; a leading `]` or `-` inside a class is a
//! literal member rather than a close/range marker; `\x` escapes `x`.

use crate::error::{Result, SeedlinkError};

#[derive(Clone, Debug)]
enum Atom {
    Lit(u8),
    Any,
    Star,
    Class { negate: bool, ranges: Vec<(u8, u8)> },
}

fn take_class_byte(bytes: &[u8], i: &mut usize) -> Result<u8> {
    if *i >= bytes.len() {
        return Err(SeedlinkError::InvalidCommand(
            "unterminated character class".into(),
        ));
    }
    if bytes[*i] == b'\\' {
        *i += 1;
        if *i >= bytes.len() {
            return Err(SeedlinkError::InvalidCommand(
                "dangling escape in character class".into(),
            ));
        }
    }
    let b = bytes[*i];
    *i += 1;
    Ok(b)
}

fn compile(pattern: &str) -> Result<Vec<Atom>> {
    let bytes = pattern.as_bytes();
    let mut atoms = Vec::new();
    let mut i = 0;
    while i < bytes.len() {
        match bytes[i] {
            b'*' => {
                if !matches!(atoms.last(), Some(Atom::Star)) {
                    atoms.push(Atom::Star);
                }
                i += 1;
            }
            b'?' => {
                atoms.push(Atom::Any);
                i += 1;
            }
            b'\\' => {
                i += 1;
                if i >= bytes.len() {
                    return Err(SeedlinkError::InvalidCommand(
                        "dangling escape at end of pattern".into(),
                    ));
                }
                atoms.push(Atom::Lit(bytes[i]));
                i += 1;
            }
            b'[' => {
                i += 1;
                let negate = matches!(bytes.get(i), Some(b'!') | Some(b'^'));
                if negate {
                    i += 1;
                }
                let mut ranges = Vec::new();
                let mut first = true;
                loop {
                    if i >= bytes.len() {
                        return Err(SeedlinkError::InvalidCommand(
                            "unterminated character class".into(),
                        ));
                    }
                    if bytes[i] == b']' && !first {
                        i += 1;
                        break;
                    }
                    let leading = first;
                    first = false;
                    let lo = take_class_byte(bytes, &mut i)?;
                    if !leading && i + 1 < bytes.len() && bytes[i] == b'-' && bytes[i + 1] != b']'
                    {
                        i += 1;
                        let hi = take_class_byte(bytes, &mut i)?;
                        ranges.push((lo, hi));
                    } else {
                        ranges.push((lo, lo));
                    }
                }
                atoms.push(Atom::Class { negate, ranges });
            }
            c => {
                atoms.push(Atom::Lit(c));
                i += 1;
            }
        }
    }
    Ok(atoms)
}

fn atom_matches(atom: &Atom, b: u8) -> bool {
    match atom {
        Atom::Lit(c) => *c == b,
        Atom::Any => true,
        Atom::Class { negate, ranges } => {
            let hit = ranges.iter().any(|&(lo, hi)| lo <= b && b <= hi);
            hit != *negate
        }
        Atom::Star => unreachable!("Star is handled by the scan loop, not atom_matches"),
    }
}

/// Match `s` against `pattern`. Returns `false` (rather than erroring) on a
/// malformed pattern, since callers treat an unmatched subscription the same
/// way regardless of why it didn't match.
pub fn globmatch(s: &str, pattern: &str) -> bool {
    let Ok(atoms) = compile(pattern) else {
        return false;
    };
    let s = s.as_bytes();

    let (mut si, mut ai) = (0usize, 0usize);
    let mut star_anchor: Option<(usize, usize)> = None; // (atom index after '*', string index tried)

    while si < s.len() {
        if ai < atoms.len() && !matches!(atoms[ai], Atom::Star) && atom_matches(&atoms[ai], s[si])
        {
            si += 1;
            ai += 1;
        } else if ai < atoms.len() && matches!(atoms[ai], Atom::Star) {
            star_anchor = Some((ai + 1, si));
            ai += 1;
        } else if let Some((anchor_ai, anchor_si)) = star_anchor {
            let retry_si = anchor_si + 1;
            star_anchor = Some((anchor_ai, retry_si));
            ai = anchor_ai;
            si = retry_si;
        } else {
            return false;
        }
    }
    while ai < atoms.len() && matches!(atoms[ai], Atom::Star) {
        ai += 1;
    }
    ai == atoms.len()
}
