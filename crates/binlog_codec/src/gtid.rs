//! Global transaction identifiers and identifier sets.
//!
//! A GTID is `source_uuid:gno`. A [`GtidSet`] keeps, per source, a sorted
//! list of disjoint half-open intervals `[start, end)`. The text form uses
//! closed ranges, e.g. `3e11fa47-71ca-11e1-9e33-c80aa9429562:1-5:7`.

use crate::error::{CodecError, CodecResult};
use crate::reader::BodyReader;
use bytes::BufMut;
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// One global transaction identifier.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Gtid {
    /// Source server UUID.
    pub sid: Uuid,
    /// Sequence number within the source, starting at 1.
    pub gno: u64,
}

impl Gtid {
    /// Creates a GTID.
    #[must_use]
    pub const fn new(sid: Uuid, gno: u64) -> Self {
        Self { sid, gno }
    }
}

impl fmt::Display for Gtid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.sid, self.gno)
    }
}

/// Half-open interval of sequence numbers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Interval {
    start: u64,
    end: u64,
}

/// A set of GTIDs.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GtidSet {
    sids: BTreeMap<Uuid, Vec<Interval>>,
}

impl GtidSet {
    /// Creates an empty set.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns true if the set holds no identifiers.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.sids.is_empty()
    }

    /// Returns the number of identifiers in the set.
    #[must_use]
    pub fn count(&self) -> u64 {
        self.sids
            .values()
            .flat_map(|ivs| ivs.iter())
            .map(|iv| iv.end - iv.start)
            .sum()
    }

    /// Adds a single GTID.
    pub fn add(&mut self, gtid: Gtid) {
        self.add_range(gtid.sid, gtid.gno, gtid.gno);
    }

    /// Adds the closed range `first..=last` for `sid`.
    ///
    /// Ranges with `first == 0` or `first > last` are ignored; sequence
    /// numbers start at 1.
    pub fn add_range(&mut self, sid: Uuid, first: u64, last: u64) {
        if first == 0 || first > last {
            return;
        }
        let intervals = self.sids.entry(sid).or_default();
        insert_interval(
            intervals,
            Interval {
                start: first,
                end: last.saturating_add(1),
            },
        );
    }

    /// Returns true if `gtid` is in the set.
    #[must_use]
    pub fn contains(&self, gtid: &Gtid) -> bool {
        self.sids.get(&gtid.sid).is_some_and(|ivs| {
            ivs.iter()
                .any(|iv| iv.start <= gtid.gno && gtid.gno < iv.end)
        })
    }

    /// Adds every identifier of `other`.
    pub fn union_with(&mut self, other: &GtidSet) {
        for (sid, ivs) in &other.sids {
            let target = self.sids.entry(*sid).or_default();
            for iv in ivs {
                insert_interval(target, *iv);
            }
        }
    }

    /// Returns true if every identifier of `self` is in `other`.
    #[must_use]
    pub fn is_subset(&self, other: &GtidSet) -> bool {
        self.sids.iter().all(|(sid, ivs)| {
            let Some(theirs) = other.sids.get(sid) else {
                return false;
            };
            ivs.iter().all(|iv| {
                theirs
                    .iter()
                    .any(|t| t.start <= iv.start && iv.end <= t.end)
            })
        })
    }

    /// Returns the highest sequence number recorded for `sid`.
    #[must_use]
    pub fn last_gno(&self, sid: &Uuid) -> Option<u64> {
        self.sids
            .get(sid)
            .and_then(|ivs| ivs.last())
            .map(|iv| iv.end - 1)
    }

    /// Writes the binary form carried by a previous-GTIDs record.
    ///
    /// ```text
    /// | n_sids (8) | { sid (16) | n_intervals (8) | { start (8) | end (8) }* }* |
    /// ```
    pub fn encode(&self, buf: &mut impl BufMut) {
        buf.put_u64_le(self.sids.len() as u64);
        for (sid, ivs) in &self.sids {
            buf.put_slice(sid.as_bytes());
            buf.put_u64_le(ivs.len() as u64);
            for iv in ivs {
                buf.put_u64_le(iv.start);
                buf.put_u64_le(iv.end);
            }
        }
    }

    /// Returns the length of the binary form.
    #[must_use]
    pub fn encoded_len(&self) -> usize {
        8 + self
            .sids
            .values()
            .map(|ivs| 16 + 8 + ivs.len() * 16)
            .sum::<usize>()
    }

    pub(crate) fn decode(reader: &mut BodyReader<'_>) -> CodecResult<Self> {
        let n_sids = reader.u64()?;
        let mut set = GtidSet::new();
        for _ in 0..n_sids {
            let sid = Uuid::from_bytes(reader.array::<16>()?);
            let n_intervals = reader.u64()?;
            for _ in 0..n_intervals {
                let start = reader.u64()?;
                let end = reader.u64()?;
                if start == 0 || start >= end {
                    return Err(CodecError::malformed(format!(
                        "invalid GTID interval [{start}, {end}) for {sid}"
                    )));
                }
                set.add_range(sid, start, end - 1);
            }
        }
        Ok(set)
    }
}

fn insert_interval(intervals: &mut Vec<Interval>, mut new: Interval) {
    let mut merged = Vec::with_capacity(intervals.len() + 1);
    let mut placed = false;
    for iv in intervals.drain(..) {
        if iv.end < new.start {
            merged.push(iv);
        } else if new.end < iv.start {
            if !placed {
                merged.push(new);
                placed = true;
            }
            merged.push(iv);
        } else {
            new.start = new.start.min(iv.start);
            new.end = new.end.max(iv.end);
        }
    }
    if !placed {
        merged.push(new);
    }
    *intervals = merged;
}

impl fmt::Display for GtidSet {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, (sid, ivs)) in self.sids.iter().enumerate() {
            if i > 0 {
                f.write_str(",")?;
            }
            write!(f, "{sid}")?;
            for iv in ivs {
                if iv.end - iv.start == 1 {
                    write!(f, ":{}", iv.start)?;
                } else {
                    write!(f, ":{}-{}", iv.start, iv.end - 1)?;
                }
            }
        }
        Ok(())
    }
}

impl FromStr for GtidSet {
    type Err = CodecError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut set = GtidSet::new();
        for part in s.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let mut pieces = part.split(':');
            let sid_text = pieces.next().unwrap_or_default();
            let sid = Uuid::parse_str(sid_text.trim())
                .map_err(|e| CodecError::malformed(format!("bad GTID source {sid_text}: {e}")))?;
            for range in pieces {
                let (first, last) = match range.split_once('-') {
                    Some((a, b)) => (parse_gno(a)?, parse_gno(b)?),
                    None => {
                        let gno = parse_gno(range)?;
                        (gno, gno)
                    }
                };
                if first == 0 || first > last {
                    return Err(CodecError::malformed(format!("bad GTID range {range}")));
                }
                set.add_range(sid, first, last);
            }
        }
        Ok(set)
    }
}

fn parse_gno(text: &str) -> CodecResult<u64> {
    text.trim()
        .parse()
        .map_err(|_| CodecError::malformed(format!("bad GTID number {text}")))
}
