// ─── Runtime Versions ───
// Java/OpenJFX version parsing, ordering and constraint matching.

use std::cmp::Ordering;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::core::error::{PrestarterError, PrestarterResult};

/// Number of ordered components: major, minor, security, patch, build.
const KEY_LEN: usize = 5;

/// A parsed runtime version. Ordering ignores the raw text.
#[derive(Debug, Clone)]
pub struct RuntimeVersion {
    key: [u32; KEY_LEN],
    prerelease: bool,
    raw: String,
}

impl RuntimeVersion {
    /// Parse strings such as `17.0.8+7`, `jdk-21.0.2+13`, `1.8.0_392-b08`,
    /// `21.0.2` or `17.0.8.1+1-LTS`.
    pub fn parse(raw: &str) -> Option<Self> {
        let trimmed = raw.trim();
        let body = trimmed
            .strip_prefix("jdk-")
            .or_else(|| trimmed.strip_prefix("jdk"))
            .unwrap_or(trimmed);
        let prerelease = body.to_ascii_lowercase().contains("-ea");

        let (core, build) = split_build(body);
        let mut parts = core.split('.');
        let first = parts.next()?.parse::<u32>().ok()?;

        let mut key = [0u32; KEY_LEN];
        if first == 1 {
            // Legacy scheme: 1.8.0_392-b08
            let major = parts.next().and_then(|p| p.parse::<u32>().ok()).unwrap_or(1);
            key[0] = major;
            if let Some(rest) = parts.next() {
                let (minor, update) = rest.split_once('_').unwrap_or((rest, "0"));
                key[1] = minor.parse().unwrap_or(0);
                key[2] = leading_number(update).unwrap_or(0);
            }
        } else {
            key[0] = first;
            for (slot, part) in key[1..4].iter_mut().zip(parts) {
                *slot = leading_number(part).unwrap_or(0);
            }
        }
        key[4] = build.unwrap_or(0);

        Some(Self {
            key,
            prerelease,
            raw: trimmed.to_string(),
        })
    }

    pub fn major(&self) -> u32 {
        self.key[0]
    }

    pub fn is_prerelease(&self) -> bool {
        self.prerelease
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    /// Version text with decorations removed, used for exact matching.
    pub fn normalized(&self) -> String {
        normalize(&self.raw)
    }
}

impl PartialEq for RuntimeVersion {
    fn eq(&self, other: &Self) -> bool {
        self.key == other.key
    }
}

impl Eq for RuntimeVersion {}

impl PartialOrd for RuntimeVersion {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for RuntimeVersion {
    fn cmp(&self, other: &Self) -> Ordering {
        self.key.cmp(&other.key)
    }
}

impl fmt::Display for RuntimeVersion {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Op {
    Eq,
    Ge,
    Gt,
    Le,
    Lt,
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct Clause {
    op: Op,
    key: [u32; KEY_LEN],
    precision: usize,
    literal: String,
}

impl Clause {
    fn matches(&self, version: &RuntimeVersion) -> bool {
        let ord = version.key[..self.precision].cmp(&self.key[..self.precision]);
        match self.op {
            Op::Eq => ord == Ordering::Equal,
            Op::Ge => ord != Ordering::Less,
            Op::Gt => ord == Ordering::Greater,
            Op::Le => ord != Ordering::Greater,
            Op::Lt => ord == Ordering::Less,
        }
    }

    fn admits_major(&self, major: u32) -> bool {
        let bound = self.key[0];
        let loose = self.precision > 1;
        match self.op {
            Op::Eq => major == bound,
            Op::Ge => major >= bound,
            Op::Gt => major > bound || (loose && major == bound),
            Op::Le => major <= bound,
            Op::Lt => major < bound || (loose && major == bound),
        }
    }

    fn lower_major(&self) -> Option<u32> {
        match self.op {
            Op::Eq | Op::Ge => Some(self.key[0]),
            Op::Gt if self.precision == 1 => self.key[0].checked_add(1),
            Op::Gt => Some(self.key[0]),
            Op::Le | Op::Lt => None,
        }
    }
}

/// A version requirement such as `17`, `>=17`, `>=17,<22` or `17.0.8+7`.
/// `*` or an empty string accepts anything.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct VersionConstraint {
    clauses: Vec<Clause>,
    raw: String,
}

impl VersionConstraint {
    pub fn any() -> Self {
        Self {
            clauses: Vec::new(),
            raw: "*".to_string(),
        }
    }

    pub fn parse(raw: &str) -> PrestarterResult<Self> {
        let trimmed = raw.trim();
        if trimmed.is_empty() || trimmed == "*" {
            return Ok(Self::any());
        }

        let clauses = trimmed
            .split(',')
            .map(|part| parse_clause(part).ok_or_else(|| PrestarterError::InvalidConstraint(raw.to_string())))
            .collect::<PrestarterResult<Vec<_>>>()?;

        Ok(Self {
            clauses,
            raw: trimmed.to_string(),
        })
    }

    /// Same feature release: `major`.
    pub fn major(major: u32) -> Self {
        Self {
            clauses: vec![Clause {
                op: Op::Eq,
                key: [major, 0, 0, 0, 0],
                precision: 1,
                literal: major.to_string(),
            }],
            raw: major.to_string(),
        }
    }

    pub fn matches(&self, version: &RuntimeVersion) -> bool {
        self.clauses.iter().all(|clause| clause.matches(version))
    }

    pub fn matches_str(&self, version: &str) -> bool {
        RuntimeVersion::parse(version)
            .map(|v| self.matches(&v))
            .unwrap_or(false)
    }

    /// Whether some version of feature release `major` could satisfy this.
    pub fn admits_major(&self, major: u32) -> bool {
        self.clauses.iter().all(|clause| clause.admits_major(major))
    }

    /// Smallest feature release the constraint allows, if it has a lower bound.
    pub fn lowest_major(&self) -> Option<u32> {
        self.clauses.iter().filter_map(Clause::lower_major).max()
    }

    /// The pinned version text when the constraint names a single version.
    pub fn exact_literal(&self) -> Option<&str> {
        match self.clauses.as_slice() {
            [clause] if clause.op == Op::Eq && clause.precision > 1 => Some(&clause.literal),
            _ => None,
        }
    }

    pub fn is_any(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }
}

impl Default for VersionConstraint {
    fn default() -> Self {
        Self::any()
    }
}

impl fmt::Display for VersionConstraint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.raw)
    }
}

impl FromStr for VersionConstraint {
    type Err = PrestarterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
    }
}

impl TryFrom<String> for VersionConstraint {
    type Error = PrestarterError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::parse(&value)
    }
}

impl From<VersionConstraint> for String {
    fn from(value: VersionConstraint) -> Self {
        value.raw
    }
}

/// Choose the best candidate for `constraint`: an exact textual match wins,
/// otherwise the highest satisfying version.
pub fn pick_best<T>(
    candidates: impl IntoIterator<Item = (RuntimeVersion, T)>,
    constraint: &VersionConstraint,
) -> Option<(RuntimeVersion, T)> {
    rank_candidates(candidates, constraint).into_iter().next()
}

/// Satisfying candidates in preference order: exact textual matches first,
/// then descending version. Pre-releases are dropped unless pinned exactly.
pub fn rank_candidates<T>(
    candidates: impl IntoIterator<Item = (RuntimeVersion, T)>,
    constraint: &VersionConstraint,
) -> Vec<(RuntimeVersion, T)> {
    let exact = constraint.exact_literal().map(normalize);
    let mut ranked: Vec<(bool, RuntimeVersion, T)> = candidates
        .into_iter()
        .filter_map(|(version, item)| {
            let is_exact = exact.as_deref() == Some(version.normalized().as_str());
            if is_exact || (!version.is_prerelease() && constraint.matches(&version)) {
                Some((is_exact, version, item))
            } else {
                None
            }
        })
        .collect();

    ranked.sort_by(|a, b| b.0.cmp(&a.0).then_with(|| b.1.cmp(&a.1)));
    ranked
        .into_iter()
        .map(|(_, version, item)| (version, item))
        .collect()
}

fn parse_clause(part: &str) -> Option<Clause> {
    let part = part.trim();
    let (op, rest) = if let Some(rest) = part.strip_prefix(">=") {
        (Op::Ge, rest)
    } else if let Some(rest) = part.strip_prefix("<=") {
        (Op::Le, rest)
    } else if let Some(rest) = part.strip_prefix('>') {
        (Op::Gt, rest)
    } else if let Some(rest) = part.strip_prefix('<') {
        (Op::Lt, rest)
    } else if let Some(rest) = part.strip_prefix('=') {
        (Op::Eq, rest)
    } else {
        (Op::Eq, part)
    };

    let literal = rest.trim();
    let (core, build) = split_build(literal);
    let numbers = clause_numbers(core)?;
    let mut key = [0u32; KEY_LEN];
    key[..numbers.len()].copy_from_slice(&numbers);
    let mut precision = numbers.len();
    if let Some(build) = build {
        key[4] = build;
        precision = KEY_LEN;
    }

    Some(Clause {
        op,
        key,
        precision,
        literal: literal.to_string(),
    })
}

/// Numeric components of a clause. Legacy `1.8` and `1.8.0_392` map onto
/// the modern key the same way `RuntimeVersion::parse` does.
fn clause_numbers(core: &str) -> Option<Vec<u32>> {
    let legacy = core.starts_with("1.");
    let mut pieces = core.split('.');
    if legacy {
        pieces.next();
    }

    let mut numbers = Vec::with_capacity(4);
    for piece in pieces {
        match piece.split_once('_') {
            Some((value, update)) if legacy => {
                numbers.push(value.parse::<u32>().ok()?);
                numbers.push(update.parse::<u32>().ok()?);
            }
            _ => numbers.push(piece.parse::<u32>().ok()?),
        }
    }
    if numbers.is_empty() || numbers.len() > 4 {
        return None;
    }
    Some(numbers)
}

fn split_build(text: &str) -> (&str, Option<u32>) {
    let without_suffix = text.split('-').next().unwrap_or(text);
    match without_suffix.split_once('+') {
        Some((core, build)) => (core, leading_number(build)),
        None => {
            // `-ea+5` style suffixes carry the build after the dash.
            let build = text
                .split_once('+')
                .and_then(|(_, build)| leading_number(build));
            (without_suffix, build)
        }
    }
}

fn leading_number(text: &str) -> Option<u32> {
    let digits: String = text.chars().take_while(|c| c.is_ascii_digit()).collect();
    digits.parse().ok()
}

fn normalize(raw: &str) -> String {
    let trimmed = raw.trim();
    let body = trimmed.strip_prefix("jdk-").unwrap_or(trimmed);
    body.trim_end_matches("-LTS").to_string()
}
