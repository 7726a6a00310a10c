//! SQL script discovery
//!
//! Builds migration units from script files named
//! `V<major>_<minor>__<comment>.sql` (upgrade) and
//! `U<major>_<minor>__<comment>.sql` (downgrade). A bare `V<major>__...` means
//! `<major>.0`. Underscores in the comment become spaces.
//!
//! An upgrade script whose first line is `-- ladder:no-transaction` produces a
//! non-transactional unit.

use once_cell::sync::Lazy;
use regex::Regex;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

use crate::unit::MigrationUnit;
use crate::{MigrationError, MigrationResult, Version};

/// First-line marker for scripts that must run outside a transaction
pub const NO_TRANSACTION_MARKER: &str = "-- ladder:no-transaction";

static SCRIPT_NAME: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^(?P<kind>[VU])(?P<major>\d+)(?:_(?P<minor>\d+))?__(?P<comment>.+)\.sql$")
        .expect("script name pattern is valid")
});

/// Role of a script file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScriptKind {
    Upgrade,
    Downgrade,
}

/// Parsed script file name
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScriptName {
    pub kind: ScriptKind,
    pub version: Version,
    pub comment: String,
}

impl ScriptName {
    /// Parse a file name. Returns `Ok(None)` for names that are not migration scripts.
    pub fn parse(file_name: &str) -> MigrationResult<Option<Self>> {
        let Some(caps) = SCRIPT_NAME.captures(file_name) else {
            return Ok(None);
        };

        let kind = match &caps["kind"] {
            "V" => ScriptKind::Upgrade,
            _ => ScriptKind::Downgrade,
        };
        let major = parse_component(&caps["major"], file_name)?;
        let minor = match caps.name("minor") {
            Some(m) => parse_component(m.as_str(), file_name)?,
            None => 0,
        };

        Ok(Some(Self {
            kind,
            version: Version::new(major, minor),
            comment: caps["comment"].replace('_', " "),
        }))
    }
}

fn parse_component(digits: &str, file_name: &str) -> MigrationResult<u32> {
    digits.parse().map_err(|_| {
        MigrationError::InvalidVersion(format!("version component out of range in {}", file_name))
    })
}

/// A `.sql` file named like a script (`V`/`U` then a digit) that the pattern still rejects
fn is_near_miss(file_name: &str) -> bool {
    let mut chars = file_name.chars();
    file_name.ends_with(".sql")
        && chars.next().is_some_and(|c| matches!(c, 'V' | 'U' | 'v' | 'u'))
        && chars.next().is_some_and(|c| c.is_ascii_digit())
}

/// Build units from `(file name, contents)` pairs, e.g. scripts embedded with
/// `include_str!`. Names that do not follow the convention are ignored.
pub fn load_scripts<I, N, C>(files: I) -> MigrationResult<Vec<MigrationUnit>>
where
    I: IntoIterator<Item = (N, C)>,
    N: AsRef<str>,
    C: Into<String>,
{
    let mut upgrades: Vec<(ScriptName, String)> = Vec::new();
    let mut downgrades: BTreeMap<Version, String> = BTreeMap::new();

    for (name, contents) in files {
        let name = name.as_ref();
        let Some(script) = ScriptName::parse(name)? else {
            if is_near_miss(name) {
                warn!(
                    file = name,
                    "Ignoring SQL file that does not match V<major>_<minor>__<comment>.sql"
                );
            } else {
                debug!(file = name, "Skipping file that is not a migration script");
            }
            continue;
        };

        match script.kind {
            ScriptKind::Upgrade => upgrades.push((script, contents.into())),
            ScriptKind::Downgrade => {
                if downgrades.insert(script.version, contents.into()).is_some() {
                    return Err(MigrationError::Discovery(format!(
                        "more than one downgrade script for version {}",
                        script.version
                    )));
                }
            }
        }
    }

    let mut units = Vec::with_capacity(upgrades.len());
    for (script, sql) in upgrades {
        let non_transactional = sql
            .lines()
            .next()
            .is_some_and(|line| line.trim() == NO_TRANSACTION_MARKER);

        let mut unit = MigrationUnit::sql(script.version, script.comment, sql);
        // Two upgrades for one version are left for the migrator to reject
        if let Some(down) = downgrades.remove(&script.version) {
            unit = unit.with_downgrade_sql(down);
        }
        if non_transactional {
            unit = unit.non_transactional();
        }
        units.push(unit);
    }

    if let Some(version) = downgrades.keys().next() {
        return Err(MigrationError::Discovery(format!(
            "downgrade script for version {} has no matching upgrade script",
            version
        )));
    }

    units.sort_by_key(|unit| unit.version());
    Ok(units)
}

/// Directory of migration scripts
#[derive(Debug, Clone)]
pub struct ScriptDirectory {
    path: PathBuf,
}

impl ScriptDirectory {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read every `*.sql` file in the directory and build units from them
    pub fn load(&self) -> MigrationResult<Vec<MigrationUnit>> {
        if !self.path.is_dir() {
            return Err(MigrationError::Discovery(format!(
                "migrations directory {} does not exist",
                self.path.display()
            )));
        }

        let pattern = format!(
            "{}/*.sql",
            glob::Pattern::escape(&self.path.to_string_lossy())
        );
        let entries = glob::glob(&pattern)
            .map_err(|e| MigrationError::Discovery(format!("invalid pattern {}: {}", pattern, e)))?;

        let mut files = Vec::new();
        for entry in entries {
            let path = entry.map_err(|e| MigrationError::Discovery(e.to_string()))?;
            let Some(name) = path.file_name().and_then(|n| n.to_str()).map(str::to_string) else {
                continue;
            };
            let contents = std::fs::read_to_string(&path).map_err(|e| {
                MigrationError::Discovery(format!("reading {}: {}", path.display(), e))
            })?;
            files.push((name, contents));
        }

        let units = load_scripts(files)?;
        info!(
            directory = %self.path.display(),
            units = units.len(),
            "Discovered migration scripts"
        );
        Ok(units)
    }
}
