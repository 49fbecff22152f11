use serde::{Deserialize, Serialize};
use std::str::FromStr;

use crate::store::{Column, ColumnType, Record, Row, StoreError, TableSchema};

pub static ACCESS_LEVELS: TableSchema = TableSchema {
    name: "access_levels",
    columns: &[
        Column::new("alias", ColumnType::Text),
        Column::new("name", ColumnType::Text),
    ],
    unique: &[&["alias"]],
    foreign_keys: &[],
};

/// Strictness class of a permission. Declaration order is rank order:
/// `Full` is the most permissive, `NoAccess` the least.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AccessLevel {
    Full,
    DataFull,
    DataAdd,
    DataProcess,
    DataView,
    NoAccess,
}

impl AccessLevel {
    pub const ALL: [AccessLevel; 6] = [
        AccessLevel::Full,
        AccessLevel::DataFull,
        AccessLevel::DataAdd,
        AccessLevel::DataProcess,
        AccessLevel::DataView,
        AccessLevel::NoAccess,
    ];

    pub fn rank(self) -> u8 {
        self as u8
    }

    pub fn alias(self) -> &'static str {
        match self {
            AccessLevel::Full => "full",
            AccessLevel::DataFull => "data_full",
            AccessLevel::DataAdd => "data_add",
            AccessLevel::DataProcess => "data_process",
            AccessLevel::DataView => "data_view",
            AccessLevel::NoAccess => "no_access",
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            AccessLevel::Full => "Full access",
            AccessLevel::DataFull => "Full data management",
            AccessLevel::DataAdd => "Add data",
            AccessLevel::DataProcess => "Process data",
            AccessLevel::DataView => "View data",
            AccessLevel::NoAccess => "No access",
        }
    }

    /// At least as permissive as `other`.
    pub fn permits(self, other: AccessLevel) -> bool {
        self.rank() <= other.rank()
    }

    /// Most permissive of the given levels, `NoAccess` for none.
    pub fn most_permissive(levels: impl IntoIterator<Item = AccessLevel>) -> AccessLevel {
        levels.into_iter().min().unwrap_or(AccessLevel::NoAccess)
    }
}

impl FromStr for AccessLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        AccessLevel::ALL
            .into_iter()
            .find(|level| level.alias() == s)
            .ok_or_else(|| format!("Unknown access level: {}", s))
    }
}

impl std::fmt::Display for AccessLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.alias())
    }
}

/// Stored row of the seeded `access_levels` table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AccessLevelRecord {
    pub id: i64,
    pub alias: String,
    pub name: String,
}

impl From<AccessLevel> for AccessLevelRecord {
    fn from(level: AccessLevel) -> Self {
        Self {
            id: 0,
            alias: level.alias().to_string(),
            name: level.name().to_string(),
        }
    }
}

impl Record for AccessLevelRecord {
    const TABLE: &'static TableSchema = &ACCESS_LEVELS;

    fn id(&self) -> i64 {
        self.id
    }

    fn set_id(&mut self, id: i64) {
        self.id = id;
    }

    fn to_row(&self) -> Row {
        Row::new()
            .with("alias", &self.alias)
            .with("name", &self.name)
    }

    fn from_row(row: &Row) -> Result<Self, StoreError> {
        Ok(Self {
            id: row.id()?,
            alias: row.text("alias")?,
            name: row.text("name")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_rank_order() {
        let ranks: Vec<u8> = AccessLevel::ALL.iter().map(|l| l.rank()).collect();
        assert_eq!(ranks, vec![0, 1, 2, 3, 4, 5]);
        assert!(AccessLevel::Full < AccessLevel::NoAccess);
    }

    #[test]
    fn test_most_permissive() {
        assert_eq!(
            AccessLevel::most_permissive([AccessLevel::DataView, AccessLevel::DataAdd]),
            AccessLevel::DataAdd
        );
        assert_eq!(AccessLevel::most_permissive([]), AccessLevel::NoAccess);
    }

    #[test]
    fn test_alias_round_trip() {
        for level in AccessLevel::ALL {
            assert_eq!(level.alias().parse::<AccessLevel>().unwrap(), level);
        }
        assert!("admin".parse::<AccessLevel>().is_err());
    }

    #[test]
    fn test_serde_uses_alias() {
        let json = serde_json::to_string(&AccessLevel::DataProcess).unwrap();
        assert_eq!(json, "\"data_process\"");
    }

    #[test]
    fn test_permits() {
        assert!(AccessLevel::Full.permits(AccessLevel::DataView));
        assert!(!AccessLevel::DataView.permits(AccessLevel::DataAdd));
    }
}
