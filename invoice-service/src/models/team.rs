//! Team model.

use super::{parse_column, UnknownVariant};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::postgres::PgRow;
use sqlx::{FromRow, Row};
use std::fmt;
use std::str::FromStr;

/// Organizational role of a team.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TeamType {
    Selling,
    Warehouse,
    Admin,
}

impl TeamType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TeamType::Selling => "selling",
            TeamType::Warehouse => "warehouse",
            TeamType::Admin => "admin",
        }
    }
}

impl FromStr for TeamType {
    type Err = UnknownVariant;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "selling" => Ok(TeamType::Selling),
            "warehouse" => Ok(TeamType::Warehouse),
            "admin" => Ok(TeamType::Admin),
            other => Err(UnknownVariant::new("team type", other)),
        }
    }
}

impl fmt::Display for TeamType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Team {
    pub id: i64,
    pub name: String,
    pub team_code: String,
    pub team_type: TeamType,
    pub created_at: DateTime<Utc>,
}

impl<'r> FromRow<'r, PgRow> for Team {
    fn from_row(row: &'r PgRow) -> Result<Self, sqlx::Error> {
        Ok(Self {
            id: row.try_get("id")?,
            name: row.try_get("name")?,
            team_code: row.try_get("team_code")?,
            team_type: parse_column(row, "type")?,
            created_at: row.try_get("created_at")?,
        })
    }
}
