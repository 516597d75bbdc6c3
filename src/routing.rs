//! CDC routing strategies, selected by table name (spec §4.5, §4.8).
//!
//! A real pluggable-handler registry (spec §4.8) would let each domain
//! declare its own `handlesTable`/`route` capability; the gateway core
//! keeps a small static table of strategies instead, since it owns no
//! domain handlers of its own — new tables are added here, not via dynamic
//! discovery.

use serde_json::Value;
use sqlx::PgPool;

use crate::envelope::CdcRecord;
use crate::subscription::SubscriptionIndex;

/// The routing strategy a table name is classified under.
pub enum Strategy {
    /// Broadcast-style: all subscribers of a channel type.
    Broadcast { channel_type: &'static str },
    /// The record carries the recipient's `sub` directly.
    RecordOwner { sub_field: &'static str },
    /// Per-resource: recipients are whoever subscribes to the resource key.
    PerResource {
        channel_type: &'static str,
        resource_field: &'static str,
    },
    /// Requires a single indexed DB lookup to resolve a `sub`.
    JoinResolved(JoinResolution),
}

pub struct JoinResolution {
    pub table: &'static str,
    pub record_field: &'static str,
    pub extract: fn(&str) -> String,
    pub lookup_column: &'static str,
}

fn identity(value: &str) -> String {
    value.to_string()
}

/// Parse `"<sport>.l.<league>.t.<team>"` down to the league key
/// `"<sport>.l.<league>"` (spec §4.5).
fn team_key_to_league_key(team_key: &str) -> String {
    team_key
        .split_once(".t.")
        .map(|(league, _)| league.to_string())
        .unwrap_or_else(|| team_key.to_string())
}

/// Classify a table name into its routing strategy, or `None` if unknown
/// (spec §4.5: unknown tables drop silently).
pub fn strategy_for_table(table: &str) -> Option<Strategy> {
    match table {
        "trades" => Some(Strategy::Broadcast { channel_type: "finance" }),
        "games" => Some(Strategy::Broadcast { channel_type: "sports" }),
        "user_preferences" | "user_channels" => Some(Strategy::RecordOwner { sub_field: "logto_sub" }),
        "rss_items" => Some(Strategy::PerResource {
            channel_type: "rss",
            resource_field: "feed_url",
        }),
        "yahoo_leagues" => Some(Strategy::JoinResolved(JoinResolution {
            table: "yahoo_users",
            record_field: "guid",
            extract: identity,
            lookup_column: "guid",
        })),
        "yahoo_standings" => Some(Strategy::JoinResolved(JoinResolution {
            table: "yahoo_users",
            record_field: "guid",
            extract: identity,
            lookup_column: "guid",
        })),
        "yahoo_matchups" | "yahoo_rosters" => Some(Strategy::JoinResolved(JoinResolution {
            table: "yahoo_leagues",
            record_field: "team_key",
            extract: team_key_to_league_key,
            lookup_column: "league_key",
        })),
        _ => None,
    }
}

fn field_str<'a>(record: &'a Value, field: &str) -> Option<&'a str> {
    record.get(field).and_then(Value::as_str)
}

/// Resolve the recipient set for one CDC record. Routing failures (a K/V
/// error, a missing field, a DB miss) are returned as an empty set rather
/// than propagated — per spec §4.5/§7, individual routing failures are
/// logged by the caller and never fail the whole webhook.
pub async fn recipients(
    record: &CdcRecord,
    strategy: &Strategy,
    index: &SubscriptionIndex,
    db: &PgPool,
) -> anyhow::Result<Vec<String>> {
    match strategy {
        Strategy::Broadcast { channel_type } => index.broadcast_subscribers(channel_type).await,
        Strategy::RecordOwner { sub_field } => {
            Ok(field_str(&record.record, sub_field)
                .map(|s| vec![s.to_string()])
                .unwrap_or_default())
        }
        Strategy::PerResource {
            channel_type,
            resource_field,
        } => match field_str(&record.record, resource_field) {
            Some(resource) => index.resource_subscribers(channel_type, resource).await,
            None => Ok(Vec::new()),
        },
        Strategy::JoinResolved(join) => {
            let Some(raw) = field_str(&record.record, join.record_field) else {
                return Ok(Vec::new());
            };
            let key = (join.extract)(raw);
            let query = format!(
                "SELECT logto_sub FROM {} WHERE {} = $1",
                join.table, join.lookup_column
            );
            let row: Option<(String,)> = sqlx::query_as(&query)
                .bind(&key)
                .fetch_optional(db)
                .await?;
            Ok(row.map(|(sub,)| vec![sub]).unwrap_or_default())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn team_key_splits_on_dot_t_dot() {
        assert_eq!(team_key_to_league_key("nfl.l.12345.t.1"), "nfl.l.12345");
    }

    #[test]
    fn team_key_without_marker_is_passthrough() {
        assert_eq!(team_key_to_league_key("nfl.l.12345"), "nfl.l.12345");
    }

    #[test]
    fn trades_routes_to_finance_broadcast() {
        match strategy_for_table("trades") {
            Some(Strategy::Broadcast { channel_type }) => assert_eq!(channel_type, "finance"),
            _ => panic!("expected broadcast strategy"),
        }
    }

    #[test]
    fn unknown_table_has_no_strategy() {
        assert!(strategy_for_table("something_else").is_none());
    }
}
