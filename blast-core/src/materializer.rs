//! Materialization
//!
//! Turns a SELECT-shaped query into the DDL/DML that realizes it as a view
//! or table, according to the asset's materialization spec. The
//! delete+insert strategy stages the query output in a temp table so the
//! upsert is atomic without relying on backend-native MERGE.

use crate::pipeline::{Asset, MaterializationStrategy, MaterializationType};
use crate::{Error, Result};

/// Name of the staging table used by the delete+insert strategy.
const TEMP_TABLE: &str = "__blast_tmp";

/// Produce the final statement to execute for an asset's rendered query.
pub fn materialize(asset: &Asset, query: &str) -> Result<String> {
    let query = query.trim();
    let mat = &asset.materialization;

    match mat.kind {
        MaterializationType::None => Ok(query.to_string()),
        MaterializationType::View => Ok(format!(
            "CREATE OR REPLACE VIEW {} AS\n{}",
            asset.name, query
        )),
        MaterializationType::Table => match mat.strategy {
            MaterializationStrategy::None | MaterializationStrategy::CreateReplace => {
                Ok(build_create_replace(asset, query))
            }
            MaterializationStrategy::Append => Ok(format!("INSERT INTO {} {}", asset.name, query)),
            MaterializationStrategy::DeleteInsert => build_delete_insert(asset, query),
        },
    }
}

fn build_create_replace(asset: &Asset, query: &str) -> String {
    let mat = &asset.materialization;
    let mut stmt = format!("CREATE OR REPLACE TABLE {}", asset.name);

    if let Some(partition_by) = &mat.partition_by {
        stmt.push_str(&format!(" PARTITION BY {partition_by}"));
    }
    if !mat.cluster_by.is_empty() {
        stmt.push_str(&format!(" CLUSTER BY {}", mat.cluster_by.join(", ")));
    }

    stmt.push_str(&format!(" AS\n{query}"));
    stmt
}

fn build_delete_insert(asset: &Asset, query: &str) -> Result<String> {
    let key = asset
        .materialization
        .incremental_key
        .as_deref()
        .filter(|k| !k.is_empty())
        .ok_or_else(|| {
            Error::Materialization(format!(
                "asset '{}' uses the delete+insert strategy but has no incremental_key",
                asset.name
            ))
        })?;

    let statements = [
        "BEGIN TRANSACTION".to_string(),
        format!("CREATE TEMP TABLE {TEMP_TABLE} AS {query}"),
        format!(
            "DELETE FROM `{}` WHERE `{key}` in (SELECT DISTINCT `{key}` FROM {TEMP_TABLE})",
            asset.name
        ),
        format!("INSERT INTO `{}` SELECT * FROM {TEMP_TABLE}", asset.name),
        "COMMIT TRANSACTION".to_string(),
    ];

    Ok(format!("{};", statements.join("\n")))
}
