//! Applying an inferred [`MappingModel`] to a backing file.
//!
//! The whole migration runs in one transaction: either every kind is
//! carried to the new schema and the new fingerprint is recorded, or the
//! file is left exactly as it was.

use keep_schema::{
    AttributeSource, KindMapping, MappingError, MappingModel, MigrationPolicy, RelationshipSource,
    SchemaModel,
};
use rusqlite::types::Value as SqlValue;
use rusqlite::{params, params_from_iter, Connection};
use tracing::{debug, info};

use crate::backing::{self, create_kind_table, table_name, BackingFile};
use crate::codec;
use crate::error::StoreResult;

/// Carry the file from `recorded` to `current`.
pub(crate) fn migrate(
    file: &mut BackingFile,
    recorded: &SchemaModel,
    current: &SchemaModel,
    policy: &MigrationPolicy,
) -> StoreResult<MappingModel> {
    let mapping = MappingModel::infer(recorded, current, policy)?;
    let path = file.path().display().to_string();

    let tx = file.connection_mut().transaction()?;
    for step in &mapping.kinds {
        apply(&tx, step, current)?;
    }
    backing::write_schema(&tx, current)?;
    tx.commit()?;

    info!(
        path = %path,
        from = %mapping.from.short_hex(),
        to = %mapping.to.short_hex(),
        kinds = mapping.kinds.len(),
        "store migrated"
    );
    Ok(mapping)
}

fn apply(conn: &Connection, step: &KindMapping, current: &SchemaModel) -> StoreResult<()> {
    match step {
        KindMapping::Drop { kind } => {
            let ids = "SELECT id FROM keep_entities WHERE kind = ?1";
            conn.execute(
                &format!("DELETE FROM keep_links WHERE source IN ({ids}) OR target IN ({ids})"),
                [kind],
            )?;
            conn.execute("DELETE FROM keep_entities WHERE kind = ?1", [kind])?;
            conn.execute_batch(&format!("DROP TABLE IF EXISTS {};", table_name(kind)))?;
            debug!(kind = %kind, "kind dropped");
        }
        KindMapping::Create { kind } => {
            if let Some(entity_kind) = current.kind(kind) {
                create_kind_table(conn, entity_kind, &table_name(kind))?;
            }
            debug!(kind = %kind, "kind created");
        }
        KindMapping::Transform {
            kind,
            attributes,
            relationships,
            dropped_relationships,
            ..
        } => {
            let table = table_name(kind);
            let rows: i64 =
                conn.query_row(&format!("SELECT COUNT(*) FROM {table}"), [], |row| row.get(0))?;

            let no_default = |member: &str| MappingError::NoDefault {
                kind: kind.clone(),
                member: member.to_string(),
            };

            let mut columns = vec!["id".to_string()];
            let mut exprs = vec!["id".to_string()];
            let mut values: Vec<SqlValue> = Vec::new();
            for attr in attributes {
                let column = backing::column_name(&attr.name);
                let expr = match &attr.source {
                    AttributeSource::Carry => column.clone(),
                    AttributeSource::CarryFilled(Some(fill)) => {
                        values.push(codec::to_sql(fill).map_err(|_| no_default(&attr.name))?);
                        format!("COALESCE({column}, ?{})", values.len())
                    }
                    AttributeSource::CarryFilled(None) => {
                        let nulls: i64 = conn.query_row(
                            &format!("SELECT COUNT(*) FROM {table} WHERE {column} IS NULL"),
                            [],
                            |row| row.get(0),
                        )?;
                        if nulls > 0 {
                            return Err(no_default(&attr.name).into());
                        }
                        column.clone()
                    }
                    AttributeSource::Fill(fill) => {
                        values.push(codec::to_sql(fill).map_err(|_| no_default(&attr.name))?);
                        format!("?{}", values.len())
                    }
                    AttributeSource::Null => "NULL".to_string(),
                    AttributeSource::Underivable if rows > 0 => {
                        return Err(no_default(&attr.name).into());
                    }
                    AttributeSource::Underivable => "NULL".to_string(),
                };
                columns.push(column);
                exprs.push(expr);
            }

            for name in dropped_relationships {
                conn.execute(
                    &format!(
                        "DELETE FROM keep_links WHERE relationship = ?1 AND source IN (SELECT id FROM {table})"
                    ),
                    [name],
                )?;
            }
            for rel in relationships {
                match rel.source {
                    RelationshipSource::Empty { required: true } if rows > 0 => {
                        return Err(no_default(&rel.name).into());
                    }
                    RelationshipSource::Empty { .. } => {}
                    RelationshipSource::Carry { min, max } => {
                        let outside: i64 = conn.query_row(
                            &format!(
                                "SELECT COUNT(*) FROM (
                                     SELECT e.id AS id, COUNT(l.target) AS n
                                     FROM {table} e
                                     LEFT JOIN keep_links l
                                       ON l.source = e.id AND l.relationship = ?1
                                     GROUP BY e.id
                                 ) WHERE n NOT BETWEEN ?2 AND ?3"
                            ),
                            params![
                                rel.name,
                                i64::from(min),
                                max.map_or(i64::MAX, i64::from)
                            ],
                            |row| row.get(0),
                        )?;
                        if outside > 0 {
                            return Err(MappingError::RelationshipChanged {
                                kind: kind.clone(),
                                relationship: rel.name.clone(),
                                reason: format!(
                                    "{outside} existing entities fall outside the new bounds"
                                ),
                            }
                            .into());
                        }
                    }
                }
            }

            if step.is_identity() {
                return Ok(());
            }
            let Some(entity_kind) = current.kind(kind) else {
                return Ok(());
            };
            let staging = format!("\"keep_migrating_{kind}\"");
            create_kind_table(conn, entity_kind, &staging)?;
            conn.execute(
                &format!(
                    "INSERT INTO {staging} ({}) SELECT {} FROM {table}",
                    columns.join(", "),
                    exprs.join(", ")
                ),
                params_from_iter(values),
            )?;
            conn.execute_batch(&format!(
                "DROP TABLE {table}; ALTER TABLE {staging} RENAME TO {table};"
            ))?;
            debug!(kind = %kind, rows, "kind transformed");
        }
    }
    Ok(())
}
