//! Facet CRUD
//!
//! Saved groupings. No soft delete and no sync; the `query` payload is
//! opaque to the store.

use chrono::Utc;
use rusqlite::{params, Connection, OptionalExtension};

use crate::error::{Result, StoreError};
use crate::model::Facet;
use crate::storage::codec;
use crate::storage::store::GraphStore;
use crate::txn::ChangeOp;

pub(crate) fn insert_facet(conn: &Connection, facet: &Facet) -> Result<()> {
    conn.execute(
        "INSERT INTO facets (id, name, facet_type, query, sort_order, created_at, modified_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            facet.id,
            facet.name,
            facet.facet_type,
            facet.query,
            facet.sort_order,
            codec::ts_to_sql(&facet.created_at),
            codec::ts_to_sql(&facet.modified_at),
        ],
    )
    .map_err(|e| StoreError::insert("facet", &facet.id, e))?;
    Ok(())
}

pub(crate) fn update_facet(conn: &Connection, facet: &Facet) -> Result<()> {
    let changed = conn.execute(
        "UPDATE facets SET name = ?2, facet_type = ?3, query = ?4, sort_order = ?5,
            modified_at = ?6
         WHERE id = ?1",
        params![
            facet.id,
            facet.name,
            facet.facet_type,
            facet.query,
            facet.sort_order,
            codec::ts_to_sql(&Utc::now()),
        ],
    )?;

    if changed == 0 {
        return Err(StoreError::NotFound {
            entity: "facet",
            id: facet.id.clone(),
        });
    }
    Ok(())
}

pub(crate) fn delete_facet(conn: &Connection, id: &str) -> Result<()> {
    let changed = conn.execute("DELETE FROM facets WHERE id = ?1", params![id])?;
    if changed == 0 {
        return Err(StoreError::NotFound {
            entity: "facet",
            id: id.to_string(),
        });
    }
    Ok(())
}

pub(crate) fn get_facet(conn: &Connection, id: &str) -> Result<Option<Facet>> {
    conn.query_row(
        "SELECT * FROM facets WHERE id = ?1",
        params![id],
        codec::facet_from_row,
    )
    .optional()
    .map_err(StoreError::from)
}

pub(crate) fn list_facets(conn: &Connection) -> Result<Vec<Facet>> {
    let mut stmt = conn.prepare("SELECT * FROM facets ORDER BY sort_order, name")?;
    let rows = stmt.query_map([], codec::facet_from_row)?;

    let mut facets = Vec::new();
    for facet in rows {
        facets.push(facet?);
    }
    Ok(facets)
}

impl GraphStore {
    /// Save a new facet.
    pub async fn create_facet(&self, facet: Facet) -> Result<Facet> {
        let correlation_id = format!("facet.create/{}", facet.id);
        self.coordinator()
            .execute_with_retry(&correlation_id, |scope| {
                insert_facet(scope.conn(), &facet)?;
                scope.record("facets", ChangeOp::Insert, Some(facet.id.clone()));
                Ok(())
            })
            .await?;
        Ok(facet)
    }

    /// Update a facet, refreshing `modified_at`.
    pub async fn update_facet(&self, facet: &Facet) -> Result<()> {
        let correlation_id = format!("facet.update/{}", facet.id);
        self.coordinator()
            .execute_with_retry(&correlation_id, |scope| {
                update_facet(scope.conn(), facet)?;
                scope.record("facets", ChangeOp::Update, Some(facet.id.clone()));
                Ok(())
            })
            .await
    }

    /// Remove a facet.
    pub async fn delete_facet(&self, id: &str) -> Result<()> {
        let correlation_id = format!("facet.delete/{id}");
        self.coordinator()
            .execute_with_retry(&correlation_id, |scope| {
                delete_facet(scope.conn(), id)?;
                scope.record("facets", ChangeOp::Delete, Some(id.to_string()));
                Ok(())
            })
            .await
    }

    /// Fetch a facet by id.
    pub async fn get_facet(&self, id: &str) -> Result<Option<Facet>> {
        self.read(|conn| get_facet(conn, id)).await
    }

    /// All facets, by `(sort_order, name)`.
    pub async fn list_facets(&self) -> Result<Vec<Facet>> {
        self.read(list_facets).await
    }
}
