use std::collections::HashMap;

use anyhow::Result;
use sqlx::{sqlite::SqliteRow, Pool, QueryBuilder, Row, Sqlite, SqliteConnection};

use crate::extract::Decomposition;
use crate::models::*;

use super::row_helpers::*;

/// Rows per INSERT statement, well under SQLite's bind limit
const INSERT_CHUNK: usize = 200;

fn json_list(items: &[String]) -> String {
    serde_json::to_string(items).unwrap_or_else(|_| "[]".to_string())
}

fn json_text(value: &serde_json::Value) -> String {
    serde_json::to_string(value).unwrap_or_else(|_| "{}".to_string())
}

/// Sub-entity database operations
pub struct EntityRepo;

impl EntityRepo {
    /// Insert every row of `d` under `snapshot_id`, one multi-row INSERT per
    /// entity type and chunk. Runs on the caller's connection so it shares
    /// the snapshot transaction.
    pub async fn insert_all(conn: &mut SqliteConnection, snapshot_id: i64, d: &Decomposition) -> Result<()> {
        for chunk in d.interfaces.chunks(INSERT_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "INSERT INTO interfaces (snapshot_id, name, description, enabled, vrf, mode, type, \
                 access_vlan, combo_type, ip_address, subnet_mask) ",
            );
            qb.push_values(chunk, |mut b, i| {
                b.push_bind(snapshot_id)
                    .push_bind(i.interface.clone())
                    .push_bind(i.description.clone())
                    .push_bind(i.enabled)
                    .push_bind(i.vrf.clone())
                    .push_bind(i.mode.clone())
                    .push_bind(i.iface_type.clone())
                    .push_bind(i.access_vlan.clone())
                    .push_bind(i.combo_type.clone())
                    .push_bind(i.ip_address.clone())
                    .push_bind(i.subnet_mask.clone());
            });
            qb.build().execute(&mut *conn).await?;
        }

        for chunk in d.virtuals.chunks(INSERT_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new(
                "INSERT INTO ltm_virtual_servers (snapshot_id, name, vs_address, vs_port, mask, protocol, \
                 source, pool, snat_type, snat_pool, persist, profiles, rules) ",
            );
            qb.push_values(chunk, |mut b, v| {
                b.push_bind(snapshot_id)
                    .push_bind(v.name.clone())
                    .push_bind(v.vs_address.clone())
                    .push_bind(v.vs_port.clone())
                    .push_bind(v.mask.clone())
                    .push_bind(v.protocol.clone())
                    .push_bind(v.source.clone())
                    .push_bind(v.pool.clone())
                    .push_bind(v.snat_type.clone())
                    .push_bind(v.snat_pool.clone())
                    .push_bind(json_list(&v.persist))
                    .push_bind(json_list(&v.profiles))
                    .push_bind(json_list(&v.rules));
            });
            qb.build().execute(&mut *conn).await?;
        }

        for chunk in d.pools.chunks(INSERT_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new("INSERT INTO ltm_pools (snapshot_id, name, mode, monitors) ");
            qb.push_values(chunk, |mut b, p| {
                b.push_bind(snapshot_id)
                    .push_bind(p.name.clone())
                    .push_bind(p.mode.clone())
                    .push_bind(json_list(&p.monitors));
            });
            qb.build().execute(&mut *conn).await?;
        }
        Self::insert_pool_members(conn, snapshot_id, &d.pools).await?;

        for chunk in d.nodes.chunks(INSERT_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new("INSERT INTO ltm_nodes (snapshot_id, name, address) ");
            qb.push_values(chunk, |mut b, n| {
                b.push_bind(snapshot_id)
                    .push_bind(n.name.clone())
                    .push_bind(n.address.clone());
            });
            qb.build().execute(&mut *conn).await?;
        }

        Self::insert_typed_objects(conn, "ltm_profiles", snapshot_id, &d.profiles).await?;
        Self::insert_typed_objects(conn, "ltm_persistence", snapshot_id, &d.persistence).await?;

        for chunk in d.rules.chunks(INSERT_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new("INSERT INTO ltm_rules (snapshot_id, name, raw) ");
            qb.push_values(chunk, |mut b, r| {
                b.push_bind(snapshot_id)
                    .push_bind(r.name.clone())
                    .push_bind(json_text(&r.raw));
            });
            qb.build().execute(&mut *conn).await?;
        }

        for chunk in d.snat_pools.chunks(INSERT_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new("INSERT INTO ltm_snat_pools (snapshot_id, name, members) ");
            qb.push_values(chunk, |mut b, s| {
                b.push_bind(snapshot_id)
                    .push_bind(s.name.clone())
                    .push_bind(json_list(&s.members));
            });
            qb.build().execute(&mut *conn).await?;
        }

        Ok(())
    }

    async fn insert_typed_objects(
        conn: &mut SqliteConnection,
        table: &str,
        snapshot_id: i64,
        items: &[TypedObjectRecord],
    ) -> Result<()> {
        for chunk in items.chunks(INSERT_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new(format!("INSERT INTO {} (snapshot_id, name, type, raw) ", table));
            qb.push_values(chunk, |mut b, o| {
                b.push_bind(snapshot_id)
                    .push_bind(o.name.clone())
                    .push_bind(o.kind.clone())
                    .push_bind(json_text(&o.raw));
            });
            qb.build().execute(&mut *conn).await?;
        }
        Ok(())
    }

    async fn insert_pool_members(conn: &mut SqliteConnection, snapshot_id: i64, pools: &[PoolRecord]) -> Result<()> {
        if pools.iter().all(|p| p.members.is_empty()) {
            return Ok(());
        }

        let ids: HashMap<String, i64> = sqlx::query("SELECT id, name FROM ltm_pools WHERE snapshot_id = ?")
            .bind(snapshot_id)
            .fetch_all(&mut *conn)
            .await?
            .iter()
            .map(|row| (row.get("name"), row.get("id")))
            .collect();

        let members: Vec<(i64, &PoolMemberRecord)> = pools
            .iter()
            .filter_map(|p| ids.get(&p.name).map(|&id| (id, p)))
            .flat_map(|(id, p)| p.members.iter().map(move |m| (id, m)))
            .collect();

        for chunk in members.chunks(INSERT_CHUNK) {
            let mut qb = QueryBuilder::<Sqlite>::new("INSERT INTO ltm_pool_members (pool_id, name, address) ");
            qb.push_values(chunk, |mut b, (pool_id, m)| {
                b.push_bind(*pool_id)
                    .push_bind(m.name.clone())
                    .push_bind(m.address.clone());
            });
            qb.build().execute(&mut *conn).await?;
        }
        Ok(())
    }

    /// Run a listing against `table`, applying the snapshot/device/latest filters
    async fn select<T>(
        pool: &Pool<Sqlite>,
        table: &str,
        q: &EntityQuery,
        map: fn(&SqliteRow) -> T,
    ) -> Result<Vec<T>> {
        let (limit, offset) = q.page();
        let mut qb = QueryBuilder::<Sqlite>::new(format!(
            "SELECT t.*, s.device_id AS device_id, d.hostname AS device_name FROM {} t \
             JOIN config_snapshots s ON s.id = t.snapshot_id \
             JOIN devices d ON d.id = s.device_id WHERE 1 = 1",
            table
        ));
        if let Some(config) = q.config {
            qb.push(" AND t.snapshot_id = ").push_bind(config);
        }
        if let Some(device) = q.device {
            qb.push(" AND s.device_id = ").push_bind(device);
        }
        if q.latest {
            qb.push(" AND s.is_latest = 1");
        }
        qb.push(" ORDER BY d.hostname, t.snapshot_id DESC, t.id LIMIT ")
            .push_bind(limit)
            .push(" OFFSET ")
            .push_bind(offset);

        let rows = qb.build().fetch_all(pool).await?;
        Ok(rows.iter().map(map).collect())
    }

    pub async fn list_interfaces(pool: &Pool<Sqlite>, q: &EntityQuery) -> Result<Vec<InterfaceRow>> {
        Self::select(pool, "interfaces", q, map_interface_row).await
    }

    pub async fn list_virtuals(pool: &Pool<Sqlite>, q: &EntityQuery) -> Result<Vec<EntityRow<VirtualServerRecord>>> {
        Self::select(pool, "ltm_virtual_servers", q, map_virtual_row).await
    }

    pub async fn list_pools(pool: &Pool<Sqlite>, q: &EntityQuery) -> Result<Vec<EntityRow<PoolRecord>>> {
        let mut pools = Self::select(pool, "ltm_pools", q, map_pool_row).await?;
        if pools.is_empty() {
            return Ok(pools);
        }

        let mut qb = QueryBuilder::<Sqlite>::new("SELECT pool_id, name, address FROM ltm_pool_members WHERE pool_id IN (");
        let mut ids = qb.separated(", ");
        for p in &pools {
            ids.push_bind(p.owner.id);
        }
        qb.push(") ORDER BY id");

        let mut members: HashMap<i64, Vec<PoolMemberRecord>> = HashMap::new();
        for row in qb.build().fetch_all(pool).await? {
            members.entry(row.get("pool_id")).or_default().push(PoolMemberRecord {
                name: row.get("name"),
                address: row.get("address"),
            });
        }
        for p in &mut pools {
            p.record.members = members.remove(&p.owner.id).unwrap_or_default();
        }
        Ok(pools)
    }

    pub async fn list_nodes(pool: &Pool<Sqlite>, q: &EntityQuery) -> Result<Vec<EntityRow<NodeRecord>>> {
        Self::select(pool, "ltm_nodes", q, map_node_row).await
    }

    pub async fn list_profiles(pool: &Pool<Sqlite>, q: &EntityQuery) -> Result<Vec<EntityRow<TypedObjectRecord>>> {
        Self::select(pool, "ltm_profiles", q, map_typed_object_row).await
    }

    pub async fn list_rules(pool: &Pool<Sqlite>, q: &EntityQuery) -> Result<Vec<EntityRow<RuleRecord>>> {
        Self::select(pool, "ltm_rules", q, map_rule_row).await
    }

    pub async fn list_persistence(pool: &Pool<Sqlite>, q: &EntityQuery) -> Result<Vec<EntityRow<TypedObjectRecord>>> {
        Self::select(pool, "ltm_persistence", q, map_typed_object_row).await
    }

    pub async fn list_snat_pools(pool: &Pool<Sqlite>, q: &EntityQuery) -> Result<Vec<EntityRow<SnatPoolRecord>>> {
        Self::select(pool, "ltm_snat_pools", q, map_snat_pool_row).await
    }
}
