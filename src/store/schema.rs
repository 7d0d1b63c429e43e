use anyhow::Result;
use scylla::client::session::Session;

// ============================================================================
// Schema bootstrap
// ============================================================================

const DOCUMENT_TABLES: [&str; 6] = [
    "subscriptions",
    "delivery_drivers",
    "deliveries",
    "customers",
    "menu_items",
    "addons",
];

/// Statements for one keyspace, in execution order.
pub fn statements(keyspace: &str, replication_factor: u8) -> Vec<String> {
    let mut statements = vec![
        format!(
            "CREATE KEYSPACE IF NOT EXISTS {keyspace} WITH replication = \
             {{'class': 'NetworkTopologyStrategy', 'replication_factor': {replication_factor}}}"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {keyspace}.event_store (
                aggregate_id uuid, sequence_number bigint, event_id uuid, event_type text,
                event_version int, event_data text, causation_id uuid, correlation_id uuid,
                user_id uuid, timestamp timestamp,
                PRIMARY KEY (aggregate_id, sequence_number)
            ) WITH CLUSTERING ORDER BY (sequence_number ASC)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {keyspace}.aggregate_sequence (
                aggregate_id uuid PRIMARY KEY, current_sequence bigint, updated_at timestamp
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {keyspace}.outbox_messages (
                bucket int, id uuid, aggregate_id uuid, aggregate_type text, kind text,
                payload text, correlation_id uuid, attempts int, last_error text,
                created_at timestamp,
                PRIMARY KEY (bucket, id)
            ) WITH CLUSTERING ORDER BY (id ASC)"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {keyspace}.outbox_dead_letters (
                bucket int, id uuid, aggregate_id uuid, kind text, payload text,
                correlation_id uuid, attempts int, error text, created_at timestamp,
                failed_at timestamp,
                PRIMARY KEY (bucket, id)
            )"
        ),
        format!(
            "CREATE TABLE IF NOT EXISTS {keyspace}.order_slots (
                slot_key text PRIMARY KEY, order_id uuid, reserved_at timestamp
            )"
        ),
    ];

    for table in DOCUMENT_TABLES {
        statements.push(format!(
            "CREATE TABLE IF NOT EXISTS {keyspace}.{table} (
                id uuid PRIMARY KEY, lookup text, version bigint, data text
            )"
        ));
        statements.push(format!(
            "CREATE INDEX IF NOT EXISTS {table}_lookup_idx ON {keyspace}.{table} (lookup)"
        ));
    }

    statements
}

/// Create keyspace and tables, then switch the session to the keyspace.
pub async fn ensure_schema(session: &Session, keyspace: &str, replication_factor: u8) -> Result<()> {
    for statement in statements(keyspace, replication_factor) {
        session.query_unpaged(statement, &[]).await?;
    }

    session.use_keyspace(keyspace, false).await?;
    tracing::info!(keyspace = %keyspace, "✅ Schema ready");

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_statements_are_keyspace_qualified() {
        let statements = statements("meals", 1);
        assert!(statements[0].starts_with("CREATE KEYSPACE IF NOT EXISTS meals"));
        assert!(statements.iter().skip(1).all(|s| s.contains("meals.")));
        assert!(statements.iter().any(|s| s.contains("meals.order_slots")));
        assert_eq!(
            statements.iter().filter(|s| s.starts_with("CREATE INDEX")).count(),
            DOCUMENT_TABLES.len()
        );
    }
}
