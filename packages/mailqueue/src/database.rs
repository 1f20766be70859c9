use std::time::Duration;

use common::DatabaseConfig;
use sea_orm::sea_query::Index;
use sea_orm::{ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, Schema};
use tracing::{info, warn};

use crate::entity::mail_queue;

/// Open a connection pool and make sure the `mail_queue` table exists.
pub async fn init_db(config: &DatabaseConfig) -> Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new(config.url.to_owned());

    // Each SQLite in-memory connection is its own database.
    if config.is_in_memory() {
        opt.max_connections(1).min_connections(1);
    } else {
        opt.max_connections(config.max_connections)
            .min_connections(1)
            .idle_timeout(Duration::from_secs(300))
            .max_lifetime(Duration::from_secs(1800));
    }

    opt.connect_timeout(Duration::from_secs(8))
        .acquire_timeout(Duration::from_secs(8))
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;
    create_schema(&db).await?;
    ensure_indexes(&db).await?;

    Ok(db)
}

/// Create the `mail_queue` table, including the unique constraints on
/// `insert_fingerprint` and `article_id` that make enqueue idempotent.
pub async fn create_schema<C: ConnectionTrait>(db: &C) -> Result<(), DbErr> {
    let backend = db.get_database_backend();
    let mut table = Schema::new(backend).create_table_from_entity(mail_queue::Entity);
    table.if_not_exists();

    db.execute_raw(backend.build(&table)).await?;
    Ok(())
}

/// Ensure the composite indexes behind the pending and quarantine reads exist.
pub async fn ensure_indexes<C: ConnectionTrait>(db: &C) -> Result<(), DbErr> {
    let backend = db.get_database_backend();

    // WHERE due_time IS NULL OR due_time <= ? ORDER BY create_time
    let pending = Index::create()
        .if_not_exists()
        .name("idx_mail_queue_due_create")
        .table(mail_queue::Entity)
        .col(mail_queue::Column::DueTime)
        .col(mail_queue::Column::CreateTime)
        .to_owned();

    // WHERE attempts >= ? ORDER BY create_time
    let failed = Index::create()
        .if_not_exists()
        .name("idx_mail_queue_attempts_create")
        .table(mail_queue::Entity)
        .col(mail_queue::Column::Attempts)
        .col(mail_queue::Column::CreateTime)
        .to_owned();

    for (name, stmt) in [
        ("idx_mail_queue_due_create", pending),
        ("idx_mail_queue_attempts_create", failed),
    ] {
        match db.execute_raw(backend.build(&stmt)).await {
            Ok(_) => info!("Ensured index {} exists", name),
            Err(e) => warn!("Failed to create index {}: {}", name, e),
        }
    }

    Ok(())
}
