//! Embedded schema migrations for the job-store database, run via
//! `refinery` at startup. Kept independent of the instrument/knowledge
//! pools so a deployment is free to point `JOB_DB_*` at the cluster that
//! also hosts `instruments` and `knowledge_chunks`, or split them apart.

mod embedded {
    refinery::embed_migrations!("migrations");
}

use deadpool_postgres::Pool;

use crate::error::DatabaseError;

/// Applies any migrations not yet recorded against `pool`'s database.
pub async fn run(pool: &Pool) -> Result<(), DatabaseError> {
    let mut conn = pool
        .get()
        .await
        .map_err(|e| DatabaseError::Pool(e.to_string()))?;

    embedded::migrations::runner()
        .run_async(&mut *conn)
        .await
        .map_err(|e| DatabaseError::Migration(e.to_string()))?;

    Ok(())
}
