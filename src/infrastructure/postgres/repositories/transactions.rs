use std::sync::Arc;

use anyhow::Result;
use async_trait::async_trait;
use diesel::dsl::sql;
use diesel::pg::Pg;
use diesel::prelude::*;
use diesel::query_builder::QueryFragment;
use diesel::query_dsl::methods::LoadQuery;
use diesel::sql_types::{Int8, Text};
use diesel::upsert::excluded;
use diesel::{ExpressionMethods, PgConnection, QueryDsl, RunQueryDsl, insert_into};
use uuid::Uuid;

use crate::domain::entities::transactions::{NewTransactionEntity, TransactionEntity};
use crate::domain::repositories::transactions::TransactionRepository;
use crate::infrastructure::postgres::{postgres_connection::PgPoolSquad, schema::transactions};

pub struct TransactionPostgres {
    db_pool: Arc<PgPoolSquad>,
}

impl TransactionPostgres {
    pub fn new(db_pool: Arc<PgPoolSquad>) -> Self {
        Self { db_pool }
    }
}

/// Duplicate confirmations (sync response + async webhook, or a provider
/// retry-storm) land on the same row. `status` always follows the latest
/// write, covering the pending -> succeeded|failed transition. Amount and
/// currency are backfilled only when the existing row holds the empty
/// placeholders an amount-less webhook can leave behind; a real amount is
/// never overwritten.
fn upsert_statement(
    transaction: NewTransactionEntity,
) -> impl QueryFragment<Pg> + for<'query> LoadQuery<'query, PgConnection, Uuid> {
    insert_into(transactions::table)
        .values(transaction)
        .on_conflict((transactions::provider, transactions::external_id))
        .do_update()
        .set((
            transactions::status.eq(excluded(transactions::status)),
            transactions::amount_minor.eq(sql::<Int8>(
                "CASE WHEN transactions.amount_minor = 0 \
                 THEN excluded.amount_minor ELSE transactions.amount_minor END",
            )),
            transactions::currency.eq(sql::<Text>(
                "CASE WHEN transactions.currency = '' \
                 THEN excluded.currency ELSE transactions.currency END",
            )),
        ))
        .returning(transactions::id)
}

#[async_trait]
impl TransactionRepository for TransactionPostgres {
    async fn upsert_by_provider_ref(&self, transaction: NewTransactionEntity) -> Result<Uuid> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let transaction_id = upsert_statement(transaction).get_result::<Uuid>(&mut conn)?;

        Ok(transaction_id)
    }

    async fn list_by_tenant(&self, tenant_id: Uuid, limit: i64) -> Result<Vec<TransactionEntity>> {
        let mut conn = Arc::clone(&self.db_pool).get()?;

        let results = transactions::table
            .filter(transactions::tenant_id.eq(tenant_id))
            .order(transactions::created_at.desc())
            .limit(limit)
            .select(TransactionEntity::as_select())
            .load::<TransactionEntity>(&mut conn)?;

        Ok(results)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row() -> NewTransactionEntity {
        NewTransactionEntity {
            tenant_id: Uuid::new_v4(),
            external_id: "pi_123".to_string(),
            provider: "stripe".to_string(),
            amount_minor: 1999,
            currency: "USD".to_string(),
            status: "succeeded".to_string(),
            type_: "payment".to_string(),
            customer_email: None,
            metadata: serde_json::json!({}),
        }
    }

    #[test]
    fn upsert_updates_status_on_the_provider_ref_conflict() {
        let generated = diesel::debug_query::<Pg, _>(&upsert_statement(row())).to_string();
        assert!(generated.contains("ON CONFLICT"));
        assert!(generated.contains("excluded.\"status\""));
    }

    #[test]
    fn upsert_backfills_placeholder_amount_and_currency_only() {
        let generated = diesel::debug_query::<Pg, _>(&upsert_statement(row())).to_string();
        assert!(generated.contains(
            "CASE WHEN transactions.amount_minor = 0 \
             THEN excluded.amount_minor ELSE transactions.amount_minor END"
        ));
        assert!(generated.contains(
            "CASE WHEN transactions.currency = '' \
             THEN excluded.currency ELSE transactions.currency END"
        ));
    }
}
