//! Built-in migrations for the product catalog schema.

use super::definitions::Migration;
use super::sql::LedgerSql;

const CREATE_PRODUCTS_SQL: &str = "
CREATE TABLE IF NOT EXISTS products (
    id SERIAL PRIMARY KEY,
    name VARCHAR(255) NOT NULL,
    price DECIMAL(10, 2) NOT NULL,
    image_key VARCHAR(512),
    date_added TIMESTAMP NOT NULL DEFAULT NOW(),
    date_updated TIMESTAMP NOT NULL DEFAULT NOW()
);

CREATE INDEX IF NOT EXISTS idx_products_date_added ON products(date_added);
";

const DROP_PRODUCTS_SQL: &str = "DROP TABLE IF EXISTS products";

/// Catalog migrations in id order. Migration 1 creates `ledger_table`.
pub fn product_catalog(ledger_table: &str) -> Vec<Migration> {
    let ledger = LedgerSql::new(ledger_table);

    vec![
        Migration::new(
            1,
            "create_migrations_table",
            ledger.create_table(),
            ledger.drop_table(),
        )
        .bootstrapping(),
        Migration::new(
            2,
            "create_products_table",
            CREATE_PRODUCTS_SQL,
            DROP_PRODUCTS_SQL,
        ),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::migrations::sql::split_sql_statements;

    #[test]
    fn test_bootstrap_migration_uses_configured_table() {
        let migrations = product_catalog("schema_ledger");
        let bootstrap = &migrations[0];

        assert_eq!(bootstrap.id, 1);
        assert!(bootstrap.bootstraps_ledger);
        assert!(bootstrap.up_sql.contains("CREATE TABLE IF NOT EXISTS schema_ledger"));
        assert_eq!(bootstrap.down_sql, "DROP TABLE IF EXISTS schema_ledger");
    }

    #[test]
    fn test_products_migration_has_table_and_index() {
        let migrations = product_catalog("migrations");
        let products = &migrations[1];

        assert_eq!(products.name, "create_products_table");
        let statements = split_sql_statements(&products.up_sql);
        assert_eq!(statements.len(), 2);
        assert!(statements[0].contains("products"));
        assert!(statements[1].contains("idx_products_date_added"));
    }
}
