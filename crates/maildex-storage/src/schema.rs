/// The full relational schema, executed as one multi-statement script.
/// Every statement is `IF NOT EXISTS`-guarded so the script is safe to run on
/// every startup.
pub const SCHEMA_SQL: &str = include_str!("../../../sql/schema.sql");
