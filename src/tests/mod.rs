//! Warehouse-backed integration tests (spec.md §8 scenarios A, B, F).
//!
//! Each test takes a `PgPool` via `#[sqlx::test]`, which provisions a
//! fresh database, runs `./migrations` against it, and tears it down
//! afterward — no shared state or manual cleanup between tests. Requires
//! `DATABASE_URL` to point at a reachable Postgres server when the suite
//! runs; everything else under `src/` only ever exercises pure logic.

mod aggregator_test;
mod loader_test;
mod refresh_isolation_test;

pub mod common;
