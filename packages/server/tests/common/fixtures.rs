//! Test fixtures for merge scenarios.
//!
//! In-memory fixtures wire the mocks from `server_core::kernel::test_dependencies`;
//! the database fixtures insert rows directly for the Postgres repository tests.

use anyhow::Result;
use server_core::domains::account_merge::{InitiateMerge, User};
use server_core::kernel::{ServerDeps, TestDependencies};
use sqlx::PgPool;
use uuid::Uuid;

pub const TARGET_EMAIL: &str = "owner@example.com";
pub const PROVIDER: &str = "github";
pub const PROVIDER_ID: &str = "gh-42";

/// A target account with a password login and a fresh source account that
/// just signed in through github with the target's email.
pub struct MergeFixture {
    pub test_deps: TestDependencies,
    pub deps: ServerDeps,
    pub source: User,
    pub target: User,
}

impl MergeFixture {
    pub fn new() -> Self {
        let test_deps = TestDependencies::new();

        let target = test_deps.identities.add_user(TARGET_EMAIL);
        test_deps
            .identities
            .add_link(target.id, "password", TARGET_EMAIL);

        let source = test_deps.identities.add_user("octo@users.github.example");
        test_deps.identities.add_link(source.id, PROVIDER, PROVIDER_ID);
        test_deps.authorization.with_roles(source.id, &["editor"]);

        let deps = test_deps.clone().into_deps();

        Self {
            test_deps,
            deps,
            source,
            target,
        }
    }

    pub fn initiate_input(&self) -> InitiateMerge {
        InitiateMerge {
            provider: PROVIDER.to_string(),
            provider_id: PROVIDER_ID.to_string(),
            email: TARGET_EMAIL.to_string(),
            source_user_id: self.source.id,
        }
    }

    /// Token from the most recent confirmation mail
    pub fn mailed_token(&self) -> String {
        let email = self
            .test_deps
            .notifications
            .last_sent()
            .expect("no confirmation mail sent");
        email
            .confirm_url
            .split("token=")
            .nth(1)
            .expect("confirm url carries a token")
            .to_string()
    }

    /// Call log entries recorded after the first entry starting with `prefix`
    pub fn log_after(&self, prefix: &str) -> Vec<String> {
        self.test_deps
            .log
            .entries()
            .into_iter()
            .skip_while(|e| !e.starts_with(prefix))
            .collect()
    }
}

impl Default for MergeFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// Insert a live account
pub async fn insert_user(pool: &PgPool, email: &str) -> Result<Uuid> {
    let id: Uuid = sqlx::query_scalar("INSERT INTO users (email) VALUES ($1) RETURNING id")
        .bind(email)
        .fetch_one(pool)
        .await?;
    Ok(id)
}

/// Bind an external identity to an account
pub async fn insert_identity_link(
    pool: &PgPool,
    user_id: Uuid,
    provider: &str,
    provider_id: &str,
) -> Result<()> {
    sqlx::query("INSERT INTO identity_links (user_id, provider, provider_id) VALUES ($1, $2, $3)")
        .bind(user_id)
        .bind(provider)
        .bind(provider_id)
        .execute(pool)
        .await?;
    Ok(())
}

/// Email unique to one test, so tests can share the database
pub fn unique_email(label: &str) -> String {
    format!("{}-{}@example.com", label, Uuid::new_v4().simple())
}
