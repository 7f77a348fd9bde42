//! Seed the first SUPER_ADMIN account.
//!
//! Usage: create-super-admin <email> <password> [name]
//! Falls back to SUPER_ADMIN_EMAIL / SUPER_ADMIN_PASSWORD / SUPER_ADMIN_NAME.

use anyhow::{Context, bail};
use argon2::password_hash::{SaltString, rand_core::OsRng};
use argon2::{Argon2, PasswordHasher};
use sqlx::postgres::PgPoolOptions;
use uuid::Uuid;

fn arg_or_env(args: &[String], idx: usize, var: &str) -> Option<String> {
    args.get(idx)
        .cloned()
        .or_else(|| std::env::var(var).ok())
        .map(|s| s.trim().to_string())
        .filter(|s| !s.is_empty())
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    let args: Vec<String> = std::env::args().skip(1).collect();
    let email = arg_or_env(&args, 0, "SUPER_ADMIN_EMAIL")
        .context("Usage: create-super-admin <email> <password> [name]")?
        .to_lowercase();
    let password = arg_or_env(&args, 1, "SUPER_ADMIN_PASSWORD")
        .context("Usage: create-super-admin <email> <password> [name]")?;
    let name = arg_or_env(&args, 2, "SUPER_ADMIN_NAME").unwrap_or_else(|| "Super Admin".into());

    if password.chars().count() < 8 {
        bail!("password must be at least 8 characters");
    }

    let salt = SaltString::generate(&mut OsRng);
    let password_hash = Argon2::default()
        .hash_password(password.as_bytes(), &salt)
        .map_err(|e| anyhow::anyhow!("argon2 hash error: {e}"))?
        .to_string();

    let database_url = std::env::var("DATABASE_URL").context("DATABASE_URL is not set")?;
    let pool = PgPoolOptions::new()
        .max_connections(1)
        .connect(&database_url)
        .await?;
    sqlx::migrate!("./migrations").run(&pool).await?;

    let mut tx = pool.begin().await?;

    let existing: Option<Uuid> = sqlx::query_scalar(r#"SELECT id FROM users WHERE email = $1"#)
        .bind(&email)
        .fetch_optional(&mut *tx)
        .await?;
    if existing.is_some() {
        bail!("a user with email {email} already exists");
    }

    let user_id: Uuid = sqlx::query_scalar(
        r#"
        INSERT INTO users (name, email, password_hash, role)
        VALUES ($1, $2, $3, 'SUPER_ADMIN')
        RETURNING id
        "#,
    )
    .bind(&name)
    .bind(&email)
    .bind(&password_hash)
    .fetch_one(&mut *tx)
    .await?;

    sqlx::query(r#"INSERT INTO admins (user_id, name, email) VALUES ($1, $2, $3)"#)
        .bind(user_id)
        .bind(&name)
        .bind(&email)
        .execute(&mut *tx)
        .await?;

    tx.commit().await?;

    println!("created SUPER_ADMIN {email} ({user_id})");
    Ok(())
}
