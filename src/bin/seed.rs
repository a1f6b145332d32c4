use peptide_storefront_api::{
    config::AppConfig,
    db::{create_pool, run_migrations},
    middleware::auth::{ADMIN_ROLE, CUSTOMER_ROLE},
    services::auth_service::hash_password,
};
use rust_decimal::Decimal;
use uuid::Uuid;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let config = AppConfig::from_env()?;

    let pool = create_pool(&config.database_url).await?;
    run_migrations(&pool).await?;

    let admin_id =
        ensure_user_with_role(&pool, "admin@example.com", "admin12345", ADMIN_ROLE).await?;
    let user_id =
        ensure_user_with_role(&pool, "user@example.com", "user12345", CUSTOMER_ROLE).await?;
    let affiliate_id =
        ensure_user_with_role(&pool, "partner@example.com", "partner12345", CUSTOMER_ROLE)
            .await?;
    seed_products(&pool).await?;
    seed_discount_codes(&pool).await?;

    println!(
        "Seed completed. Admin ID: {admin_id}, User ID: {user_id}, Affiliate ID: {affiliate_id}"
    );
    Ok(())
}

async fn ensure_user_with_role(
    pool: &sqlx::PgPool,
    email: &str,
    password: &str,
    role: &str,
) -> anyhow::Result<Uuid> {
    let password_hash = hash_password(password)?;

    let (user_id,): (Uuid,) = sqlx::query_as(
        r#"
        INSERT INTO users (id, email, password_hash, role)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT ((lower(email))) DO UPDATE SET role = EXCLUDED.role
        RETURNING id
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(email)
    .bind(password_hash)
    .bind(role)
    .fetch_one(pool)
    .await?;

    println!("Ensured user {email} (role={role})");
    Ok(user_id)
}

async fn seed_products(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    // (name, description, price in cents, stock, purity)
    let products = [
        ("BPC-157 5mg", "Lyophilized pentadecapeptide, research use only", 4_999, 40, "99.1%"),
        ("TB-500 5mg", "Thymosin beta-4 fragment, research use only", 5_499, 25, "98.7%"),
        ("GHK-Cu 50mg", "Copper tripeptide complex, research use only", 3_999, 60, "99.3%"),
        ("Semaglutide 5mg", "GLP-1 receptor agonist, research use only", 8_999, 4, "99.0%"),
        ("Bacteriostatic Water 30ml", "0.9% benzyl alcohol diluent", 1_299, 200, "USP"),
    ];

    for (name, desc, price, stock, purity) in products {
        sqlx::query(
            r#"
            INSERT INTO products (id, name, description, price, stock, purity)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (name) DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(name)
        .bind(desc)
        .bind(price as i64)
        .bind(stock)
        .bind(purity)
        .execute(pool)
        .await?;
    }

    println!("Seeded products");
    Ok(())
}

async fn seed_discount_codes(pool: &sqlx::PgPool) -> anyhow::Result<()> {
    sqlx::query(
        r#"
        INSERT INTO discount_codes (id, code, discount_value, discount_kind, min_order_amount, max_uses)
        VALUES ($1, 'WELCOME10', $2, 'percentage', 0, NULL),
               ($3, 'SAVE5', $4, 'fixed', 2500, 100)
        ON CONFLICT ((upper(code))) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(Decimal::from(10))
    .bind(Uuid::new_v4())
    .bind(Decimal::from(500))
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        INSERT INTO discount_codes
            (id, code, discount_value, discount_kind, is_affiliate, affiliate_name,
             affiliate_email, commission_percent)
        VALUES ($1, 'PARTNER15', $2, 'percentage', TRUE, 'Research Partner',
                'partner@example.com', $3)
        ON CONFLICT ((upper(code))) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(Decimal::from(15))
    .bind(Decimal::from(10))
    .execute(pool)
    .await?;

    println!("Seeded discount codes");
    Ok(())
}
