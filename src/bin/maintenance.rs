use std::env;
use std::process;

use anyhow::{anyhow, Context, Result};
use chrono::Utc;

use routesheets::{
    auth::password::hash_password,
    config::AppConfig,
    db::{self, PgPool},
    init_tracing,
    models::USER_STATUS_APPROVED,
    retention::{engine::TRIGGER_CLI, RetentionEngine},
    sweep::sweep_expired,
    users::{self, Registration},
};

const USAGE: &str = "Usage:
  maintenance run-retention [--dry-run]
  maintenance sweep
  maintenance hash-password <password>
  maintenance create-user <email> <password> <full_name> [license_number] [vehicle_plate]
      [dni_cif] [license_council] [phone] [vehicle_brand] [vehicle_model]";

fn main() -> Result<()> {
    dotenv::dotenv().ok();
    init_tracing();

    let args: Vec<String> = env::args().skip(1).collect();
    match args.first().map(String::as_str) {
        Some("run-retention") => run_retention(args.iter().any(|arg| arg == "--dry-run")),
        Some("sweep") => sweep(),
        Some("hash-password") => {
            let password = args.get(1).ok_or_else(|| anyhow!("missing password\n{USAGE}"))?;
            println!("{}", hash_password(password)?);
            Ok(())
        }
        Some("create-user") => create_user(&args[1..]),
        Some(cmd) => {
            eprintln!("Unknown command: {cmd}\n{USAGE}");
            process::exit(1);
        }
        None => {
            eprintln!("{USAGE}");
            process::exit(1);
        }
    }
}

fn connect() -> Result<(AppConfig, PgPool)> {
    let config = AppConfig::from_env()?;
    tracing::info!(
        component = "maintenance",
        database_url = %config.redacted_database_url(),
        "loaded configuration"
    );
    let pool = db::init_pool_with_size(&config.database_url, 1)?;
    db::run_migrations(&pool)?;
    Ok((config, pool))
}

fn run_retention(dry_run: bool) -> Result<()> {
    let (config, pool) = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let engine = RetentionEngine::new(std::time::Duration::from_secs(
        config.retention_lock_ttl_seconds.max(1) as u64,
    ));

    let report = engine.run(&mut conn, dry_run, TRIGGER_CLI)?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn sweep() -> Result<()> {
    let (_, pool) = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let report = sweep_expired(&mut conn, Utc::now().naive_utc())?;
    println!("{}", serde_json::to_string_pretty(&report)?);
    Ok(())
}

fn create_user(args: &[String]) -> Result<()> {
    let [email, password, full_name, rest @ ..] = args else {
        return Err(anyhow!("create-user needs email, password and full name\n{USAGE}"));
    };
    let optional = |index: usize| rest.get(index).cloned().unwrap_or_else(|| "-".to_string());
    let registration = Registration {
        email: email.clone(),
        password: password.clone(),
        full_name: full_name.clone(),
        license_number: optional(0),
        vehicle_plate: optional(1),
        dni_cif: optional(2),
        license_council: optional(3),
        phone: optional(4),
        vehicle_brand: optional(5),
        vehicle_model: optional(6),
        vehicle_license_number: None,
        drivers: Vec::new(),
    };

    let (_, pool) = connect()?;
    let mut conn = pool.get().context("failed to get database connection")?;
    let user = users::register(&mut conn, &registration, USER_STATUS_APPROVED)?;
    println!("created user {} ({})", user.id, user.email);
    Ok(())
}
