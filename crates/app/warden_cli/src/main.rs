pub use self::error::{Error, Result};
mod error;

use clap::Parser;
use cli::{Cli, Commands, DatabaseArgs};
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use warden_core::seed::{ensure_superadmin, seed_defaults};
use warden_core::store::PgStore;

mod cli;
mod logging;

fn main() -> Result<()> {
    if let Err(e) = run() {
        log::error!("{}", e);
        std::process::exit(1);
    }
    Ok(())
}

fn run() -> Result<()> {
    dotenvy::dotenv().ok();
    logging::init()?;

    let args = Cli::parse();

    match args.command {
        Commands::Version => {
            println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        }
        Commands::Migrate { db } => block_on(async {
            let pool = connect(&db).await?;
            warden_core::migrate::migrate(&pool).await?;
            pool.close().await;
            log::info!("migrations applied");
            Ok::<(), Error>(())
        })?,
        Commands::Seed {
            db,
            superadmin_email,
            superadmin_password,
        } => block_on(async {
            let pool = connect(&db).await?;
            warden_core::migrate::migrate(&pool).await?;
            let store = PgStore::new(pool);

            let report = seed_defaults(&store).await?;
            log::info!(
                "seeded {} roles, {} permissions, {} grants",
                report.roles_created,
                report.permissions_created,
                report.grants_added
            );

            if let (Some(email), Some(password)) = (superadmin_email, superadmin_password) {
                let (user, created) = ensure_superadmin(&store, &email, &password).await?;
                if created {
                    log::info!("created superadmin {}", user.email);
                } else {
                    log::info!("superadmin {} already exists", user.email);
                }
            }
            store.close().await;
            Ok::<(), Error>(())
        })?,
    }

    Ok(())
}

fn block_on<F: Future<Output = Result<()>>>(fut: F) -> Result<()> {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?
        .block_on(fut)
}

async fn connect(db: &DatabaseArgs) -> Result<PgPool> {
    Ok(PgPoolOptions::new()
        .max_connections(2)
        .connect(&db.database_url)
        .await?)
}
