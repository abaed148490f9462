use clap::{Parser, Subcommand};

#[derive(Parser, Debug)]
#[command(name = "warden", version, about = "Warden operator tools", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Apply pending database migrations
    Migrate {
        #[command(flatten)]
        db: DatabaseArgs,
    },
    /// Create the default roles and permissions, and optionally a superadmin
    Seed {
        #[command(flatten)]
        db: DatabaseArgs,

        /// Email of the bootstrap superadmin
        #[arg(long, env = "SUPERADMIN_EMAIL", requires = "superadmin_password")]
        superadmin_email: Option<String>,

        /// Password of the bootstrap superadmin
        #[arg(
            long,
            env = "SUPERADMIN_PASSWORD",
            hide_env_values = true,
            requires = "superadmin_email"
        )]
        superadmin_password: Option<String>,
    },
    /// Print the version
    Version,
}

#[derive(clap::Args, Debug)]
pub struct DatabaseArgs {
    /// PostgreSQL connection URL
    #[arg(
        long,
        env = "DATABASE_URL",
        default_value = "postgres://localhost:5432/warden"
    )]
    pub database_url: String,
}
