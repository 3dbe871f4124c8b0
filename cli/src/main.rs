mod commands;
mod config;
mod openfoodfacts;
mod server;

use std::path::PathBuf;
use std::process;
use std::sync::Arc;

use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use crate::commands::{
    EntryChanges, MacroArgs, cmd_barcode, cmd_clear, cmd_delete, cmd_goals_progress,
    cmd_goals_reset, cmd_goals_set, cmd_goals_show, cmd_log, cmd_month, cmd_search, cmd_summary,
    cmd_top, cmd_update, cmd_week,
};
use crate::config::Config;
use crate::openfoodfacts::OpenFoodFactsClient;
use macrotrack_core::db::Database;
use macrotrack_core::models::GoalTargets;
use macrotrack_core::service::NutritionService;

#[derive(Parser)]
#[command(
    name = "macrotrack",
    version,
    about = "Track daily food intake and macro goals"
)]
struct Cli {
    /// Path to the SQLite database (overrides MACROTRACK_DB)
    #[arg(long, global = true, env = "MACROTRACK_DB", value_name = "PATH")]
    db: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
    },
    /// Log a food entry with its macros
    Log {
        /// User ID
        user: i64,
        /// Product name
        product: String,
        /// Quantity (e.g. "200g", "500ml", "2 tbsp", "1.5 oz")
        quantity: String,
        #[command(flatten)]
        macros: MacroArgs,
        /// Meal type: breakfast, lunch, dinner, snack
        #[arg(short, long)]
        meal: Option<String>,
        /// Date to log for (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Look up a product by barcode and log it
    Barcode {
        /// User ID
        user: i64,
        /// Barcode number
        code: String,
        /// Quantity (default: 100g)
        quantity: Option<String>,
        /// Meal type: breakfast, lunch, dinner, snack
        #[arg(short, long)]
        meal: Option<String>,
        /// Date to log for (YYYY-MM-DD, default: today)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show daily summary (defaults to today)
    Summary {
        /// User ID
        user: i64,
        /// Date to show (YYYY-MM-DD, default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the Monday-to-Sunday week containing a date
    Week {
        /// User ID
        user: i64,
        /// Any date in the week (default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a calendar month summary
    Month {
        /// User ID
        user: i64,
        /// Year (default: current)
        #[arg(long)]
        year: Option<i32>,
        /// Month 1-12 (default: current)
        #[arg(long)]
        month: Option<u32>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Update an entry (quantity, macros, meal type, or date)
    Update {
        /// User ID
        user: i64,
        /// Entry ID to update
        entry_id: i64,
        /// New quantity (e.g. "200g", "2 tbsp")
        #[arg(short, long)]
        quantity: Option<String>,
        /// New carbohydrates (g)
        #[arg(long)]
        carbs: Option<f64>,
        /// New protein (g)
        #[arg(long)]
        protein: Option<f64>,
        /// New fat (g)
        #[arg(long)]
        fat: Option<f64>,
        /// New meal type: breakfast, lunch, dinner, snack
        #[arg(long)]
        meal: Option<String>,
        /// Move to date (YYYY-MM-DD)
        #[arg(long)]
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete an entry by ID
    Delete {
        /// User ID
        user: i64,
        /// Entry ID to delete
        entry_id: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete every entry on a date
    Clear {
        /// User ID
        user: i64,
        /// Date to clear (YYYY-MM-DD, today, yesterday)
        date: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Search logged entries by product name
    Search {
        /// User ID
        user: i64,
        /// Part of a product name
        fragment: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show the most frequently logged products
    Top {
        /// User ID
        user: i64,
        /// Number of products to show (1-100)
        #[arg(short, long, default_value = "10")]
        limit: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage daily nutrition goals
    Goals {
        #[command(subcommand)]
        command: GoalsCommands,
    },
}

#[derive(Subcommand)]
enum GoalsCommands {
    /// Show goals (defaults when none are set)
    Show {
        /// User ID
        user: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Set goals
    Set {
        /// User ID
        user: i64,
        /// Calorie goal (kcal)
        #[arg(long)]
        calories: i64,
        /// Carbohydrate goal (g)
        #[arg(long)]
        carbs: i64,
        /// Protein goal (g)
        #[arg(long)]
        protein: i64,
        /// Fat goal (g)
        #[arg(long)]
        fat: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove custom goals
    Reset {
        /// User ID
        user: i64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Compare a day's intake with the goals
    Progress {
        /// User ID
        user: i64,
        /// Date (YYYY-MM-DD, default: today)
        date: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // The server logs requests at info; one-shot commands only surface problems.
    let default_level = if matches!(cli.command, Commands::Serve { .. }) {
        "info"
    } else {
        "warn"
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = Config::load(cli.db)?;
    let db = Database::open_with(&config.db_path, &config.pool)?;

    match cli.command {
        Commands::Serve { port, bind } => {
            let off = OpenFoodFactsClient::new(&config.off_base_url)?;
            let service = NutritionService::new(db, Arc::new(off));
            server::start_server(service, port, &bind).await
        }
        Commands::Log {
            user,
            product,
            quantity,
            macros,
            meal,
            date,
            json,
        } => cmd_log(
            &db,
            user,
            &product,
            &quantity,
            &macros,
            meal.as_deref(),
            date,
            json,
        ),
        Commands::Barcode {
            user,
            code,
            quantity,
            meal,
            date,
            json,
        } => {
            let off = OpenFoodFactsClient::new(&config.off_base_url)?;
            let service = NutritionService::new(db, Arc::new(off));
            cmd_barcode(
                &service,
                user,
                &code,
                quantity.as_deref(),
                meal.as_deref(),
                date,
                json,
            )
            .await
        }
        Commands::Summary { user, date, json } => cmd_summary(&db, user, date, json),
        Commands::Week { user, date, json } => cmd_week(&db, user, date, json),
        Commands::Month {
            user,
            year,
            month,
            json,
        } => cmd_month(&db, user, year, month, json),
        Commands::Update {
            user,
            entry_id,
            quantity,
            carbs,
            protein,
            fat,
            meal,
            date,
            json,
        } => cmd_update(
            &db,
            user,
            entry_id,
            EntryChanges {
                quantity,
                carbs,
                protein,
                fat,
                meal,
                date,
            },
            json,
        ),
        Commands::Delete {
            user,
            entry_id,
            json,
        } => cmd_delete(&db, user, entry_id, json),
        Commands::Clear { user, date, json } => cmd_clear(&db, user, Some(date), json),
        Commands::Search {
            user,
            fragment,
            json,
        } => cmd_search(&db, user, &fragment, json),
        Commands::Top { user, limit, json } => cmd_top(&db, user, limit, json),
        Commands::Goals { command } => match command {
            GoalsCommands::Show { user, json } => cmd_goals_show(&db, user, json),
            GoalsCommands::Set {
                user,
                calories,
                carbs,
                protein,
                fat,
                json,
            } => {
                let targets = GoalTargets {
                    calorie_goal: calories,
                    carbs_goal: carbs,
                    protein_goal: protein,
                    fat_goal: fat,
                };
                cmd_goals_set(&db, user, &targets, json)
            }
            GoalsCommands::Reset { user, json } => cmd_goals_reset(&db, user, json),
            GoalsCommands::Progress { user, date, json } => {
                cmd_goals_progress(&db, user, date, json)
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_log_with_macros() {
        let cli = Cli::try_parse_from([
            "macrotrack", "log", "1", "Rice", "150g", "--carbs", "42", "--protein", "4", "--fat",
            "1", "--meal", "lunch",
        ])
        .unwrap();
        let Commands::Log {
            user,
            quantity,
            macros,
            meal,
            ..
        } = cli.command
        else {
            panic!("expected log command");
        };
        assert_eq!(user, 1);
        assert_eq!(quantity, "150g");
        assert!((macros.carbs - 42.0).abs() < f64::EPSILON);
        assert!(macros.fiber.abs() < f64::EPSILON);
        assert_eq!(meal.as_deref(), Some("lunch"));
    }

    #[test]
    fn test_global_db_flag() {
        let cli =
            Cli::try_parse_from(["macrotrack", "summary", "3", "--db", "/tmp/x.db"]).unwrap();
        assert_eq!(cli.db, Some(PathBuf::from("/tmp/x.db")));
    }

    #[test]
    fn test_log_requires_macros() {
        assert!(Cli::try_parse_from(["macrotrack", "log", "1", "Rice", "150g"]).is_err());
    }
}
