mod commands;
mod config;
mod openfoodfacts;
mod remote;
mod server;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::process;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

use crate::commands::{
    FoodArgs, cmd_food_add, cmd_food_delete, cmd_food_list, cmd_meal, cmd_quantize,
    cmd_recipe_add_ingredient, cmd_recipe_create, cmd_recipe_delete, cmd_recipe_list,
    cmd_recipe_remove_ingredient, cmd_recipe_scale, cmd_recipe_set_servings, cmd_recipe_show,
    cmd_invalidate, cmd_report, cmd_search, cmd_show, cmd_upload,
};
use crate::config::{Config, RemoteBackend};
use crate::openfoodfacts::OpenFoodFactsClient;
use crate::remote::HttpLookupClient;
use larder_core::models::{EntityKind, MealLine, ServingSize};
use larder_core::quantize::DEFAULT_MAX_SERVINGS;
use larder_core::remote::RemoteLookupService;
use larder_core::service::LarderService;

#[derive(Parser)]
#[command(
    name = "larder",
    version,
    about = "Food and recipe lookup with a local cache"
)]
struct Cli {
    /// Log debug output to stderr
    #[arg(short, long, global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Search foods or recipes, served from the local index while fresh
    Search {
        /// Search query
        query: String,
        /// What to search for: food or recipe
        #[arg(short, long, default_value = "food")]
        kind: EntityKind,
        /// Locale passed to the remote service (default: LARDER_LOCALE or "en")
        #[arg(short, long)]
        locale: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Drop cached search results so the next search hits the remote
    Invalidate {
        /// Search query
        query: String,
        /// food or recipe
        #[arg(short, long, default_value = "food")]
        kind: EntityKind,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show a food or recipe by ID, fetching it remotely if not stored
    Show {
        /// food or recipe
        kind: EntityKind,
        /// Entity ID (e.g. "off:3017620422003")
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Manage locally stored foods
    Food {
        #[command(subcommand)]
        command: FoodCommands,
    },
    /// Manage recipes
    Recipe {
        #[command(subcommand)]
        command: RecipeCommands,
    },
    /// Total the nutrients of a meal
    Meal {
        /// Lines like "food:<id>:<grams>" or "recipe:<id>:<servings>"
        #[arg(required = true)]
        lines: Vec<MealLine>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Express a gram amount as whole servings of a standard size
    Quantize {
        /// Quantity in grams
        grams: f64,
        /// Largest servings count before falling back to grams
        #[arg(long, default_value_t = DEFAULT_MAX_SERVINGS)]
        max_servings: u32,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Report a remote food or recipe as wrong
    Report {
        /// food or recipe
        kind: EntityKind,
        /// Entity ID
        id: String,
        /// What is wrong with it
        reason: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Upload a locally stored food or recipe to the remote service
    Upload {
        /// food or recipe
        kind: EntityKind,
        /// Entity ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Start the JSON API server
    Serve {
        /// Port to listen on
        #[arg(short, long, default_value = "8080")]
        port: u16,
        /// Address to bind to (default: 127.0.0.1, use 0.0.0.0 to expose to network)
        #[arg(short, long, default_value = "127.0.0.1")]
        bind: String,
    },
}

#[derive(Subcommand)]
enum FoodCommands {
    /// Add a custom food
    Add {
        /// Food name
        name: String,
        /// Calories per declared serving
        #[arg(long)]
        calories: f64,
        /// Protein per declared serving
        #[arg(long)]
        protein: Option<f64>,
        /// Carbs per declared serving
        #[arg(long)]
        carbs: Option<f64>,
        /// Fat per declared serving
        #[arg(long)]
        fat: Option<f64>,
        /// Serving unit: 1g, 10g, 50g, 100g, 200g or 500g
        #[arg(long, default_value = "100g")]
        serving_size: ServingSize,
        /// Number of serving units the values cover
        #[arg(long, default_value = "1")]
        servings: u32,
        /// Brand name
        #[arg(long)]
        brand: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List stored foods
    List {
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a stored food (fails while a recipe uses it)
    Delete {
        /// Food ID
        id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[derive(Subcommand)]
enum RecipeCommands {
    /// Create a new recipe
    Create {
        /// Recipe name
        name: String,
        /// Number of servings this recipe makes
        #[arg(short, long, default_value = "1")]
        servings: f64,
        /// Preparation notes
        #[arg(long)]
        instructions: Option<String>,
        /// Make the recipe public
        #[arg(long)]
        public: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Add a stored food to a recipe
    AddIngredient {
        /// Recipe ID
        recipe_id: String,
        /// Food ID
        food_id: String,
        /// Quantity in grams (e.g. "150" or "150g")
        quantity: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Remove an ingredient from a recipe
    RemoveIngredient {
        /// Recipe ID
        recipe_id: String,
        /// Food ID
        food_id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Change the number of servings a recipe makes
    SetServings {
        /// Recipe ID
        recipe_id: String,
        /// New number of servings
        servings: f64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show recipe details (ingredients + per-serving nutrition)
    Show {
        /// Recipe ID
        recipe_id: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Nutrient totals for a different number of servings
    Scale {
        /// Recipe ID
        recipe_id: String,
        /// Target number of servings
        servings: f64,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// List recipes
    List {
        /// Only show public or owner recipes
        #[arg(long)]
        visibility: Option<String>,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Delete a recipe
    Delete {
        /// Recipe ID
        recipe_id: String,
        /// Hide the recipe instead of removing it
        #[arg(long)]
        soft: bool,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Err(e) = run(cli).await {
        eprintln!("Error: {e:#}");
        process::exit(1);
    }
}

fn init_tracing(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn build_remote(config: &Config) -> Result<Arc<dyn RemoteLookupService>> {
    let timeout = config.sync.remote_timeout;
    Ok(match (config.remote, config.remote_url.as_deref()) {
        (RemoteBackend::Http, Some(url)) => Arc::new(HttpLookupClient::new(url, timeout)?),
        _ => Arc::new(OpenFoodFactsClient::new(timeout)?),
    })
}

#[allow(clippy::too_many_lines)]
async fn run(cli: Cli) -> Result<()> {
    let config = Config::load()?;
    let remote = build_remote(&config)?;
    let service = LarderService::open(&config.db_path, remote, config.sync.clone())?;

    match cli.command {
        Commands::Search {
            query,
            kind,
            locale,
            json,
        } => cmd_search(&service, &query, kind, locale.as_deref(), json).await,
        Commands::Invalidate { query, kind, json } => cmd_invalidate(&service, &query, kind, json),
        Commands::Show { kind, id, json } => cmd_show(&service, kind, &id, json).await,
        Commands::Meal { lines, json } => cmd_meal(&service, &lines, json),
        Commands::Quantize {
            grams,
            max_servings,
            json,
        } => cmd_quantize(grams, max_servings, json),
        Commands::Report {
            kind,
            id,
            reason,
            json,
        } => cmd_report(&service, kind, &id, &reason, json).await,
        Commands::Upload { kind, id, json } => cmd_upload(&service, kind, &id, json).await,
        Commands::Serve { port, bind } => server::start_server(service, port, &bind).await,
        Commands::Food { command } => match command {
            FoodCommands::Add {
                name,
                calories,
                protein,
                carbs,
                fat,
                serving_size,
                servings,
                brand,
                json,
            } => cmd_food_add(
                &service,
                FoodArgs {
                    name,
                    calories,
                    protein,
                    carbs,
                    fat,
                    serving_size,
                    servings,
                    brand,
                },
                json,
            ),
            FoodCommands::List { json } => cmd_food_list(&service, json),
            FoodCommands::Delete { id, json } => cmd_food_delete(&service, &id, json),
        },
        Commands::Recipe { command } => match command {
            RecipeCommands::Create {
                name,
                servings,
                instructions,
                public,
                json,
            } => cmd_recipe_create(&service, &name, servings, instructions, public, json),
            RecipeCommands::AddIngredient {
                recipe_id,
                food_id,
                quantity,
                json,
            } => cmd_recipe_add_ingredient(&service, &recipe_id, &food_id, &quantity, json),
            RecipeCommands::RemoveIngredient {
                recipe_id,
                food_id,
                json,
            } => cmd_recipe_remove_ingredient(&service, &recipe_id, &food_id, json),
            RecipeCommands::SetServings {
                recipe_id,
                servings,
                json,
            } => cmd_recipe_set_servings(&service, &recipe_id, servings, json),
            RecipeCommands::Show { recipe_id, json } => cmd_recipe_show(&service, &recipe_id, json),
            RecipeCommands::Scale {
                recipe_id,
                servings,
                json,
            } => cmd_recipe_scale(&service, &recipe_id, servings, json),
            RecipeCommands::List { visibility, json } => {
                cmd_recipe_list(&service, visibility.as_deref(), json)
            }
            RecipeCommands::Delete {
                recipe_id,
                soft,
                json,
            } => cmd_recipe_delete(&service, &recipe_id, soft, json),
        },
    }
}
