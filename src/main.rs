use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

use ticketctx::cli::{context, extract, history, prefs, project, ticket, views};
use ticketctx::config::Config;
use ticketctx::context::SmartContext;
use ticketctx::store::ContextStore;

#[derive(Parser)]
#[command(name = "ticketctx")]
#[command(about = "Token-budgeted conversation context for support tickets")]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, default_value = "ticketctx.yaml")]
    config: String,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// User preference management
    Prefs {
        #[command(subcommand)]
        command: PrefsCommands,
    },

    /// Project management
    Project {
        #[command(subcommand)]
        command: ProjectCommands,
    },

    /// Ticket management
    Ticket {
        #[command(subcommand)]
        command: TicketCommands,
    },

    /// Show the budgeted history for a ticket
    History {
        /// Ticket ID or number
        ticket: String,
        /// Token budget (defaults to context.history_budget)
        #[arg(short, long)]
        budget: Option<usize>,
    },

    /// Summarize old messages into an extraction
    Extract {
        /// Ticket ID or number
        #[arg(required_unless_present = "pending")]
        ticket: Option<String>,
        /// Summarize exactly the N oldest unsummarized messages
        #[arg(short, long)]
        limit: Option<usize>,
        /// Process every ticket over the extraction thresholds
        #[arg(long, conflicts_with_all = ["ticket", "limit"])]
        pending: bool,
    },

    /// Assemble the full context for a ticket turn
    Context {
        /// Ticket ID or number
        ticket: String,
        /// User the context is built for
        #[arg(short, long)]
        user: String,
        /// Token budget (defaults to context.total_budget)
        #[arg(short, long)]
        budget: Option<usize>,
    },

    /// Show the monitoring views
    Views,
}

#[derive(Subcommand)]
enum PrefsCommands {
    /// Print a user's preference block
    Show { user: String },
    /// Create or update a user's preferences
    Set {
        user: String,
        #[arg(long)]
        language: Option<String>,
        #[arg(long)]
        skill_level: Option<String>,
        #[arg(long)]
        notes: Option<String>,
    },
}

#[derive(Subcommand)]
enum ProjectCommands {
    /// Create a new project
    Create {
        /// Project name
        name: String,
        #[arg(long)]
        web_path: Option<String>,
        #[arg(long)]
        app_path: Option<String>,
    },
    /// Show a project with its map and knowledge
    Show { id: i64 },
    /// Replace a project's map
    SetMap {
        id: i64,
        #[arg(long)]
        files: Option<i64>,
        #[arg(long)]
        language: Option<String>,
        /// Comma separated
        #[arg(long)]
        stack: Option<String>,
        #[arg(long)]
        summary: Option<String>,
    },
    /// Record a known gotcha
    AddGotcha { id: i64, text: String },
}

#[derive(Subcommand)]
enum TicketCommands {
    /// Open a ticket under a project
    Create { project_id: i64, number: String },
    /// Append a message (role: user, assistant, system)
    Say {
        ticket: String,
        role: String,
        content: String,
    },
    /// Mark a ticket closed
    Close { ticket: String },
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    // Load config
    let config = Config::load(&cli.config).unwrap_or_default();

    let level = if cli.verbose {
        "debug"
    } else {
        config.logging.level.as_str()
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level)),
        )
        .with_writer(std::io::stderr)
        .init();

    let db_path = config.database_path();
    let store = ContextStore::open(&db_path, &config.database)
        .with_context(|| format!("opening {}", db_path.display()))?;
    let ctx = SmartContext::new(store, &config);

    match cli.command {
        Commands::Prefs { command } => match command {
            PrefsCommands::Show { user } => prefs::show(&ctx, &user)?,
            PrefsCommands::Set {
                user,
                language,
                skill_level,
                notes,
            } => prefs::set(&ctx, user, language, skill_level, notes)?,
        },
        Commands::Project { command } => match command {
            ProjectCommands::Create {
                name,
                web_path,
                app_path,
            } => project::create(&ctx, name, web_path, app_path)?,
            ProjectCommands::Show { id } => project::show(&ctx, id)?,
            ProjectCommands::SetMap {
                id,
                files,
                language,
                stack,
                summary,
            } => project::set_map(&ctx, id, files, language, stack, summary)?,
            ProjectCommands::AddGotcha { id, text } => project::add_gotcha(&ctx, id, text)?,
        },
        Commands::Ticket { command } => match command {
            TicketCommands::Create { project_id, number } => {
                ticket::create(&ctx, project_id, number)?
            }
            TicketCommands::Say {
                ticket: t,
                role,
                content,
            } => ticket::say(&ctx, t, role, content)?,
            TicketCommands::Close { ticket: t } => ticket::close(&ctx, t)?,
        },
        Commands::History { ticket: t, budget } => history::run(&ctx, t, budget)?,
        Commands::Extract {
            ticket: t,
            limit,
            pending,
        } => {
            if pending {
                extract::pending(&ctx)?;
            } else if let Some(t) = t {
                extract::run(&ctx, t, limit)?;
            }
        }
        Commands::Context {
            ticket: t,
            user,
            budget,
        } => context::run(&ctx, t, user, budget)?,
        Commands::Views => views::run(&ctx)?,
    }

    Ok(())
}
