use clap::{Parser, Subcommand};

mod commands;
mod util;

#[derive(Parser)]
#[command(
    name = "forma",
    version,
    about = "Forma CLI — drive coaching sessions and workout commands against the API"
)]
struct Cli {
    /// API base URL
    #[arg(long, env = "FORMA_API_URL", default_value = "http://localhost:3000")]
    api_url: String,

    /// Owner ID (temporary, will be replaced by auth)
    #[arg(long, env = "FORMA_OWNER_ID")]
    owner_id: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Check API health
    Health,
    /// Conversation session operations
    Session {
        #[command(subcommand)]
        command: SessionCommands,
    },
    /// Send a message and stream the agent turn
    Chat {
        /// Session ID
        session_id: String,
        /// The message text
        text: String,
    },
    /// Workout session operations
    Workout {
        #[command(subcommand)]
        command: WorkoutCommands,
    },
    /// Athlete profile operations
    Profile {
        #[command(subcommand)]
        command: ProfileCommands,
    },
}

#[derive(Subcommand)]
enum SessionCommands {
    /// Create a new conversation session
    Create {
        /// Attach an existing workout session
        #[arg(long)]
        workout_id: Option<String>,
    },
    /// Show session metadata
    Show { id: String },
    /// List the session's event log (audit view)
    Events {
        id: String,
        /// Maximum number of events to return
        #[arg(long)]
        limit: Option<u32>,
        /// Pagination cursor from previous response
        #[arg(long)]
        cursor: Option<String>,
    },
}

#[derive(Subcommand)]
enum WorkoutCommands {
    /// Create a workout session from a JSON payload
    Create {
        /// Payload as JSON: {"title": ..., "exercises": [...]}
        #[arg(long)]
        data: String,
    },
    /// Show a workout session with its current version
    Show { id: String },
    /// Submit a command ({"command_id", "expected_version", "command_type", ...})
    Command {
        id: String,
        /// Full command body as JSON
        #[arg(long)]
        data: String,
    },
}

#[derive(Subcommand)]
enum ProfileCommands {
    /// Show the athlete profile
    Show,
    /// Replace the profile facts with a JSON object
    Set {
        /// Facts as JSON, e.g. '{"goal": "strength"}'
        #[arg(long)]
        facts: String,
    },
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match cli.command {
        Commands::Health => commands::health::run(&cli.api_url).await,
        Commands::Session { command } => match command {
            SessionCommands::Create { workout_id } => {
                commands::session::create(&cli.api_url, cli.owner_id.as_deref(), workout_id.as_deref())
                    .await
            }
            SessionCommands::Show { id } => {
                commands::session::show(&cli.api_url, cli.owner_id.as_deref(), &id).await
            }
            SessionCommands::Events { id, limit, cursor } => {
                commands::session::events(
                    &cli.api_url,
                    cli.owner_id.as_deref(),
                    &id,
                    limit,
                    cursor.as_deref(),
                )
                .await
            }
        },
        Commands::Chat { session_id, text } => {
            commands::chat::run(&cli.api_url, cli.owner_id.as_deref(), &session_id, &text).await
        }
        Commands::Workout { command } => match command {
            WorkoutCommands::Create { data } => {
                commands::workout::create(&cli.api_url, cli.owner_id.as_deref(), &data).await
            }
            WorkoutCommands::Show { id } => {
                commands::workout::show(&cli.api_url, cli.owner_id.as_deref(), &id).await
            }
            WorkoutCommands::Command { id, data } => {
                commands::workout::command(&cli.api_url, cli.owner_id.as_deref(), &id, &data).await
            }
        },
        Commands::Profile { command } => match command {
            ProfileCommands::Show => {
                commands::profile::show(&cli.api_url, cli.owner_id.as_deref()).await
            }
            ProfileCommands::Set { facts } => {
                commands::profile::set(&cli.api_url, cli.owner_id.as_deref(), &facts).await
            }
        },
    };

    std::process::exit(code);
}
