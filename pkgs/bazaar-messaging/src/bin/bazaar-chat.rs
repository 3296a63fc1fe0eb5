use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use bazaar_messaging::{
    badge_label, ConversationResolver, MessagingConfig, ProductInquiry, ReadScope, SendMessage,
    UnreadCounterService, UnreadPoller,
};
use bazaar_store::{Backend, Conversation, ConversationScope, DocumentStore, SystemClock};
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about = "Drive Bazaar buyer/seller messaging from the terminal", long_about = None)]
struct Args {
    /// JSON configuration file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Storage backend
    #[arg(short, long, value_enum)]
    backend: Option<BackendArg>,

    /// SQLite database file
    #[arg(long)]
    db_path: Option<PathBuf>,

    /// Directory holding the local blobs
    #[arg(long)]
    local_dir: Option<PathBuf>,

    /// One conversation per pair, or per pair and product
    #[arg(long, value_enum)]
    scope: Option<ScopeArg>,

    /// What marking a conversation read sweeps
    #[arg(long, value_enum)]
    read_scope: Option<ReadScopeArg>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Send a message
    Send {
        #[arg(long)]
        from: String,
        #[arg(long, default_value = "User")]
        from_name: String,
        #[arg(long)]
        to: String,
        #[arg(long, default_value = "User")]
        to_name: String,
        #[arg(long)]
        product_id: Option<String>,
        #[arg(long)]
        product_name: Option<String>,
        content: String,
    },
    /// List a user's conversations
    Conversations { user: String },
    /// Show the messages of a conversation
    Messages { conversation: String },
    /// Mark a conversation read for a user
    Read { conversation: String, user: String },
    /// Print a user's unread total
    Unread { user: String },
    /// Contact the vendor of a product
    Contact {
        #[arg(long)]
        buyer: String,
        #[arg(long, default_value = "")]
        buyer_name: String,
        #[arg(long)]
        vendor: String,
        #[arg(long, default_value = "")]
        vendor_name: String,
        #[arg(long)]
        product_id: String,
        #[arg(long)]
        product_name: String,
    },
    /// Link messages left unlinked by the browser mock to their conversations
    LinkLegacy,
    /// Keep printing a user's unread badge until interrupted
    Watch {
        user: String,
        /// Refresh period, e.g. "30s" (defaults to the configured one)
        #[arg(long, value_parser = humantime::parse_duration)]
        interval: Option<Duration>,
    },
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum BackendArg {
    Sqlite,
    Local,
    Memory,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ScopeArg {
    Pair,
    PairAndProduct,
}

#[derive(Clone, Copy, Debug, ValueEnum)]
enum ReadScopeArg {
    All,
    Conversation,
}

fn load_config(args: &Args) -> anyhow::Result<MessagingConfig> {
    let mut config = match &args.config {
        Some(path) => MessagingConfig::from_file(path)?,
        None => MessagingConfig::default(),
    };

    if let Some(backend) = args.backend {
        config.persistence.backend = match backend {
            BackendArg::Sqlite => Backend::Sqlite,
            BackendArg::Local => Backend::Local,
            BackendArg::Memory => Backend::Memory,
        };
    }
    if let Some(path) = &args.db_path {
        config.persistence.db_path = path.clone();
    }
    if let Some(dir) = &args.local_dir {
        config.persistence.local_dir = dir.clone();
    }
    if let Some(scope) = args.scope {
        config.scope = match scope {
            ScopeArg::Pair => ConversationScope::Pair,
            ScopeArg::PairAndProduct => ConversationScope::PairAndProduct,
        };
    }
    if let Some(read_scope) = args.read_scope {
        config.read_scope = match read_scope {
            ReadScopeArg::All => ReadScope::AllConversations,
            ReadScopeArg::Conversation => ReadScope::Conversation,
        };
    }

    Ok(config)
}

fn print_conversation(conversation: &Conversation, user: &str) {
    let other = conversation
        .other_participant_name(user)
        .or_else(|| conversation.other_participant(user))
        .unwrap_or("?");
    let last = conversation
        .last_message
        .as_ref()
        .map(|m| m.content.as_str())
        .unwrap_or("");
    let badge = badge_label(conversation.unread_for(user))
        .map(|b| format!(" [{}]", b))
        .unwrap_or_default();

    match &conversation.product_name {
        Some(product) => println!("{}  {} ({}){}: {}", conversation.id, other, product, badge, last),
        None => println!("{}  {}{}: {}", conversation.id, other, badge, last),
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    let config = load_config(&args)?;
    let db: Arc<dyn DocumentStore> = Arc::new(
        config
            .persistence
            .database_info()
            .connect()
            .await
            .context("opening storage")?,
    );
    let resolver = ConversationResolver::new(db.clone(), Arc::new(SystemClock), &config);

    match args.command {
        Command::Send {
            from,
            from_name,
            to,
            to_name,
            product_id,
            product_name,
            content,
        } => {
            let message = resolver
                .send_message(SendMessage {
                    sender_id: from,
                    sender_name: from_name,
                    sender_photo: None,
                    receiver_id: to,
                    receiver_name: to_name,
                    content,
                    product_id,
                    product_name,
                })
                .await?;
            println!(
                "Sent {} in {}",
                message.id,
                message.conversation_id.unwrap_or_default()
            );
        }
        Command::Conversations { user } => {
            let conversations = resolver.get_user_conversations(&user).await?;
            if conversations.is_empty() {
                println!("No conversations for {}", user);
            }
            for conversation in &conversations {
                print_conversation(conversation, &user);
            }
        }
        Command::Messages { conversation } => {
            for message in resolver.get_conversation_messages(&conversation).await? {
                let mark = if message.read { "" } else { " *" };
                println!(
                    "{} {}: {}{}",
                    message.timestamp.format("%Y-%m-%d %H:%M:%S"),
                    message.sender_name,
                    message.content,
                    mark
                );
            }
        }
        Command::Read { conversation, user } => {
            let flipped = resolver.mark_messages_as_read(&conversation, &user).await?;
            println!("Marked {} messages read", flipped);
        }
        Command::LinkLegacy => {
            let linked = resolver.link_legacy_messages().await?;
            println!("Linked {} messages", linked);
        }
        Command::Unread { user } => {
            let total = UnreadCounterService::new(db).get_unread_total(&user).await?;
            println!("{}", total);
        }
        Command::Contact {
            buyer,
            buyer_name,
            vendor,
            vendor_name,
            product_id,
            product_name,
        } => {
            let conversation = resolver
                .contact_vendor(ProductInquiry {
                    buyer_id: buyer.clone(),
                    buyer_name,
                    buyer_photo: None,
                    vendor_id: vendor,
                    vendor_name,
                    product_id,
                    product_name,
                })
                .await?;
            print_conversation(&conversation, &buyer);
        }
        Command::Watch { user, interval } => {
            let period = interval.unwrap_or(config.poll_interval);
            anyhow::ensure!(!period.is_zero(), "interval must be longer than zero");
            let mut subscription =
                UnreadPoller::spawn(UnreadCounterService::new(db), user.clone(), period);

            loop {
                tokio::select! {
                    _ = tokio::signal::ctrl_c() => break,
                    state = subscription.changed() => match state {
                        Some(state) if !state.loading => {
                            let label = badge_label(state.count).unwrap_or_else(|| "-".to_string());
                            println!("{}: {}", user, label);
                        }
                        Some(_) => {}
                        None => break,
                    },
                }
            }

            subscription.stop().await;
        }
    }

    Ok(())
}

#[tokio::main]
async fn main() -> ExitCode {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    let args = Args::parse();

    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("operation failed: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
