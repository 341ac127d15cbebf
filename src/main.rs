use std::path::PathBuf;

use clap::{Parser, Subcommand};
use wxchat_rust::{Client, ClientError, Event, EventKind, WxConfig};

/// Command-line client for the WeChat web protocol.
#[derive(Parser, Debug)]
#[command(author, version, about)]
struct Cli {
    /// Path to the JSON credential file.
    #[arg(long, default_value = "./data/session.json")]
    credentials: PathBuf,

    /// Where to write the login QR image.
    #[arg(long, default_value = "./qrcode.png")]
    qr_path: PathBuf,

    /// Override the user agent advertised by the client.
    #[arg(long)]
    user_agent: Option<String>,

    /// Do not print the QR code to the terminal.
    #[arg(long)]
    no_terminal_qr: bool,

    /// Choose a command to run.
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Log in and print every event until interrupted.
    Listen,
    /// Log in and send a text to the contact with the given remark.
    Send {
        /// Remark of the recipient.
        #[arg(long)]
        to: String,
        text: String,
    },
}

const ALL_KINDS: [EventKind; 10] = [
    EventKind::UuidGenerated,
    EventKind::ScanPending,
    EventKind::AuthConfirmed,
    EventKind::LoggedIn,
    EventKind::SessionInitialized,
    EventKind::ContactsInitialized,
    EventKind::ListenFailed,
    EventKind::ContactsModified,
    EventKind::ContactsDeleted,
    EventKind::MessageReceived,
];

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();
    let mut config = WxConfig::default()
        .with_credential_path(cli.credentials.to_string_lossy())
        .with_qr_image_path(cli.qr_path.to_string_lossy())
        .with_print_qr(!cli.no_terminal_qr);

    if let Some(agent) = cli.user_agent {
        config = config.with_user_agent(agent);
    }

    let client = Client::new(config)?;

    match cli.command {
        Commands::Listen => {
            for kind in ALL_KINDS {
                client.set_listener(kind, print_event);
            }
            client.login().await?;
            client.run().await?;
        }
        Commands::Send { to, text } => {
            client.login().await?;
            match client.find_by_remark(&to).await {
                Ok(user_name) => {
                    let msg_id = client.send_text(&user_name, &text).await?;
                    println!("Sent to {to} ({msg_id}): {text}");
                }
                Err(ClientError::Lookup(_)) => {
                    eprintln!("No contact with remark {to:?}.");
                }
                Err(err) => return Err(err.into()),
            }
        }
    }

    Ok(())
}

fn print_event(event: Event) {
    match event {
        Event::UuidGenerated(e) => println!("Scan the QR code to log in (uuid {})", e.uuid),
        Event::ScanPending(_) => println!("Scanned; confirm the login on your phone."),
        Event::AuthConfirmed(_) => println!("Login confirmed."),
        Event::LoggedIn(e) => println!("Logged in as device {}", e.device_id),
        Event::SessionInitialized(e) => println!("Session ready for {}", e.me.nick_name),
        Event::ContactsInitialized(e) => println!("Loaded {} contacts", e.count),
        Event::ListenFailed(e) => {
            eprintln!("Listen failed {} time(s) on {}", e.consecutive_failures, e.host)
        }
        Event::ContactsModified(ids) => println!("Contacts modified: {}", ids.join(", ")),
        Event::ContactsDeleted(ids) => println!("Contacts deleted: {}", ids.join(", ")),
        Event::MessageReceived(m) => {
            let group = if m.is_group { " [group]" } else { "" };
            println!(
                "{:?}{} from {}: {}",
                m.message_type(),
                group,
                m.sender.nick_name,
                m.content
            );
        }
    }
}
