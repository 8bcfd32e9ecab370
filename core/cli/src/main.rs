//! tabtrack: control client for the tabtrack reporter.
//!
//! Stands in for the browser popup (start, stop, login, status) and carries
//! the bridge commands a browser extension's native host uses to forward tab
//! and window notifications.
//!
//! ## Subcommands
//!
//! - `start` / `stop`: toggle tracking
//! - `status`: tracking flag, login state and the engine's own view
//! - `login`: register this device (password from `--password` or stdin)
//! - `notify`: forward a browser notification

mod client;
mod logging;

use clap::{Parser, Subcommand};
use serde_json::json;
use std::io::{self, Read};
use tabtrack_protocol::{
    Action, ControlRequest, LoginPayload, PlatformNotification, Response, WindowView,
};

use client::{Client, ClientError};

#[derive(Parser)]
#[command(name = "tabtrack")]
#[command(about = "Control the tabtrack foreground-activity reporter")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start tracking (the reporter confirms once the engine agrees)
    Start,

    /// Stop tracking
    Stop,

    /// Show tracking and login state
    Status,

    /// Log in and register this device
    Login {
        /// Server in host[:port] form
        #[arg(long)]
        server: String,

        #[arg(long)]
        username: String,

        /// Device name to register
        #[arg(long)]
        device: String,

        /// Password; read from stdin when omitted
        #[arg(long)]
        password: Option<String>,
    },

    /// Forward a browser notification to the reporter
    Notify {
        #[command(subcommand)]
        event: NotifyCommand,
    },
}

#[derive(Subcommand)]
enum NotifyCommand {
    /// A tab navigated to a new URL
    TabUpdated {
        #[arg(value_name = "TAB_ID")]
        tab_id: i64,

        #[arg(value_name = "URL")]
        url: String,

        #[arg(long)]
        window: Option<i64>,
    },

    /// A tab became the active tab of its window
    TabActivated {
        #[arg(value_name = "TAB_ID")]
        tab_id: i64,

        #[arg(value_name = "WINDOW_ID")]
        window_id: i64,
    },

    /// Window focus changed (-1 when no browser window has focus)
    Focus {
        #[arg(value_name = "WINDOW_ID", allow_negative_numbers = true)]
        window_id: i64,
    },

    /// Replace the reporter's view of the browser (JSON window list on stdin)
    Snapshot,
}

fn main() {
    let logging_guard = logging::init();
    let cli = Cli::parse();

    let code = match run(cli.command) {
        Ok(true) => 0,
        Ok(false) => 2,
        Err(err) => {
            tracing::error!(error = %err, "tabtrack command failed");
            eprintln!("tabtrack: {}", err);
            1
        }
    };

    drop(logging_guard);
    std::process::exit(code);
}

#[derive(Debug, thiserror::Error)]
enum CommandError {
    #[error(transparent)]
    Client(#[from] ClientError),

    #[error("Failed to read stdin: {0}")]
    Stdin(#[source] io::Error),

    #[error("Invalid snapshot: {0}")]
    Snapshot(#[source] serde_json::Error),

    #[error("Reporter gave no boolean answer to {0}")]
    NotBoolean(Action),
}

/// Returns `false` when the reporter answered but the command did not succeed.
fn run(command: Commands) -> Result<bool, CommandError> {
    let client = Client::from_env()?;

    match command {
        Commands::Start => {
            client.control(&ControlRequest::new(Action::StartTracking))?;
            println!("start requested");
        }
        Commands::Stop => {
            client.control(&ControlRequest::new(Action::StopTracking))?;
            println!("stopped");
        }
        Commands::Status => {
            let tracking = ask(&client, Action::GetTracking)?;
            let logged_in = ask(&client, Action::CheckLogin)?;
            let engine = ask(&client, Action::IsTracking)?;
            println!("tracking: {}", on_off(tracking));
            println!("logged in: {}", yes_no(logged_in));
            println!("engine recording: {}", yes_no(engine));
        }
        Commands::Login {
            server,
            username,
            device,
            password,
        } => {
            let password = match password {
                Some(password) => password,
                None => read_password()?,
            };
            let login = LoginPayload {
                server_name: server,
                username,
                password,
                device_name: device,
            };
            tracing::info!(server = %login.server_name, device = %login.device_name, "Logging in");
            let response = client.control(&login_request(&login))?;
            let success = answer(&response, Action::Login)?;
            println!("{}", if success { "logged in" } else { "login failed" });
            return Ok(success);
        }
        Commands::Notify { event } => {
            let notification = notification(event)?;
            client.notify(&notification)?;
        }
    }

    Ok(true)
}

fn login_request(login: &LoginPayload) -> ControlRequest {
    ControlRequest::new(Action::Login).with_payload(json!({
        "serverName": login.server_name,
        "username": login.username,
        "password": login.password,
        "deviceName": login.device_name,
    }))
}

fn notification(event: NotifyCommand) -> Result<PlatformNotification, CommandError> {
    let notification = match event {
        NotifyCommand::TabUpdated {
            tab_id,
            url,
            window,
        } => PlatformNotification::TabUpdated {
            tab_id,
            window_id: window,
            url,
        },
        NotifyCommand::TabActivated { tab_id, window_id } => {
            PlatformNotification::TabActivated { tab_id, window_id }
        }
        NotifyCommand::Focus { window_id } => PlatformNotification::WindowFocusChanged { window_id },
        NotifyCommand::Snapshot => {
            let mut input = String::new();
            io::stdin()
                .read_to_string(&mut input)
                .map_err(CommandError::Stdin)?;
            let windows: Vec<WindowView> =
                serde_json::from_str(&input).map_err(CommandError::Snapshot)?;
            PlatformNotification::Snapshot { windows }
        }
    };
    Ok(notification)
}

fn ask(client: &Client, action: Action) -> Result<bool, CommandError> {
    let response = client.control(&ControlRequest::new(action))?;
    answer(&response, action)
}

fn answer(response: &Response, action: Action) -> Result<bool, CommandError> {
    response.as_bool().ok_or(CommandError::NotBoolean(action))
}

fn read_password() -> Result<String, CommandError> {
    let mut line = String::new();
    io::stdin()
        .read_line(&mut line)
        .map_err(CommandError::Stdin)?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn on_off(value: bool) -> &'static str {
    if value {
        "on"
    } else {
        "off"
    }
}

fn yes_no(value: bool) -> &'static str {
    if value {
        "yes"
    } else {
        "no"
    }
}
